//! Configuration for the mock server.
//!
//! Defines interactions (request descriptor + canned response), server
//! settings and YAML loading.

use crate::error::MockError;
use crate::matcher::PathPattern;
use axum::http::{HeaderName, HeaderValue};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::str::FromStr;

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Port to listen on (0 picks a free port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Default host used as the signature prefix
    #[serde(default = "default_host")]
    pub host: String,

    /// Address to bind the listener to
    #[serde(default = "default_listen")]
    pub listen: IpAddr,

    /// Interactions registered every time the server starts
    #[serde(default)]
    pub interactions: Vec<Interaction>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

fn default_port() -> u16 {
    9393
}

fn default_host() -> String {
    "mock-service.test".to_string()
}

fn default_listen() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            listen: default_listen(),
            interactions: Vec::new(),
            settings: Settings::default(),
        }
    }
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            anyhow::bail!("Host cannot be empty");
        }
        for (i, interaction) in self.interactions.iter().enumerate() {
            interaction
                .validate()
                .map_err(|e| anyhow::anyhow!("Interaction {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// How query parameters are folded into a signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerySignature {
    /// Decoded, sorted and `&`-delimited pairs
    #[default]
    Canonical,
    /// Declaration-order `key=value` pairs with no delimiter, raw request query
    Legacy,
}

/// Response for a request whose path matched but whose query did not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedQuery {
    /// Same 404 as an unknown route
    #[default]
    NotFound,
    /// 200 with an empty JSON-typed body
    EmptyBody,
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Log every matched request
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Query signature canonicalization
    #[serde(default)]
    pub query_signature: QuerySignature,

    /// Behavior when the route matches but the query signature does not
    #[serde(default)]
    pub unmatched_query: UnmatchedQuery,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            query_signature: QuerySignature::default(),
            unmatched_query: UnmatchedQuery::default(),
        }
    }
}

/// A declared request pattern paired with its canned response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Interaction {
    /// Request to match
    pub request: RequestDescriptor,

    /// Response to return
    pub response: ResponseDescriptor,
}

impl Interaction {
    pub fn new(request: RequestDescriptor, response: ResponseDescriptor) -> Self {
        Self { request, response }
    }

    /// Validate the interaction.
    pub fn validate(&self) -> Result<(), MockError> {
        self.request.validate()?;
        self.response.validate()?;
        Ok(())
    }
}

/// HTTP method of a request descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    /// Matches every method
    All,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::All => "ALL",
        }
    }

    /// Whether a request method satisfies this descriptor method.
    pub fn matches(&self, method: &str) -> bool {
        *self == HttpMethod::All || self.as_str().eq_ignore_ascii_case(method)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = MockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            "ALL" => Ok(HttpMethod::All),
            _ => Err(MockError::InvalidInteraction(format!(
                "unsupported method: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = MockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

/// Request side of an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDescriptor {
    /// HTTP method to match
    pub method: HttpMethod,

    /// Host override (defaults to the server host)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Path, possibly templated (`/users/{id}` or `/users/:id`)
    pub path: String,

    /// Expected query parameters, in declaration order
    #[serde(default, alias = "queryParams", skip_serializing_if = "QueryParams::is_empty")]
    pub query_params: QueryParams,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            host: None,
            path: path.into(),
            query_params: QueryParams::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query_params.push(name, value);
        self
    }

    /// Validate the request descriptor.
    pub fn validate(&self) -> Result<(), MockError> {
        if !self.path.starts_with('/') {
            return Err(MockError::InvalidInteraction(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.path.contains('?') {
            return Err(MockError::InvalidInteraction(format!(
                "path must not carry a query string, use query_params: {}",
                self.path
            )));
        }
        if matches!(&self.host, Some(host) if host.is_empty()) {
            return Err(MockError::InvalidInteraction("host cannot be empty".to_string()));
        }
        PathPattern::parse(&self.path)?;
        Ok(())
    }
}

/// Ordered query parameter mapping.
///
/// Deserializes from a map whose values may be strings, numbers or booleans;
/// every value is kept in its string form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn push(&mut self, name: impl Into<String>, value: impl ToString) {
        self.0.push((name.into(), value.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl QueryValue {
    fn into_string(self) -> String {
        match self {
            QueryValue::Text(s) => s,
            QueryValue::Integer(n) => n.to_string(),
            QueryValue::Float(n) => n.to_string(),
            QueryValue::Bool(b) => b.to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for QueryParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QueryParamsVisitor;

        impl<'de> Visitor<'de> for QueryParamsVisitor {
            type Value = QueryParams;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of query parameter names to scalar values")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(QueryParams::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut params = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, QueryValue>()? {
                    params.push((key, value.into_string()));
                }
                Ok(QueryParams(params))
            }
        }

        deserializer.deserialize_any(QueryParamsVisitor)
    }
}

impl Serialize for QueryParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Response side of an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDescriptor {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Response body, serialized as JSON
    #[serde(default)]
    pub body: serde_json::Value,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseDescriptor {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: HashMap::new(),
            body: serde_json::Value::Null,
        }
    }
}

impl ResponseDescriptor {
    /// A 200 response carrying `body`.
    pub fn json(body: impl Into<serde_json::Value>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Validate the response descriptor.
    pub fn validate(&self) -> Result<(), MockError> {
        // 1xx cannot be a final response
        if !(200..=599).contains(&self.status) {
            return Err(MockError::InvalidInteraction(format!(
                "invalid status code: {}",
                self.status
            )));
        }
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                MockError::InvalidInteraction(format!("invalid header name: {}", name))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                MockError::InvalidInteraction(format!("invalid value for header {}", name))
            })?;
        }
        Ok(())
    }
}
