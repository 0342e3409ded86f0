//! Interaction registry.
//!
//! One interception rule per distinct (method, host, path). Each rule owns a
//! signature table: the rule decides whether a request is intercepted at all,
//! its table decides which response the request gets.

use crate::config::{HttpMethod, Interaction, QuerySignature, ResponseDescriptor};
use crate::error::MockError;
use crate::matcher::{declared_query, request_query, PathPattern, Signature};
use std::collections::HashMap;
use tracing::debug;

/// One installed interception rule.
#[derive(Debug, Clone)]
pub struct InterceptionRule {
    method: HttpMethod,
    host: String,
    path: PathPattern,
    responses: HashMap<Signature, ResponseDescriptor>,
    /// Signature of the query-less interaction on this route, if any
    catch_all: Option<Signature>,
}

impl InterceptionRule {
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    pub fn has_catch_all(&self) -> bool {
        self.catch_all.is_some()
    }

    /// Number of signatures answered by this rule.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

/// Outcome of resolving a request against the registry.
#[derive(Debug)]
pub enum Resolution<'a> {
    /// A declared response applies.
    Matched {
        signature: Signature,
        response: &'a ResponseDescriptor,
        /// Parameters captured by templated path segments
        path_params: HashMap<String, String>,
    },
    /// A rule covers the route but no response is declared for this query.
    UnmatchedQuery { signature: Signature },
    /// No rule covers the method and path.
    NoRoute,
}

/// Declared interactions of one server lifecycle.
#[derive(Debug)]
pub struct Registry {
    default_host: String,
    mode: QuerySignature,
    rules: Vec<InterceptionRule>,
}

impl Registry {
    pub fn new(default_host: impl Into<String>, mode: QuerySignature) -> Self {
        Self {
            default_host: default_host.into(),
            mode,
            rules: Vec::new(),
        }
    }

    /// Register an interaction, returning the signature its response is stored under.
    ///
    /// Re-registering an identical signature replaces the previous response.
    pub fn register(&mut self, interaction: &Interaction) -> Result<Signature, MockError> {
        interaction.validate()?;

        let request = &interaction.request;
        let host = request
            .host
            .clone()
            .unwrap_or_else(|| self.default_host.clone());
        let query = declared_query(&request.query_params, self.mode);
        let signature = Signature::new(&host, &request.path, &query);

        let index = match self.rules.iter().position(|rule| {
            rule.method == request.method && rule.host == host && rule.path.as_str() == request.path
        }) {
            Some(index) => index,
            None => {
                self.rules.push(InterceptionRule {
                    method: request.method,
                    host: host.clone(),
                    path: PathPattern::parse(&request.path)?,
                    responses: HashMap::new(),
                    catch_all: None,
                });
                debug!(
                    method = %request.method,
                    host = %host,
                    path = %request.path,
                    "Installed interception rule"
                );
                self.rules.len() - 1
            }
        };

        let rule = &mut self.rules[index];
        if rule
            .responses
            .insert(signature.clone(), interaction.response.clone())
            .is_some()
        {
            debug!(signature = %signature, "Replaced response for existing signature");
        }
        if request.query_params.is_empty() {
            rule.catch_all = Some(signature.clone());
        }

        debug!(signature = %signature, "Registered interaction");
        Ok(signature)
    }

    /// Resolve a real request.
    ///
    /// `host` is the request's `Host` header, with or without port. Rules under
    /// that host are tried first, then rules under the default host.
    pub fn resolve(
        &self,
        method: &str,
        host: Option<&str>,
        path: &str,
        query_string: Option<&str>,
    ) -> Resolution<'_> {
        let found = host
            .map(strip_port)
            .filter(|host| *host != self.default_host)
            .and_then(|host| self.find_rule(method, host, path))
            .or_else(|| self.find_rule(method, &self.default_host, path));

        let Some((rule, path_params)) = found else {
            return Resolution::NoRoute;
        };

        let signature = Signature::new(
            &rule.host,
            rule.path.as_str(),
            &request_query(query_string, self.mode),
        );

        if let Some(response) = rule.responses.get(&signature) {
            return Resolution::Matched {
                signature,
                response,
                path_params,
            };
        }

        if let Some(catch_all) = &rule.catch_all {
            if let Some(response) = rule.responses.get(catch_all) {
                return Resolution::Matched {
                    signature: catch_all.clone(),
                    response,
                    path_params,
                };
            }
        }

        Resolution::UnmatchedQuery { signature }
    }

    /// Drop every rule and response.
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Number of stored responses across all rules.
    pub fn len(&self) -> usize {
        self.rules.iter().map(InterceptionRule::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.iter().all(InterceptionRule::is_empty)
    }

    /// Installed rules, in registration order.
    pub fn rules(&self) -> &[InterceptionRule] {
        &self.rules
    }

    fn find_rule(
        &self,
        method: &str,
        host: &str,
        path: &str,
    ) -> Option<(&InterceptionRule, HashMap<String, String>)> {
        let candidates = || {
            self.rules
                .iter()
                .filter(move |rule| rule.host == host && rule.method.matches(method))
        };

        candidates()
            .filter(|rule| !rule.path.is_templated())
            .chain(candidates().filter(|rule| rule.path.is_templated()))
            .find_map(|rule| rule.path.matches(path).map(|params| (rule, params)))
    }
}

/// Strip a trailing `:port` from a host header value, leaving IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestDescriptor;
    use serde_json::json;

    const HOST: &str = "mock-service.test";

    fn registry() -> Registry {
        Registry::new(HOST, QuerySignature::Canonical)
    }

    fn get(path: &str) -> RequestDescriptor {
        RequestDescriptor::new(HttpMethod::Get, path)
    }

    fn body_of(resolution: Resolution<'_>) -> Option<serde_json::Value> {
        match resolution {
            Resolution::Matched { response, .. } => Some(response.body.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_register_without_query() {
        let mut registry = registry();
        let signature = registry
            .register(&Interaction::new(
                get("/api/hello"),
                ResponseDescriptor::json(json!({"say": "hello to mock server"})),
            ))
            .unwrap();

        assert_eq!(signature.as_str(), "mock-service.test/api/hello?");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.rules().len(), 1);
        assert!(registry.rules()[0].has_catch_all());

        let body = body_of(registry.resolve("GET", None, "/api/hello", None));
        assert_eq!(body, Some(json!({"say": "hello to mock server"})));
    }

    #[test]
    fn test_query_less_interaction_ignores_request_query() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(get("/api/hello"), ResponseDescriptor::json("hi")))
            .unwrap();

        let body = body_of(registry.resolve("GET", None, "/api/hello", Some("anything=1&x")));
        assert_eq!(body, Some(json!("hi")));
    }

    #[test]
    fn test_same_path_different_query_params() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(
                get("/api/users").with_query_param("id", 1),
                ResponseDescriptor::json("user 1"),
            ))
            .unwrap();
        registry
            .register(&Interaction::new(
                get("/api/users").with_query_param("id", 2),
                ResponseDescriptor::json("user 2"),
            ))
            .unwrap();

        assert_eq!(registry.rules().len(), 1);
        assert_eq!(registry.len(), 2);

        let user1 = body_of(registry.resolve("GET", None, "/api/users", Some("id=1")));
        let user2 = body_of(registry.resolve("GET", None, "/api/users", Some("id=2")));
        assert_eq!(user1, Some(json!("user 1")));
        assert_eq!(user2, Some(json!("user 2")));

        match registry.resolve("GET", None, "/api/users", Some("id=3")) {
            Resolution::UnmatchedQuery { signature } => {
                assert_eq!(signature.as_str(), "mock-service.test/api/users?id=3");
            }
            other => panic!("Expected unmatched query, got {:?}", other),
        }
    }

    #[test]
    fn test_catch_all_answers_unknown_query() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(
                get("/api/users").with_query_param("id", 1),
                ResponseDescriptor::json("user 1"),
            ))
            .unwrap();
        registry
            .register(&Interaction::new(get("/api/users"), ResponseDescriptor::json("everyone")))
            .unwrap();

        let exact = body_of(registry.resolve("GET", None, "/api/users", Some("id=1")));
        let other = body_of(registry.resolve("GET", None, "/api/users", Some("id=9")));
        assert_eq!(exact, Some(json!("user 1")));
        assert_eq!(other, Some(json!("everyone")));
    }

    #[test]
    fn test_last_write_wins() {
        let mut registry = registry();
        let first = registry
            .register(&Interaction::new(get("/api/hello"), ResponseDescriptor::json("first")))
            .unwrap();
        let second = registry
            .register(&Interaction::new(get("/api/hello"), ResponseDescriptor::json("second")))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.rules().len(), 1);

        let body = body_of(registry.resolve("GET", None, "/api/hello", None));
        assert_eq!(body, Some(json!("second")));
    }

    #[test]
    fn test_no_route() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(get("/api/hello"), ResponseDescriptor::json("hi")))
            .unwrap();

        assert!(matches!(
            registry.resolve("GET", None, "/api/missing", None),
            Resolution::NoRoute
        ));
        assert!(matches!(
            registry.resolve("POST", None, "/api/hello", None),
            Resolution::NoRoute
        ));
    }

    #[test]
    fn test_one_rule_per_method() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(get("/api/items"), ResponseDescriptor::json("list")))
            .unwrap();
        registry
            .register(&Interaction::new(
                RequestDescriptor::new(HttpMethod::Post, "/api/items"),
                ResponseDescriptor::json("created").with_status(201),
            ))
            .unwrap();

        assert_eq!(registry.rules().len(), 2);
        assert_eq!(registry.len(), 2);

        let list = body_of(registry.resolve("GET", None, "/api/items", None));
        let created = body_of(registry.resolve("POST", None, "/api/items", None));
        assert_eq!(list, Some(json!("list")));
        assert_eq!(created, Some(json!("created")));
    }

    #[test]
    fn test_any_method_rule() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(
                RequestDescriptor::new(HttpMethod::All, "/health"),
                ResponseDescriptor::json("ok"),
            ))
            .unwrap();

        for method in ["GET", "POST", "DELETE"] {
            let body = body_of(registry.resolve(method, None, "/health", None));
            assert_eq!(body, Some(json!("ok")));
        }
    }

    #[test]
    fn test_templated_path() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(get("/users/{id}"), ResponseDescriptor::json("a user")))
            .unwrap();
        registry
            .register(&Interaction::new(get("/users/me"), ResponseDescriptor::json("myself")))
            .unwrap();

        match registry.resolve("GET", None, "/users/42", None) {
            Resolution::Matched {
                signature,
                response,
                path_params,
            } => {
                assert_eq!(signature.as_str(), "mock-service.test/users/{id}?");
                assert_eq!(response.body, json!("a user"));
                assert_eq!(path_params.get("id"), Some(&"42".to_string()));
            }
            other => panic!("Expected match, got {:?}", other),
        }

        // literal rules win over templates
        let body = body_of(registry.resolve("GET", None, "/users/me", None));
        assert_eq!(body, Some(json!("myself")));
    }

    #[test]
    fn test_host_routing() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(
                get("/status").with_host("billing.test"),
                ResponseDescriptor::json("billing"),
            ))
            .unwrap();
        registry
            .register(&Interaction::new(get("/status"), ResponseDescriptor::json("default")))
            .unwrap();

        let billing = body_of(registry.resolve("GET", Some("billing.test:9393"), "/status", None));
        let fallback = body_of(registry.resolve("GET", Some("127.0.0.1:9393"), "/status", None));
        let bare = body_of(registry.resolve("GET", None, "/status", None));
        assert_eq!(billing, Some(json!("billing")));
        assert_eq!(fallback, Some(json!("default")));
        assert_eq!(bare, Some(json!("default")));
    }

    #[test]
    fn test_host_header_falls_back_to_default_host() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(
                get("/invoices").with_host("billing.test"),
                ResponseDescriptor::json("invoices"),
            ))
            .unwrap();
        registry
            .register(&Interaction::new(get("/health"), ResponseDescriptor::json("ok")))
            .unwrap();

        let health = body_of(registry.resolve("GET", Some("billing.test"), "/health", None));
        let invoices = body_of(registry.resolve("GET", Some("billing.test"), "/invoices", None));
        assert_eq!(health, Some(json!("ok")));
        assert_eq!(invoices, Some(json!("invoices")));

        // rules under another host are never reached without its Host header
        assert!(matches!(
            registry.resolve("GET", None, "/invoices", None),
            Resolution::NoRoute
        ));
    }

    #[test]
    fn test_legacy_signatures() {
        let mut registry = Registry::new(HOST, QuerySignature::Legacy);
        let signature = registry
            .register(&Interaction::new(
                get("/api/users").with_query_param("id", 1),
                ResponseDescriptor::json("user 1"),
            ))
            .unwrap();
        assert_eq!(signature.as_str(), "mock-service.test/api/users?id=1");

        let body = body_of(registry.resolve("GET", None, "/api/users", Some("id=1")));
        assert_eq!(body, Some(json!("user 1")));

        registry
            .register(&Interaction::new(
                get("/api/search").with_query_param("a", 1).with_query_param("b", 2),
                ResponseDescriptor::json("found"),
            ))
            .unwrap();
        // the undelimited declared key never equals a real multi-param query
        assert!(matches!(
            registry.resolve("GET", None, "/api/search", Some("a=1&b=2")),
            Resolution::UnmatchedQuery { .. }
        ));
    }

    #[test]
    fn test_invalid_interaction_is_rejected() {
        let mut registry = registry();
        let result = registry.register(&Interaction::new(
            get("no-slash"),
            ResponseDescriptor::default(),
        ));
        assert!(matches!(result, Err(MockError::InvalidInteraction(_))));
        assert!(registry.is_empty());
        assert!(registry.rules().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut registry = registry();
        registry
            .register(&Interaction::new(get("/api/hello"), ResponseDescriptor::json("hi")))
            .unwrap();
        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.rules().is_empty());
        assert!(matches!(
            registry.resolve("GET", None, "/api/hello", None),
            Resolution::NoRoute
        ));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
    }
}
