//! Request matching primitives.
//!
//! Path patterns with templated segments, query-string parsing and the
//! signature builders used as registry keys.

use crate::config::{QueryParams, QuerySignature};
use crate::error::MockError;
use std::collections::HashMap;
use std::fmt;

/// Canonical lookup key: host + path + query part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn new(host: &str, path: &str, query: &str) -> Self {
        Self(format!("{}{}{}", host, path, query))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A declared path, split into literal and parameter segments.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

impl PathPattern {
    /// Parse a path such as `/users/{id}` or `/users/:id/posts`.
    pub fn parse(path: &str) -> Result<Self, MockError> {
        let mut segments = Vec::new();

        for part in path.split('/').skip(1) {
            let name = part
                .strip_prefix('{')
                .and_then(|p| p.strip_suffix('}'))
                .or_else(|| part.strip_prefix(':'));

            match name {
                Some("") => {
                    return Err(MockError::InvalidInteraction(format!(
                        "empty path parameter name in {}",
                        path
                    )));
                }
                Some(name) => segments.push(PathSegment::Param(name.to_string())),
                None => segments.push(PathSegment::Literal(part.to_string())),
            }
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    /// The path exactly as declared.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains at least one parameter segment.
    pub fn is_templated(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, PathSegment::Param(_)))
    }

    /// Match a concrete request path, returning captured parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').skip(1).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                PathSegment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                PathSegment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), percent_decode(part, false));
                }
            }
        }

        Some(params)
    }
}

/// Query part of a signature for declared parameters.
pub fn declared_query(params: &QueryParams, mode: QuerySignature) -> String {
    match mode {
        QuerySignature::Legacy => {
            let mut query = String::from("?");
            for (key, value) in params.iter() {
                query.push_str(key);
                query.push('=');
                query.push_str(value);
            }
            query
        }
        // declared values are raw, only request queries get decoded
        QuerySignature::Canonical => {
            canonical_query(params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        }
    }
}

/// Query part of a signature for a real request's query string.
pub fn request_query(query_string: Option<&str>, mode: QuerySignature) -> String {
    let query_string = query_string.unwrap_or("");
    match mode {
        QuerySignature::Legacy => {
            if query_string.is_empty() {
                String::new()
            } else {
                format!("?{}", query_string)
            }
        }
        QuerySignature::Canonical => canonical_query(parse_query_string(query_string)),
    }
}

fn canonical_query(mut pairs: Vec<(String, String)>) -> String {
    pairs.sort();
    let joined = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", escape_component(k), escape_component(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("?{}", joined)
}

/// Parse a query string into decoded key-value pairs, keeping order and duplicates.
pub fn parse_query_string(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (decode_component(key), decode_component(value)),
            None => (decode_component(part), String::new()),
        })
        .collect()
}

/// Percent-decode a query component, treating `+` as a space.
fn decode_component(s: &str) -> String {
    percent_decode(s, true)
}

/// Percent-decode `s`. `+` becomes a space only in form-encoded (query) input.
fn percent_decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                decoded.push(b' ');
                i += 1;
            }
            b => {
                decoded.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

/// Escape the characters that would make a canonical pair ambiguous.
fn escape_component(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            '&' => escaped.push_str("%26"),
            '=' => escaped.push_str("%3D"),
            '+' => escaped.push_str("%2B"),
            '#' => escaped.push_str("%23"),
            ' ' => escaped.push_str("%20"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
