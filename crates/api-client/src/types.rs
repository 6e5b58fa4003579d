// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Request and response types exchanged with a [`Transport`](crate::Transport)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying bearer tokens and channel states
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// One outbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRequest {
    /// Target endpoint
    pub url: String,
    /// Headers to inject, keyed by lowercase name
    pub headers: BTreeMap<String, String>,
    /// JSON body
    pub body: Value,
}

impl TransportRequest {
    /// Create a request without headers
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            body,
        }
    }

    /// Add or replace a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Add the given headers, replacing existing ones with the same name
    #[must_use]
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.to_ascii_lowercase(), value);
        }
        self
    }

    /// Get a header by (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Extract the protocol-level error message from a successful reply
///
/// GraphQL replies carry a non-empty `errors` array and JSON-RPC replies an
/// `error` object. Returns `None` when the body is a plain success.
pub fn envelope_error(body: &Value) -> Option<String> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let messages: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str))
            .collect();
        return Some(if messages.is_empty() {
            format!("{} error(s)", errors.len())
        } else {
            messages.join("; ")
        });
    }

    match body.get("error") {
        Some(Value::Null) | None => None,
        Some(error) => Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), ToString::to_string),
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let request = TransportRequest::new("http://localhost", json!({}))
            .with_header("Authorization", "Bearer abc");
        assert_eq!(request.header("authorization"), Some("Bearer abc"));
        assert_eq!(request.header(AUTHORIZATION_HEADER), Some("Bearer abc"));
    }

    #[test]
    fn graphql_errors_are_detected() {
        let body = json!({
            "data": null,
            "errors": [{ "message": "Cannot query field" }, { "message": "second" }]
        });
        assert_eq!(
            envelope_error(&body).as_deref(),
            Some("Cannot query field; second")
        );
    }

    #[test]
    fn json_rpc_error_is_detected() {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32000, "message": "header not found" } });
        assert_eq!(envelope_error(&body).as_deref(), Some("header not found"));
    }

    #[test]
    fn plain_success_has_no_envelope_error() {
        assert!(envelope_error(&json!({ "data": { "x": 1 } })).is_none());
        assert!(envelope_error(&json!({ "data": {}, "errors": [] })).is_none());
        assert!(envelope_error(&json!({ "result": "0x1", "error": null })).is_none());
    }
}
