// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Request extractors with gateway error reporting

use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use crate::error::GatewayError;

/// Largest accepted request body
pub const MAX_JSON_PAYLOAD_SIZE: usize = 1024 * 1024;

/// JSON extractor that rejects with [`GatewayError::JsonError`]
#[derive(Debug)]
pub struct JsonExtractor<T>(pub T);

impl<T, S> FromRequest<S> for JsonExtractor<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(content_type) = req.headers().get("content-type")
            && let Ok(content_type_str) = content_type.to_str()
            && !content_type_str.starts_with("application/json")
        {
            return Err(GatewayError::JsonError {
                message: format!(
                    "invalid content-type: expected 'application/json', got '{content_type_str}'"
                ),
            });
        }

        let bytes = axum::body::Bytes::from_request(req, state)
            .await
            .map_err(|rejection| GatewayError::JsonError {
                message: format!("failed to read request body: {rejection}"),
            })?;

        if bytes.len() > MAX_JSON_PAYLOAD_SIZE {
            return Err(GatewayError::JsonError {
                message: format!(
                    "request body too large: {} bytes (max: {MAX_JSON_PAYLOAD_SIZE} bytes)",
                    bytes.len()
                ),
            });
        }

        if bytes.is_empty() {
            return Err(GatewayError::JsonError {
                message: "request body is empty".to_string(),
            });
        }

        serde_json::from_slice::<T>(&bytes)
            .map(JsonExtractor)
            .map_err(|err| {
                let message = if err.is_syntax() {
                    format!(
                        "invalid JSON syntax at line {}, column {}",
                        err.line(),
                        err.column()
                    )
                } else if err.is_eof() {
                    "JSON appears to be truncated".to_string()
                } else {
                    format!("JSON data validation failed: {err}")
                };
                GatewayError::JsonError { message }
            })
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct QueryBody {
        query: String,
    }

    fn request(content_type: &str, body: &'static str) -> Request {
        http::Request::builder()
            .method("POST")
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap()
    }

    async fn extract(content_type: &str, body: &'static str) -> Result<QueryBody, GatewayError> {
        JsonExtractor::<QueryBody>::from_request(request(content_type, body), &())
            .await
            .map(|JsonExtractor(body)| body)
    }

    #[tokio::test]
    async fn parses_json_body() {
        let body = extract("application/json", r#"{"query":"{ a }"}"#)
            .await
            .unwrap();
        assert_eq!(body.query, "{ a }");
    }

    #[tokio::test]
    async fn rejects_wrong_content_type() {
        let err = extract("text/plain", "{}").await.unwrap_err();
        assert!(err.to_string().contains("content-type"));
    }

    #[tokio::test]
    async fn reports_syntax_position() {
        let err = extract("application/json", "{\n  query").await.unwrap_err();
        assert!(matches!(err, GatewayError::JsonError { .. }));
    }

    #[tokio::test]
    async fn rejects_missing_fields() {
        let err = extract("application/json", r#"{"variables":{}}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("validation"));
    }

    #[tokio::test]
    async fn rejects_empty_body() {
        let err = extract("application/json", "").await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
