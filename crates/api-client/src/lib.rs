// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Transport traits and utilities for outbound indexer requests
//!
//! This crate provides the seam between the routing layer and whatever issues
//! the actual HTTP call, so routing policy can be exercised without a network.
//!
//! # Core Abstractions
//!
//! - **`Transport` Trait**: sends a JSON body with injected headers and returns the parsed JSON reply
//! - **Health Status**: `Up`, `Degraded` and `Down` reporting shared by registries and servers
//! - **Error Handling**: `ApiError` classifies failures into retryable and permanent ones
//! - **Envelope Inspection**: detects protocol-level error payloads in successful replies

use thiserror::Error;

pub mod health;
pub mod types;

pub use health::*;
pub use types::*;

/// Generic trait for outbound request transports
///
/// Implementations must honor their own hard timeout and surface it as
/// [`ApiError::Timeout`].
pub trait Transport: Send + Sync {
    /// Send a request and return the parsed JSON body
    ///
    /// # Errors
    ///
    /// Returns an error on connection failure, timeout, a non-2xx status or a
    /// body that is not valid JSON
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<serde_json::Value, ApiError>> + Send;
}

/// Common errors that can occur when talking to an indexer or auth service
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ApiError {
    /// Connection-level failure
    #[error("HTTP request failed: {message}")]
    Http { message: String },

    /// The remote answered with a non-success status
    #[error("Unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    /// Authentication failed
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Invalid response format
    #[error("Invalid response format: {message}")]
    InvalidResponse { message: String },

    /// Service unavailable
    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// Hard timeout on the call
    #[error("Request timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

impl ApiError {
    /// Create an HTTP error
    pub fn http<T: ToString>(message: T) -> Self {
        Self::Http {
            message: message.to_string(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response<T: ToString>(message: T) -> Self {
        Self::InvalidResponse {
            message: message.to_string(),
        }
    }

    /// Create an error from a non-success status code
    pub fn from_status<T: ToString>(status: u16, message: T) -> Self {
        match status {
            401 | 403 => Self::Authentication {
                message: message.to_string(),
            },
            503 => Self::ServiceUnavailable {
                message: message.to_string(),
            },
            _ => Self::Status {
                status,
                message: message.to_string(),
            },
        }
    }

    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } | Self::Timeout { .. } | Self::ServiceUnavailable { .. } => true,
            Self::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Authentication { .. } | Self::InvalidResponse { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            ApiError::from_status(401, "nope"),
            ApiError::Authentication { .. }
        ));
        assert!(matches!(
            ApiError::from_status(503, "busy"),
            ApiError::ServiceUnavailable { .. }
        ));
        assert!(matches!(
            ApiError::from_status(404, "missing"),
            ApiError::Status { status: 404, .. }
        ));
    }

    #[test]
    fn retry_classification() {
        assert!(ApiError::http("connection reset").is_retryable());
        assert!(ApiError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(ApiError::from_status(502, "bad gateway").is_retryable());
        assert!(ApiError::from_status(429, "slow down").is_retryable());

        assert!(!ApiError::from_status(400, "bad request").is_retryable());
        assert!(!ApiError::from_status(401, "unauthorized").is_retryable());
        assert!(!ApiError::invalid_response("not json").is_retryable());
        assert!(!ApiError::from_status(403, "forbidden").is_retryable());
    }

    #[test]
    fn error_display() {
        let error = ApiError::Timeout { timeout_ms: 10_000 };
        assert_eq!(error.to_string(), "Request timeout after 10000 ms");

        let error = ApiError::from_status(500, "boom");
        assert_eq!(error.to_string(), "Unexpected status 500: boom");
    }
}
