// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error handling module
//!
//! Gateway errors and their HTTP mapping. Routing failures surface as
//! gateway statuses: no usable endpoint is `503`, an exhausted endpoint is
//! `502`.

use std::net::SocketAddr;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use provider_routing::RoutingError;
use thiserror::Error;

/// Errors raised while serving or starting the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration validation errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Network binding errors
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Socket address that failed to bind
        address: SocketAddr,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server startup errors
    #[error("Server startup failed: {source}")]
    Startup {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server shutdown errors
    #[error("Server shutdown failed: {source}")]
    Shutdown {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Task join errors for async operations
    #[error("Task join error: {source}")]
    TaskJoin {
        /// Underlying tokio join error
        #[source]
        source: tokio::task::JoinError,
    },

    /// Request body could not be read or parsed
    #[error("JSON error: {message}")]
    JsonError {
        /// Error message
        message: String,
    },

    /// Request parsed but is not a usable query
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Metrics could not be encoded
    #[error("Metrics error: {message}")]
    Metrics {
        /// Error message
        message: String,
    },

    /// The routing layer gave up on a request
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// HTTP status reported to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Config { .. }
            | GatewayError::Bind { .. }
            | GatewayError::Startup { .. }
            | GatewayError::Shutdown { .. }
            | GatewayError::TaskJoin { .. }
            | GatewayError::Metrics { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::JsonError { .. } | GatewayError::ValidationError(..) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Routing(error) => match error {
                RoutingError::NoEndpoint | RoutingError::Cancelled => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                RoutingError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));
        (status, body).into_response()
    }
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(source: tokio::task::JoinError) -> Self {
        Self::TaskJoin { source }
    }
}
