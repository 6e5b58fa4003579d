// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for routing operations

use api_client::ApiError;
use scoring::FailureClass;
use shared_types::OrderType;
use thiserror::Error;

/// Result type alias for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Failures raised while selecting, authenticating and calling an indexer
///
/// Only [`RoutingError::NoEndpoint`], [`RoutingError::Exhausted`] and
/// [`RoutingError::Cancelled`] leave [`crate::RoutingLink`]; the other
/// variants describe the cause wrapped by `Exhausted`.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum RoutingError {
    /// The last discovery refresh failed
    #[error("Discovery unavailable: {message}")]
    DiscoveryUnavailable { message: String },

    /// Discovery succeeded but listed no order of the requested type
    #[error("No {order_type} provider available")]
    NoProviderAvailable { order_type: OrderType },

    /// Token or channel signature could not be obtained
    #[error("Credential error for indexer {runner}: {message}")]
    Credential { runner: String, message: String },

    /// Connection failure, timeout or non-2xx reply
    #[error("Transport error from {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: ApiError,
    },

    /// Well-formed reply carrying a protocol error payload
    #[error("Application error from {endpoint}: {message}")]
    Application { endpoint: String, message: String },

    /// No indexer could be selected and no fallback is configured
    #[error("No endpoint available: no indexer selected and no fallback configured")]
    NoEndpoint,

    /// The last attempted endpoint failed
    #[error("Request to {endpoint} failed: {source}")]
    Exhausted {
        endpoint: String,
        #[source]
        source: Box<RoutingError>,
    },

    /// The caller cancelled the request between attempts
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid routing configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl RoutingError {
    /// Create a credential error
    pub fn credential<R: ToString, T: ToString>(runner: R, message: T) -> Self {
        Self::Credential {
            runner: runner.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration<T: ToString>(message: T) -> Self {
        Self::Configuration {
            message: message.to_string(),
        }
    }

    /// Create a discovery error
    pub fn discovery<T: ToString>(message: T) -> Self {
        Self::DiscoveryUnavailable {
            message: message.to_string(),
        }
    }

    /// Wrap the cause of the last failed attempt
    pub fn exhausted(endpoint: impl Into<String>, source: RoutingError) -> Self {
        Self::Exhausted {
            endpoint: endpoint.into(),
            source: Box::new(source),
        }
    }

    /// Whether repeating the call against the same endpoint may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_retryable())
    }

    /// Health penalty class, for failures caused by the indexer itself
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Transport { .. } => Some(FailureClass::Network),
            Self::Application { .. } => Some(FailureClass::Application),
            _ => None,
        }
    }

    /// Whether the error is surfaced to the caller as-is
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoEndpoint | Self::Exhausted { .. } | Self::Cancelled
        )
    }

    /// Whether no indexer was selected, as opposed to a selected one failing
    pub fn is_selection_failure(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryUnavailable { .. } | Self::NoProviderAvailable { .. }
        )
    }
}
