// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Routing configuration
//!
//! One [`RoutingConfig`] describes one project served by the network: where
//! to discover its orders, how long to wait for indexers, how hard to retry
//! and where to go when every indexer fails.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use shared_types::ProjectType;
use url::Url;

use crate::error::{RoutingError, RoutingResult};

// Routing defaults
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 300_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
const DEFAULT_CHAIN_ID: u64 = 1287;
const MAX_RETRIES_LIMIT: u32 = 10;

fn default_refresh_interval_ms() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

fn default_true() -> bool {
    true
}

/// Configuration of the routing layer for one project
#[derive(Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Base URL of the discovery and authorization service
    pub auth_url: Url,
    /// Project (deployment or dictionary) identifier
    pub resource_id: String,
    /// Kind of project
    pub resource_type: ProjectType,
    /// Interval between discovery refreshes
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Hard timeout of a single outbound call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Same-endpoint retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base of the exponential back-off between same-endpoint retries
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Last-resort endpoint used when no indexer can serve the request
    #[serde(default)]
    pub fallback_url: Option<Url>,
    /// Hex private key; selects the signed token flow when present
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Consumer address included in signed agreement messages
    #[serde(default)]
    pub consumer: Option<String>,
    /// Key appended to discovery requests as `apikey`
    #[serde(default)]
    pub api_key: Option<String>,
    /// Token endpoint of the centrally authenticated flow, `auth_url` when unset
    #[serde(default)]
    pub token_url: Option<Url>,
    /// Chain id of the EIP-712 signing domain
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Whether a protocol error payload switches the request to the fallback
    #[serde(default = "default_true")]
    pub fallback_on_application_error: bool,
}

impl fmt::Debug for RoutingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingConfig")
            .field("auth_url", &self.auth_url.as_str())
            .field("resource_id", &self.resource_id)
            .field("resource_type", &self.resource_type)
            .field("refresh_interval_ms", &self.refresh_interval_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("fallback_url", &self.fallback_url.as_ref().map(Url::as_str))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("consumer", &self.consumer)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("token_url", &self.token_url.as_ref().map(Url::as_str))
            .field("chain_id", &self.chain_id)
            .field(
                "fallback_on_application_error",
                &self.fallback_on_application_error,
            )
            .finish()
    }
}

impl RoutingConfig {
    /// Create a configuration with defaults for everything but the project
    pub fn new(auth_url: Url, resource_id: impl Into<String>, resource_type: ProjectType) -> Self {
        Self {
            auth_url,
            resource_id: resource_id.into(),
            resource_type,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            fallback_url: None,
            secret_key: None,
            consumer: None,
            api_key: None,
            token_url: None,
            chain_id: DEFAULT_CHAIN_ID,
            fallback_on_application_error: true,
        }
    }

    /// Set the fallback endpoint
    #[must_use]
    pub fn with_fallback_url(mut self, fallback_url: Url) -> Self {
        self.fallback_url = Some(fallback_url);
        self
    }

    /// Set the signing key, enabling the signed token flow
    #[must_use]
    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Set the consumer address used in signed agreement messages
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = Some(consumer.into());
        self
    }

    /// Set the discovery API key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the central token endpoint
    #[must_use]
    pub fn with_token_url(mut self, token_url: Url) -> Self {
        self.token_url = Some(token_url);
        self
    }

    /// Set the number of same-endpoint retries
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-call timeout
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the discovery refresh interval
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the base delay between same-endpoint retries
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the EIP-712 domain chain id
    #[must_use]
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Choose whether protocol errors switch to the fallback
    #[must_use]
    pub fn with_fallback_on_application_error(mut self, enabled: bool) -> Self {
        self.fallback_on_application_error = enabled;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::Configuration` if a value is out of range
    pub fn validate(&self) -> RoutingResult<()> {
        if self.resource_id.trim().is_empty() {
            return Err(RoutingError::configuration("resource id cannot be empty"));
        }
        if self.refresh_interval_ms == 0 {
            return Err(RoutingError::configuration(
                "refresh interval must be greater than 0",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(RoutingError::configuration(
                "request timeout must be greater than 0",
            ));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(RoutingError::configuration(format!(
                "max retries cannot exceed {MAX_RETRIES_LIMIT}"
            )));
        }
        if self
            .secret_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(RoutingError::configuration("secret key cannot be empty"));
        }
        Ok(())
    }

    /// Interval between discovery refreshes
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Hard timeout of a single outbound call
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Base delay between same-endpoint retries
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Resolve an absolute path against the discovery service
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::Configuration` if the path cannot be joined
    pub fn service_url(&self, path: &str) -> RoutingResult<Url> {
        self.auth_url
            .join(path)
            .map_err(|e| RoutingError::configuration(format!("invalid service path {path}: {e}")))
    }

    /// Token endpoint of the centrally authenticated flow
    pub fn central_token_url(&self) -> Url {
        self.token_url
            .clone()
            .unwrap_or_else(|| self.auth_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RoutingConfig {
        RoutingConfig::new(
            Url::parse("https://auth.example").unwrap(),
            "QmDeployment",
            ProjectType::Deployment,
        )
    }

    #[test]
    fn defaults() {
        let config = config();
        assert_eq!(config.refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.chain_id, 1287);
        assert!(config.fallback_url.is_none());
        assert!(config.fallback_on_application_error);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut bad = config();
        bad.resource_id = "  ".to_string();
        assert!(bad.validate().is_err());

        let bad = config().with_request_timeout(Duration::ZERO);
        assert!(bad.validate().is_err());

        let bad = config().with_refresh_interval(Duration::ZERO);
        assert!(bad.validate().is_err());

        let bad = config().with_max_retries(50);
        assert!(bad.validate().is_err());

        let bad = config().with_secret_key("");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: RoutingConfig = serde_json::from_value(serde_json::json!({
            "auth_url": "https://auth.example",
            "resource_id": "QmDict",
            "resource_type": "dictionary",
            "fallback_url": "https://fallback.example/query"
        }))
        .unwrap();

        assert_eq!(config.resource_type, ProjectType::Dictionary);
        assert_eq!(config.max_retries, 3);
        assert_eq!(
            config.fallback_url.as_ref().map(Url::as_str),
            Some("https://fallback.example/query")
        );
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = config()
            .with_secret_key("0xdeadbeef")
            .with_api_key("very-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("deadbeef"));
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn service_urls() {
        let config = config();
        assert_eq!(
            config.service_url("/channel/sign").unwrap().as_str(),
            "https://auth.example/channel/sign"
        );
        assert_eq!(config.central_token_url().as_str(), "https://auth.example/");
    }
}
