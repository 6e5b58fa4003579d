// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Gateway configuration
//!
//! Server settings plus the [`RoutingConfig`] of the project the gateway
//! fronts, loaded hierarchically with the `config` crate.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment as ConfigEnv, File};
use provider_routing::RoutingConfig;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

const MAX_TIMEOUT_SECONDS: u64 = 300;
const TESTING_TIMEOUT_SECONDS: u64 = 10;

/// Listen port; `0` (OS-assigned) is only accepted when testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ServerPort(u16);

impl ServerPort {
    /// Check the port against the environment it is deployed in
    ///
    /// # Errors
    ///
    /// Returns an error for port 0 outside the testing environment
    pub fn checked(self, environment: Environment) -> Result<Self> {
        ensure!(
            self.0 != 0 || environment == Environment::Testing,
            "port cannot be 0 in non-testing environments"
        );
        Ok(self)
    }

    /// Port number
    pub fn value(self) -> u16 {
        self.0
    }
}

/// Inbound request timeout, between 1 and 300 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u64")]
pub struct TimeoutSeconds(Duration);

impl TryFrom<u64> for TimeoutSeconds {
    type Error = anyhow::Error;

    fn try_from(seconds: u64) -> Result<Self> {
        ensure!(seconds != 0, "timeout must be greater than 0");
        ensure!(
            seconds <= MAX_TIMEOUT_SECONDS,
            "timeout cannot exceed {MAX_TIMEOUT_SECONDS}"
        );
        Ok(Self(Duration::from_secs(seconds)))
    }
}

impl TimeoutSeconds {
    /// Timeout as a duration
    pub fn value(self) -> Duration {
        self.0
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production environment
    Production,
    /// Development environment
    Development,
    /// Testing environment
    Testing,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Production => "production",
            Environment::Development => "development",
            Environment::Testing => "testing",
        };
        f.write_str(name)
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address
    pub host: IpAddr,
    /// Listen port (validated for environment compatibility)
    pub port: ServerPort,
    /// Timeout of one inbound request (validated range: 1-300)
    pub timeout_seconds: TimeoutSeconds,
    /// Environment type
    pub environment: Environment,
    /// Routing of the fronted project
    pub routing: RoutingConfig,
}

impl GatewayConfig {
    /// Load configuration from files and environment variables
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if configuration is invalid or cannot be loaded.
    pub fn from_env() -> GatewayResult<Self> {
        let config = Self::load().map_err(|e| GatewayError::Config {
            message: format!("failed to load configuration: {e}"),
        })?;
        config.routing.validate()?;
        Ok(config)
    }

    /// Load configuration using the config crate with hierarchical sources
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. `gateway.json`
    /// 3. `gateway.{env}.json`
    /// 4. Environment variables, e.g. `GATEWAY_ROUTING__RESOURCE_ID`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let env_var = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut config_builder = Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 4000)?
            .set_default("timeout_seconds", 60)?
            .set_default("environment", "development")?
            .set_default("routing.resource_type", "deployment")?
            .add_source(File::with_name("gateway.json").required(false))
            .add_source(
                File::with_name(&format!("gateway.{}.json", env_var.to_lowercase()))
                    .required(false),
            )
            .add_source(
                ConfigEnv::with_prefix("GATEWAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if std::env::var("ENVIRONMENT").is_ok() {
            config_builder = config_builder.set_override("environment", env_var.to_lowercase())?;
        }

        let mut gateway_config: Self = config_builder.build()?.try_deserialize()?;

        gateway_config.port = gateway_config
            .port
            .checked(gateway_config.environment)
            .map_err(|e| ConfigError::Message(format!("invalid port configuration: {e}")))?;

        Ok(gateway_config)
    }

    /// Configuration for tests: OS-assigned port on localhost
    pub fn for_testing(routing: RoutingConfig) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: ServerPort(0),
            timeout_seconds: TimeoutSeconds(Duration::from_secs(TESTING_TIMEOUT_SECONDS)),
            environment: Environment::Testing,
            routing,
        }
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port.value())
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    #[test]
    fn timeout_validation() {
        assert!(TimeoutSeconds::try_from(0).is_err());
        assert!(TimeoutSeconds::try_from(400).is_err());
        assert!(TimeoutSeconds::try_from(1).is_ok());
        assert!(TimeoutSeconds::try_from(300).is_ok());
        assert!(serde_json::from_value::<TimeoutSeconds>(serde_json::json!(0)).is_err());
    }

    #[test]
    fn server_port_validation() {
        assert!(ServerPort(0).checked(Environment::Testing).is_ok());
        assert!(ServerPort(0).checked(Environment::Development).is_err());
        assert!(ServerPort(0).checked(Environment::Production).is_err());
        assert!(ServerPort(4000).checked(Environment::Production).is_ok());
    }

    #[test]
    fn deserializes_nested_routing() {
        let config: GatewayConfig = serde_json::from_value(serde_json::json!({
            "host": "0.0.0.0",
            "port": 8080,
            "timeout_seconds": 30,
            "environment": "production",
            "routing": {
                "auth_url": "https://auth.example",
                "resource_id": "QmProject",
                "resource_type": "deployment",
                "max_retries": 2
            }
        }))
        .unwrap();

        assert_eq!(config.port.value(), 8080);
        assert_eq!(config.timeout_seconds.value(), Duration::from_secs(30));
        assert_eq!(config.routing.max_retries, 2);
        assert_eq!(config.routing.refresh_interval_ms, 300_000);
    }

    #[test]
    fn testing_config_binds_ephemeral_port() {
        let routing = RoutingConfig::new(
            Url::parse("http://127.0.0.1:1").unwrap(),
            "QmProject",
            "deployment".parse().unwrap(),
        );
        let config = GatewayConfig::for_testing(routing);
        assert_eq!(config.socket_addr().port(), 0);
        assert_eq!(config.environment.to_string(), "testing");
    }
}
