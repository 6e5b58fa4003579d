// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Shared gateway state
//!
//! The routing link of the fronted project plus the token that coordinates
//! shutdown of in-flight requests.

use std::sync::Arc;

use api_client::HealthStatus;
use provider_routing::{HttpRoutingLink, RegistrySummary};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Environment, GatewayConfig},
    metrics::update_registry_metrics,
};

/// Shared application state with cancellation token support
#[derive(Debug, Clone)]
pub struct GatewayState {
    config: GatewayConfig,
    link: Arc<HttpRoutingLink>,
    /// Cancellation token for coordinated shutdown
    pub cancellation_token: CancellationToken,
}

impl GatewayState {
    /// Create new gateway state
    pub fn new(
        config: GatewayConfig,
        link: Arc<HttpRoutingLink>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            link,
            cancellation_token,
        }
    }

    /// Gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Routing link requests are forwarded through
    pub fn link(&self) -> &Arc<HttpRoutingLink> {
        &self.link
    }

    /// Snapshot of the registry health, after the first discovery completed
    pub async fn health_check(&self) -> HealthCheck {
        let registry = self.link.registry();
        registry.ready().await;
        let summary = registry.summary();
        update_registry_metrics(&summary);

        HealthCheck {
            status: registry.health(),
            version: Box::from(env!("CARGO_PKG_VERSION")),
            environment: self.config.environment,
            timestamp: chrono::Utc::now().to_rfc3339(),
            project: self.config.routing.resource_id.clone(),
            fallback: self.config.routing.fallback_url.is_some(),
            registry: summary,
        }
    }
}

/// Health check status
#[derive(Debug, Serialize)]
pub struct HealthCheck {
    /// Registry status
    pub status: HealthStatus,
    /// Service version
    pub version: Box<str>,
    /// Environment
    pub environment: Environment,
    /// Timestamp
    pub timestamp: String,
    /// Fronted project
    pub project: String,
    /// Whether a fallback endpoint is configured
    pub fallback: bool,
    /// Order counts of the current snapshot
    pub registry: RegistrySummary,
}
