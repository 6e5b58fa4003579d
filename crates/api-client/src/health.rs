// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Health status types shared by registries and servers

use serde::{Deserialize, Serialize};

/// Health status of a provider registry or upstream dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum HealthStatus {
    /// Operational with candidates to route to
    Up,
    /// Operational but unable to serve every request
    Degraded { reason: String },
    /// Not functional
    Down { reason: String },
}

impl HealthStatus {
    /// Derive a status from the outcome of the last discovery refresh
    ///
    /// An unreachable discovery service is `Down`; a reachable one with no
    /// orders is `Degraded` since only a fallback endpoint can serve traffic.
    pub fn from_discovery(refreshed: bool, order_count: usize) -> Self {
        match (refreshed, order_count) {
            (false, _) => Self::Down {
                reason: "last discovery refresh failed".to_string(),
            },
            (true, 0) => Self::Degraded {
                reason: "no orders available for project".to_string(),
            },
            (true, _) => Self::Up,
        }
    }

    /// Check if this health status indicates the service is available
    pub fn is_available(&self) -> bool {
        matches!(self, HealthStatus::Up | HealthStatus::Degraded { .. })
    }

    /// Check if this health status indicates the service is completely down
    pub fn is_down(&self) -> bool {
        matches!(self, HealthStatus::Down { .. })
    }

    /// Get a human-readable description of the status
    pub fn description(&self) -> &str {
        match self {
            HealthStatus::Up => "Service is healthy",
            HealthStatus::Degraded { reason } | HealthStatus::Down { reason } => reason,
        }
    }
}
