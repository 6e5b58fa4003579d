// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Indexer Router Gateway
//!
//! HTTP front for one project served by decentralized indexers. GraphQL
//! queries posted to `/graphql` are routed through
//! [`provider_routing::RoutingLink`]: indexers are rotated, retried and
//! penalized, and a fallback endpoint answers when none of them can.
//!
//! # Module Structure
//!
//! - [`config`]: Gateway configuration with hierarchical loading
//! - [`error`]: Error types and HTTP response mapping
//! - [`extractors`]: JSON body extraction with gateway errors
//! - [`metrics`]: Prometheus metrics and the routing observer feeding them
//! - [`state`]: Shared state holding the routing link and cancellation token
//! - [`server`]: Server lifecycle, order refresh and coordinated shutdown
//! - [`routes`]: Route configuration and handlers

pub mod config;
pub mod error;
pub mod extractors;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{Environment, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use routes::handlers::{GraphQLRequest, ROUTED_BY_HEADER};
pub use server::{Server, ShutdownConfig};
pub use state::{GatewayState, HealthCheck};
