// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Routes module

pub mod handlers;

use axum::{
    Router,
    routing::{get, post},
};
use handlers::{graphql_handler, health_handler};

use crate::{metrics::metrics_handler, state::GatewayState};

/// Create gateway routes
pub fn create_routes() -> Router<GatewayState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/graphql", post(graphql_handler))
}
