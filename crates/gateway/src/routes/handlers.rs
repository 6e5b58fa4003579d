// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP request handlers module
//!
//! GraphQL queries are forwarded through the routing link; shutdown of the
//! gateway cancels queries that are still between attempts.

use std::time::Instant;

use axum::{
    Json,
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{GatewayError, GatewayResult},
    extractors::JsonExtractor,
    metrics::{outcome_label, record_routed_request},
    state::GatewayState,
};

/// Header naming the indexer that answered, or `fallback`
pub const ROUTED_BY_HEADER: HeaderName = HeaderName::from_static("x-routed-by");

/// Health check endpoint handler
///
/// Answers `503` while the last discovery refresh has failed.
pub async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let health = state.health_check().await;
    let status = if health.status.is_available() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

/// GraphQL request forwarded to indexers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLRequest {
    /// Query document
    pub query: String,
    /// Query variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    /// Operation to run when the document holds several
    #[serde(
        default,
        rename = "operationName",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    /// Validates that the request carries a query
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.query.trim().is_empty() {
            return Err("query cannot be empty");
        }
        Ok(())
    }
}

/// Forward a GraphQL query to the fronted project
pub async fn graphql_handler(
    State(state): State<GatewayState>,
    JsonExtractor(request): JsonExtractor<GraphQLRequest>,
) -> GatewayResult<impl IntoResponse> {
    request
        .validate()
        .map_err(|e| GatewayError::ValidationError(e.to_string()))?;

    let body = serde_json::to_value(&request).map_err(|e| GatewayError::JsonError {
        message: e.to_string(),
    })?;

    let started = Instant::now();
    let result = state
        .link()
        .execute_with_cancellation(body, &state.cancellation_token)
        .await
        .map_err(GatewayError::from);
    let elapsed = started.elapsed().as_secs_f64();

    let outcome = outcome_label(result.as_ref().map(|routed| routed.fallback));
    record_routed_request(outcome, elapsed);

    let routed = result.inspect_err(|e| warn!(error = %e, "query not served"))?;
    debug!(
        endpoint = %routed.endpoint,
        attempts = routed.attempts,
        fallback = routed.fallback,
        "query served"
    );

    let routed_by = routed.runner.as_deref().unwrap_or("fallback");
    let routed_by = HeaderValue::from_str(routed_by)
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
    Ok(([(ROUTED_BY_HEADER, routed_by)], Json(routed.body)))
}
