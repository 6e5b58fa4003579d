// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics module
//!
//! Global metrics on the default Prometheus registry, a [`RoutingObserver`]
//! feeding them from the routing layer, and an Axum metrics handler.

use std::sync::LazyLock;

use axum::{
    http::{StatusCode, header},
    response::Response,
};
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};
use provider_routing::{RegistrySummary, RoutingError, RoutingObserver};
use scoring::FailureClass;

use crate::error::{GatewayError, GatewayResult};

/// Routed requests, labeled by outcome
pub static ROUTED_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "indexer_router_requests_total",
        "Total number of routed requests, labeled by outcome",
        &["outcome"]
    )
    .expect("Failed to create indexer_router_requests_total counter vec")
});

/// Duration of routed requests in seconds
pub static ROUTED_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "indexer_router_request_duration",
        "Routed request durations in seconds",
        &["outcome"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to create routed request duration histogram")
});

/// Indexer failures that cost a health penalty
pub static PROVIDER_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "indexer_router_provider_failures_total",
        "Total number of penalized indexer failures, labeled by class",
        &["class"]
    )
    .expect("Failed to create provider failures counter vec")
});

/// Requests switched to the fallback endpoint
pub static FALLBACK_SWITCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "indexer_router_fallback_total",
        "Total number of requests sent to the fallback endpoint, labeled by cause",
        &["cause"]
    )
    .expect("Failed to create fallback counter vec")
});

/// Orders in the current registry snapshot
pub static REGISTRY_ORDERS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "indexer_router_registry_orders",
        "Orders in the current registry snapshot, labeled by order type",
        &["order_type"]
    )
    .expect("Failed to create registry orders gauge")
});

/// Outcome label of a routed request
pub fn outcome_label(result: Result<bool, &GatewayError>) -> &'static str {
    match result {
        Ok(false) => "indexer",
        Ok(true) => "fallback",
        Err(GatewayError::Routing(RoutingError::NoEndpoint)) => "no_endpoint",
        Err(GatewayError::Routing(RoutingError::Cancelled)) => "cancelled",
        Err(_) => "exhausted",
    }
}

/// Count a routed request and its duration
pub fn record_routed_request(outcome: &str, duration_secs: f64) {
    ROUTED_REQUESTS.with_label_values(&[outcome]).inc();
    ROUTED_REQUEST_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Publish the size of the registry snapshot
pub fn update_registry_metrics(summary: &RegistrySummary) {
    REGISTRY_ORDERS
        .with_label_values(&["agreement"])
        .set(i64::try_from(summary.agreements).unwrap_or(i64::MAX));
    REGISTRY_ORDERS
        .with_label_values(&["plan"])
        .set(i64::try_from(summary.plans).unwrap_or(i64::MAX));
}

fn fallback_cause(error: &RoutingError) -> &'static str {
    match error {
        RoutingError::DiscoveryUnavailable { .. } | RoutingError::NoProviderAvailable { .. } => {
            "selection"
        }
        RoutingError::Credential { .. } => "credential",
        RoutingError::Application { .. } => "application",
        _ => "network",
    }
}

/// Routing observer backed by the global Prometheus registry
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusObserver;

impl RoutingObserver for PrometheusObserver {
    fn provider_failed(&self, _runner: &str, class: FailureClass) {
        PROVIDER_FAILURES.with_label_values(&[class.as_str()]).inc();
    }

    fn fallback_used(&self, cause: &RoutingError) {
        FALLBACK_SWITCHES
            .with_label_values(&[fallback_cause(cause)])
            .inc();
    }
}

/// Axum handler that exports metrics in Prometheus text format
pub async fn metrics_handler() -> GatewayResult<Response<String>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| GatewayError::Metrics {
            message: e.to_string(),
        })?;
    let body = String::from_utf8(buffer).map_err(|e| GatewayError::Metrics {
        message: e.to_string(),
    })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(body)
        .map_err(|e| GatewayError::Metrics {
            message: e.to_string(),
        })
}
