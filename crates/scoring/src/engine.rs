// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Scoring engine
//!
//! Turns health-check samples into block and latency weights, and request outcomes
//! into health weights, all written to a [`ScoreStore`]. Reads never fail:
//! a missing or unreadable weight counts as `1`.

use std::sync::Arc;

use shared_types::OrderType;
use tracing::{debug, info, warn};

use crate::{
    curve::{CurveType, median, score_map},
    error::ScoreResult,
    store::{ScoreKey, ScoreStore},
};

/// Output range of the block freshness weight
pub const BLOCK_WEIGHT_OUTPUT_RANGE: (f64, f64) = (0.2, 1.0);

/// `(threshold_ms, weight)` pairs for flex plan traffic, highest threshold first
pub const PLAN_LATENCY_WEIGHT_THRESHOLDS: [(f64, f64); 5] = [
    (2_000.0, 0.2),
    (1_000.0, 0.5),
    (500.0, 1.0),
    (300.0, 3.0),
    (0.0, 6.0),
];

/// `(threshold_ms, weight)` pairs for agreement traffic, highest threshold first
pub const AGREEMENT_LATENCY_WEIGHT_THRESHOLDS: [(f64, f64); 5] = [
    (2_000.0, 0.2),
    (1_000.0, 0.5),
    (500.0, 1.0),
    (300.0, 6.0),
    (0.0, 12.0),
];

const DEFAULT_WEIGHT: f64 = 1.0;
const MIN_HEALTH_WEIGHT: f64 = 0.1;

/// Class of a failed request, selecting the health penalty applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Connection failure, timeout or non-2xx status
    Network,
    /// Well-formed reply carrying a protocol error payload
    Application,
}

impl FailureClass {
    /// Multiplier applied to the current health weight
    pub const fn penalty_factor(self) -> f64 {
        match self {
            Self::Network => 0.5,
            Self::Application => 0.8,
        }
    }

    /// Label used in logs and metrics
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Application => "application",
        }
    }
}

/// One health-check result for one indexer
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    /// Indexer address
    pub runner: String,
    /// Reported chain height, `0` when unknown
    pub height: u64,
    /// Height as reported before normalization, for logging
    pub raw_height: u64,
    /// Recent request latencies in milliseconds
    pub latencies: Vec<f64>,
}

impl LatencySample {
    /// Create a sample whose raw height equals its height
    pub fn new(runner: impl Into<String>, height: u64, latencies: Vec<f64>) -> Self {
        Self {
            runner: runner.into(),
            height,
            raw_height: height,
            latencies,
        }
    }
}

/// Latency weights written for one indexer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyWeights {
    /// Weight for flex plan traffic
    pub plan: f64,
    /// Weight for agreement traffic
    pub agreement: f64,
}

/// Block weight of `height` within `[min, max]`, floored to one decimal
#[allow(clippy::cast_precision_loss)]
pub fn block_weight_for(height: u64, min: u64, max: u64) -> f64 {
    let weight = score_map(
        height as f64,
        (min as f64, max as f64),
        BLOCK_WEIGHT_OUTPUT_RANGE,
        CurveType::Quadratic,
    );
    (weight * 10.0).floor() / 10.0
}

/// Weight of the first threshold the median meets or exceeds
///
/// A missing or zero median gets the baseline weight `1`.
pub fn latency_weight_for(median: Option<f64>, thresholds: &[(f64, f64)]) -> f64 {
    let Some(median) = median.filter(|m| *m > 0.0) else {
        return DEFAULT_WEIGHT;
    };

    thresholds
        .iter()
        .find(|(threshold, _)| median >= *threshold)
        .map_or(DEFAULT_WEIGHT, |(_, weight)| *weight)
}

/// Computes provider weights and keeps them in a score store
#[derive(Debug)]
pub struct ScoringEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for ScoringEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ScoreStore> ScoringEngine<S> {
    /// Create an engine writing to `store`
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Recompute block freshness weights for a batch of indexers
    ///
    /// The range spans the lowest non-zero height to the highest height of
    /// the batch, so an indexer reporting no height lands on the floor.
    ///
    /// # Errors
    ///
    /// Returns an error if a weight cannot be written
    pub async fn update_block_weights(
        &self,
        deployment_id: &str,
        samples: &[LatencySample],
    ) -> ScoreResult<Vec<(String, f64)>> {
        let min_height = samples
            .iter()
            .map(|s| s.height)
            .filter(|h| *h > 0)
            .min()
            .unwrap_or(u64::MAX);
        let max_height = samples.iter().map(|s| s.height).max().unwrap_or(0);

        let mut weights = Vec::with_capacity(samples.len());
        for sample in samples {
            let weight = block_weight_for(sample.height, min_height, max_height);
            self.store
                .set(&ScoreKey::block(&sample.runner, deployment_id), weight)
                .await?;

            debug!(
                deployment = deployment_id,
                min_height,
                max_height,
                runner = %sample.runner,
                raw_height = sample.raw_height,
                height = sample.height,
                weight,
                "set block weight"
            );
            info!(
                kind = "updateScore",
                target = "blockWeight",
                deployment = deployment_id,
                runner = %sample.runner,
                to = weight,
            );
            weights.push((sample.runner.clone(), weight));
        }

        Ok(weights)
    }

    /// Recompute latency weights for both traffic classes
    ///
    /// # Errors
    ///
    /// Returns an error if a weight cannot be written
    pub async fn update_latency_weights(
        &self,
        deployment_id: &str,
        samples: &[LatencySample],
    ) -> ScoreResult<Vec<(String, LatencyWeights)>> {
        let mut weights = Vec::with_capacity(samples.len());
        for sample in samples {
            let median_ms = median(&sample.latencies);
            let computed = LatencyWeights {
                plan: latency_weight_for(median_ms, &PLAN_LATENCY_WEIGHT_THRESHOLDS),
                agreement: latency_weight_for(median_ms, &AGREEMENT_LATENCY_WEIGHT_THRESHOLDS),
            };

            self.store
                .set(
                    &ScoreKey::latency(OrderType::FlexPlan, &sample.runner, deployment_id),
                    computed.plan,
                )
                .await?;
            self.store
                .set(
                    &ScoreKey::latency(OrderType::Agreement, &sample.runner, deployment_id),
                    computed.agreement,
                )
                .await?;

            debug!(
                deployment = deployment_id,
                runner = %sample.runner,
                median_ms = ?median_ms,
                plan = computed.plan,
                agreement = computed.agreement,
                "set latency weights"
            );
            info!(
                kind = "updateScore",
                target = "latencyWeight",
                deployment = deployment_id,
                runner = %sample.runner,
                to_plan = computed.plan,
                to_agreement = computed.agreement,
            );
            weights.push((sample.runner.clone(), computed));
        }

        Ok(weights)
    }

    /// Block freshness weight, `1` when unknown
    pub async fn block_weight(&self, runner: &str, deployment_id: &str) -> f64 {
        self.read(&ScoreKey::block(runner, deployment_id)).await
    }

    /// Latency weight for a traffic class, flex plan when unspecified
    pub async fn latency_weight(
        &self,
        runner: &str,
        deployment_id: &str,
        order_type: Option<OrderType>,
    ) -> f64 {
        let order_type = order_type.unwrap_or(OrderType::FlexPlan);
        self.read(&ScoreKey::latency(order_type, runner, deployment_id))
            .await
    }

    /// Health weight, `1` when the indexer has no recorded failures
    pub async fn health_weight(&self, runner: &str, deployment_id: &str) -> f64 {
        self.read(&ScoreKey::health(runner, deployment_id)).await
    }

    /// Combined weight of an order: block x latency x health
    pub async fn order_weight(
        &self,
        runner: &str,
        deployment_id: &str,
        order_type: OrderType,
    ) -> f64 {
        let block = self.block_weight(runner, deployment_id).await;
        let latency = self
            .latency_weight(runner, deployment_id, Some(order_type))
            .await;
        let health = self.health_weight(runner, deployment_id).await;
        block * latency * health
    }

    /// Apply one health penalty and return the new health weight
    ///
    /// # Errors
    ///
    /// Returns an error if the weight cannot be written
    pub async fn record_failure(
        &self,
        runner: &str,
        deployment_id: &str,
        class: FailureClass,
    ) -> ScoreResult<f64> {
        let key = ScoreKey::health(runner, deployment_id);
        let current = self.read(&key).await;
        let updated = (current * class.penalty_factor()).max(MIN_HEALTH_WEIGHT);
        self.store.set(&key, updated).await?;

        info!(
            kind = "updateScore",
            target = "healthWeight",
            deployment = deployment_id,
            runner,
            class = class.as_str(),
            from = current,
            to = updated,
        );
        Ok(updated)
    }

    /// Restore the health weight after a successful request
    ///
    /// # Errors
    ///
    /// Returns an error if the weight cannot be written
    #[allow(clippy::float_cmp)]
    pub async fn record_success(&self, runner: &str, deployment_id: &str) -> ScoreResult<()> {
        let key = ScoreKey::health(runner, deployment_id);
        if self.read(&key).await != DEFAULT_WEIGHT {
            debug!(runner, deployment = deployment_id, "restoring health weight");
            self.store.set(&key, DEFAULT_WEIGHT).await?;
        }
        Ok(())
    }

    async fn read(&self, key: &ScoreKey) -> f64 {
        match self.store.get(key).await {
            Ok(value) => value.unwrap_or(DEFAULT_WEIGHT),
            Err(e) => {
                warn!(key = %key, error = %e, "score lookup failed, using default weight");
                DEFAULT_WEIGHT
            }
        }
    }
}
