// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Weight storage
//!
//! Keys render to the flat string layout used by persistent backends, e.g.
//! `score:block:{runner}_{deployment}` and
//! `score:latency:{orderType}:{runner}_{deployment}`.

use std::fmt;

use dashmap::DashMap;
use shared_types::OrderType;
use tracing::trace;

use crate::error::ScoreResult;

/// Kind of weight stored under a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Chain height freshness
    Block,
    /// Median request latency
    Latency,
    /// Penalties from failed requests
    Health,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Latency => write!(f, "latency"),
            Self::Health => write!(f, "health"),
        }
    }
}

/// Key of a single provider weight
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScoreKey {
    /// Weight kind
    pub metric: Metric,
    /// Order type for metrics tracked per traffic class
    pub order_type: Option<OrderType>,
    /// Indexer address
    pub runner: String,
    /// Deployment the weight applies to
    pub deployment_id: String,
}

impl ScoreKey {
    /// Key of a block freshness weight
    pub fn block(runner: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        Self {
            metric: Metric::Block,
            order_type: None,
            runner: runner.into(),
            deployment_id: deployment_id.into(),
        }
    }

    /// Key of a latency weight for one traffic class
    pub fn latency(
        order_type: OrderType,
        runner: impl Into<String>,
        deployment_id: impl Into<String>,
    ) -> Self {
        Self {
            metric: Metric::Latency,
            order_type: Some(order_type),
            runner: runner.into(),
            deployment_id: deployment_id.into(),
        }
    }

    /// Key of a health weight
    pub fn health(runner: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        Self {
            metric: Metric::Health,
            order_type: None,
            runner: runner.into(),
            deployment_id: deployment_id.into(),
        }
    }
}

impl fmt::Display for ScoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "score:{}:", self.metric)?;
        if let Some(order_type) = self.order_type {
            write!(f, "{order_type}:")?;
        }
        write!(f, "{}_{}", self.runner, self.deployment_id)
    }
}

/// Key/value store for provider weights
///
/// Durability is up to the implementation. Callers only rely on
/// read-after-write consistency from a single writer.
pub trait ScoreStore: Send + Sync {
    /// Read a weight, `None` when absent
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read
    fn get(&self, key: &ScoreKey) -> impl Future<Output = ScoreResult<Option<f64>>> + Send;

    /// Replace a weight
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn set(&self, key: &ScoreKey, value: f64) -> impl Future<Output = ScoreResult<()>> + Send;
}

/// Process-local score store
#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    scores: DashMap<String, f64>,
}

impl MemoryScoreStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored weights
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether no weight has been stored
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Copy of every stored weight keyed by its rendered key, sorted by key
    pub fn entries(&self) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> = self
            .scores
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl ScoreStore for MemoryScoreStore {
    async fn get(&self, key: &ScoreKey) -> ScoreResult<Option<f64>> {
        Ok(self.scores.get(&key.to_string()).map(|value| *value))
    }

    async fn set(&self, key: &ScoreKey, value: f64) -> ScoreResult<()> {
        let key = key.to_string();
        trace!(key = %key, value, "storing score");
        self.scores.insert(key, value);
        Ok(())
    }
}
