// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Provider scoring for indexer request routing
//!
//! This crate turns raw health-check samples (chain heights, request latencies) and
//! request outcomes into normalized weights kept in a [`ScoreStore`].
//!
//! # Architecture
//!
//! - **Curves**: [`curve`] - range mapping, median and nearest-rank percentile
//! - **Store**: [`store`] - key/value weight storage with an in-memory implementation
//! - **Engine**: [`engine::ScoringEngine`] - block, latency and health weighting
//!
//! All computation is deterministic and performs no network I/O. Weight
//! updates run out of band; readers get a cheap lookup that defaults to `1`.

pub mod curve;
pub mod engine;
pub mod error;
pub mod store;

pub use curve::{CurveType, median, percentile, score_map};
pub use engine::{
    AGREEMENT_LATENCY_WEIGHT_THRESHOLDS, BLOCK_WEIGHT_OUTPUT_RANGE, FailureClass, LatencySample,
    LatencyWeights, PLAN_LATENCY_WEIGHT_THRESHOLDS, ScoringEngine,
};
pub use error::{ScoreError, ScoreResult};
pub use store::{MemoryScoreStore, Metric, ScoreKey, ScoreStore};
