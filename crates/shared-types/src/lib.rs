// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Shared types for indexer request routing
//!
//! This crate provides the wire-level data model shared by the routing,
//! scoring and gateway crates, avoiding circular dependencies.

pub mod channel;
pub mod metadata;
pub mod order;

pub use channel::ChannelState;
pub use metadata::IndexerMetadata;
pub use order::{Order, OrderType, OrdersResponse, ProjectType, ProjectTypeParseError};
