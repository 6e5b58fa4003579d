// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Adaptive request routing across decentralized indexers
//!
//! This crate selects an indexer for each outbound request, attaches the
//! credential that indexer expects, and recovers from failures by retrying
//! the same endpoint and then switching to an operator-configured fallback.
//!
//! # Architecture
//!
//! - **Discovery**: [`discovery`] - fetches agreement and flex plan orders for a project,
//!   or the single indexer assigned to a chain
//! - **Registry**: [`registry::ProviderRegistry`] - owns the order snapshot, rotation and health
//! - **Credentials**: [`auth`], [`channel`], [`eip712`] - bearer tokens and signed channel states
//! - **Transport**: [`transport::HttpTransport`] - JSON over HTTP with a hard timeout
//! - **Routing**: [`routing::RoutingLink`] - bounded retry, health penalties and fallback
//!
//! # Failure handling
//!
//! Every intermediate failure is recovered locally. Callers see either a
//! successful reply or exactly one terminal [`RoutingError`] naming the last
//! endpoint tried.

pub mod auth;
pub mod channel;
pub mod config;
pub mod discovery;
pub mod eip712;
pub mod error;
pub mod registry;
pub mod routing;
pub mod transport;

pub use auth::{AgreementCredential, CredentialManager, TokenState};
pub use channel::ChannelClient;
pub use config::RoutingConfig;
pub use discovery::{HttpDiscovery, OrderDiscovery, PinnedDiscovery};
pub use eip712::{LocalSigner, MessageSigner};
pub use error::{RoutingError, RoutingResult};
pub use registry::{ProviderRegistry, RegistrySummary, RotationCursor};
pub use routing::{
    ChainRoutingLink, HttpRoutingLink, RequestParams, RoutedResponse, RoutingLink, RoutingObserver,
};
pub use transport::HttpTransport;
