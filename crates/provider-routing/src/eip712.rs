// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! EIP-712 typed messages and signing
//!
//! Indexers accept two signed payloads from the routing layer: token requests
//! (signed on behalf of a consumer or of the indexer itself) and channel
//! state updates for flex plans.

use std::{borrow::Cow, fmt, str::FromStr};

use alloy_primitives::{Address, B256, Signature, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Eip712Domain, SolStruct};

use crate::error::{RoutingError, RoutingResult};

/// Name of the signing domain shared with indexers
pub const DOMAIN_NAME: &str = "Subquery";

mod messages {
    #![allow(missing_docs)]

    alloy_sol_types::sol! {
        struct ConsumerMessage {
            address consumer;
            address indexer;
            string agreement;
            uint256 timestamp;
            string deploymentId;
        }

        struct IndexerMessage {
            address indexer;
            uint256 timestamp;
            string deploymentId;
        }

        struct ChannelUpdate {
            uint256 channelId;
            address indexer;
            address consumer;
            uint256 spent;
            bool isFinal;
        }
    }
}

pub use messages::{ChannelUpdate, ConsumerMessage, IndexerMessage};

/// Signing domain for the given chain
pub fn domain(chain_id: u64) -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Borrowed(DOMAIN_NAME)),
        None,
        Some(U256::from(chain_id)),
        None,
        None,
    )
}

/// Something able to sign EIP-712 digests
pub trait MessageSigner: Send + Sync + fmt::Debug {
    /// Address the signatures recover to
    fn address(&self) -> Address;

    /// Sign a prehashed digest
    ///
    /// # Errors
    ///
    /// Returns an error if the signer rejects the digest
    fn sign_hash(&self, hash: &B256) -> RoutingResult<Signature>;
}

/// Sign a typed message under the routing domain
///
/// # Errors
///
/// Returns an error if the signer fails
pub fn sign_typed<M: SolStruct>(
    signer: &dyn MessageSigner,
    message: &M,
    chain_id: u64,
) -> RoutingResult<Signature> {
    let hash = message.eip712_signing_hash(&domain(chain_id));
    signer.sign_hash(&hash)
}

/// In-process signer backed by a secp256k1 private key
#[derive(Clone)]
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.inner.address())
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Parse a hex private key, with or without `0x`
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::Configuration` if the key is malformed
    pub fn from_hex(key: &str) -> RoutingResult<Self> {
        let inner = PrivateKeySigner::from_str(key.trim())
            .map_err(|e| RoutingError::configuration(format!("invalid secret key: {e}")))?;
        Ok(Self { inner })
    }

    /// Generate a throwaway key
    pub fn random() -> Self {
        Self {
            inner: PrivateKeySigner::random(),
        }
    }
}

impl MessageSigner for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn sign_hash(&self, hash: &B256) -> RoutingResult<Signature> {
        self.inner
            .sign_hash_sync(hash)
            .map_err(|e| RoutingError::credential(self.inner.address(), e))
    }
}

/// Parse an address field coming from the network
///
/// # Errors
///
/// Returns a credential error naming `runner` if the address is malformed
pub fn parse_address(runner: &str, value: &str) -> RoutingResult<Address> {
    Address::from_str(value.trim())
        .map_err(|e| RoutingError::credential(runner, format!("invalid address {value}: {e}")))
}

/// Parse a decimal or `0x` prefixed integer field
///
/// # Errors
///
/// Returns a credential error naming `runner` if the value is malformed
pub fn parse_uint(runner: &str, value: &str) -> RoutingResult<U256> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(value, 10),
    };
    parsed.map_err(|e| RoutingError::credential(runner, format!("invalid integer {value}: {e}")))
}
