// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Agreement credentials
//!
//! An agreement request carries a bearer token. The token held by an order
//! is inspected before every request:
//!
//! ```text
//! NoToken ──request──▶ Valid ──expiry──▶ Expired ──request──▶ Valid …
//! ```
//!
//! Requesting a token either signs an EIP-712 message with the configured
//! key or, without a key, asks the auth service to vouch for the consumer.
//! A failed request is returned to the caller and never retried here.

use std::sync::Arc;

use alloy_primitives::{U256, hex};
use api_client::{Transport, TransportRequest};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};
use shared_types::{ChannelState, Order};
use tracing::{debug, instrument};

use crate::{
    channel::ChannelClient,
    config::RoutingConfig,
    eip712::{
        ConsumerMessage, IndexerMessage, LocalSigner, MessageSigner, parse_address, sign_typed,
    },
    error::{RoutingError, RoutingResult},
};

// Numeric expiries above this are milliseconds rather than seconds
const MILLISECOND_EXPIRY_THRESHOLD: i64 = 10_000_000_000;

/// Lifecycle state of an agreement token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    /// The order carries no token
    NoToken,
    /// The token expires in the future
    Valid {
        /// Bearer token
        token: String,
        /// Decoded expiry
        expires_at: DateTime<Utc>,
    },
    /// The token is past its expiry or its expiry cannot be read
    Expired {
        /// Bearer token
        token: String,
    },
}

impl TokenState {
    /// Classify a token at `now`
    pub fn inspect(token: Option<&str>, now: DateTime<Utc>) -> Self {
        match token.filter(|t| !t.is_empty()) {
            None => Self::NoToken,
            Some(token) => match token_expiry(token) {
                Some(expires_at) if expires_at > now => Self::Valid {
                    token: token.to_string(),
                    expires_at,
                },
                _ => Self::Expired {
                    token: token.to_string(),
                },
            },
        }
    }

    /// Whether the token can be used as-is
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::NoToken => "no_token",
            Self::Valid { .. } => "valid",
            Self::Expired { .. } => "expired",
        }
    }
}

/// Decode the `exp` claim of a JWT
///
/// Accepts seconds or milliseconds since the epoch, as a number or a numeric
/// string, an RFC 3339 timestamp or a `YYYY-MM-DD` date.
#[allow(clippy::cast_possible_truncation)]
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;

    match claims.get("exp")? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64))
            .and_then(from_epoch),
        Value::String(s) => parse_expiry_str(s),
        _ => None,
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value > MILLISECOND_EXPIRY_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

fn parse_expiry_str(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return from_epoch(n);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
}

/// Token to attach to an agreement request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementCredential {
    /// Bearer token
    pub token: String,
    /// Whether the token was just issued and should be stored on the order
    pub fresh: bool,
}

impl AgreementCredential {
    /// Value of the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Obtains bearer tokens for agreements and channel states for flex plans
#[derive(Debug)]
pub struct CredentialManager<T> {
    transport: Arc<T>,
    config: RoutingConfig,
    signer: Option<Arc<dyn MessageSigner>>,
    channel: ChannelClient<T>,
}

impl<T: Transport> CredentialManager<T> {
    /// Create a manager, signing with the configured secret key if any
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the secret key is malformed
    pub fn new(transport: Arc<T>, config: RoutingConfig) -> RoutingResult<Self> {
        let signer = match &config.secret_key {
            Some(key) => Some(Arc::new(LocalSigner::from_hex(key)?) as Arc<dyn MessageSigner>),
            None => None,
        };
        Ok(Self::build(transport, config, signer))
    }

    /// Create a manager signing with an external signer
    pub fn with_signer(
        transport: Arc<T>,
        config: RoutingConfig,
        signer: Arc<dyn MessageSigner>,
    ) -> Self {
        Self::build(transport, config, Some(signer))
    }

    fn build(
        transport: Arc<T>,
        config: RoutingConfig,
        signer: Option<Arc<dyn MessageSigner>>,
    ) -> Self {
        let channel = ChannelClient::new(Arc::clone(&transport), config.clone(), signer.clone());
        Self {
            transport,
            config,
            signer,
            channel,
        }
    }

    /// Whether tokens are requested with a signed message
    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    /// Channel client used for flex plans
    pub fn channel(&self) -> &ChannelClient<T> {
        &self.channel
    }

    /// Return the token of an agreement, requesting a new one when needed
    ///
    /// # Errors
    ///
    /// Returns a credential error if a new token cannot be obtained
    #[instrument(skip(self, order), fields(runner = %order.runner, order_id = %order.id))]
    pub async fn agreement_token(&self, order: &Order) -> RoutingResult<AgreementCredential> {
        let state = TokenState::inspect(order.token.as_deref(), Utc::now());
        if let TokenState::Valid { token, .. } = state {
            return Ok(AgreementCredential {
                token,
                fresh: false,
            });
        }

        debug!(state = state.label(), "requesting agreement token");
        let token = self.request_token(order).await?;
        Ok(AgreementCredential { token, fresh: true })
    }

    /// Next signed channel state for a flex plan
    ///
    /// # Errors
    ///
    /// Returns a credential error if the state cannot be obtained
    pub async fn channel_state(&self, plan: &Order) -> RoutingResult<ChannelState> {
        self.channel.next_state(plan).await
    }

    async fn request_token(&self, order: &Order) -> RoutingResult<String> {
        let body = match &self.signer {
            Some(signer) => self.signed_request(signer.as_ref(), order)?,
            None => json!({
                "deploymentId": self.config.resource_id,
                "indexer": order.runner,
            }),
        };

        let url = self.config.central_token_url();
        let reply = self
            .transport
            .send(TransportRequest::new(url.as_str(), body))
            .await
            .map_err(|e| RoutingError::credential(&order.runner, format!("token request: {e}")))?;

        reply
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| RoutingError::credential(&order.runner, "token missing from reply"))
    }

    #[allow(clippy::cast_sign_loss)]
    fn signed_request(&self, signer: &dyn MessageSigner, order: &Order) -> RoutingResult<Value> {
        let timestamp = Utc::now().timestamp_millis().max(0) as u64;
        let indexer = parse_address(&order.runner, &order.runner)?;
        let chain_id = self.config.chain_id;
        let deployment_id = self.config.resource_id.clone();

        let body = match &self.config.consumer {
            Some(consumer) => {
                let message = ConsumerMessage {
                    consumer: parse_address(&order.runner, consumer)?,
                    indexer,
                    agreement: order.id.clone(),
                    timestamp: U256::from(timestamp),
                    deploymentId: deployment_id.clone(),
                };
                let signature = sign_typed(signer, &message, chain_id)?;
                json!({
                    "indexer": order.runner,
                    "consumer": consumer,
                    "agreement": order.id,
                    "timestamp": timestamp,
                    "signature": hex::encode_prefixed(signature.as_bytes()),
                    "deployment_id": deployment_id,
                    "chain_id": chain_id,
                })
            }
            None => {
                let message = IndexerMessage {
                    indexer,
                    timestamp: U256::from(timestamp),
                    deploymentId: deployment_id.clone(),
                };
                let signature = sign_typed(signer, &message, chain_id)?;
                json!({
                    "indexer": order.runner,
                    "timestamp": timestamp,
                    "signature": hex::encode_prefixed(signature.as_bytes()),
                    "deployment_id": deployment_id,
                    "chain_id": chain_id,
                })
            }
        };
        Ok(body)
    }
}
