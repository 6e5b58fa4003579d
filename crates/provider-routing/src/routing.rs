// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Retry-then-fallback request routing
//!
//! [`RoutingLink`] runs one logical request:
//!
//! 1. pick the next order from the registry and attach its credential
//! 2. send it, retrying the same endpoint on transient transport failures
//! 3. on failure, apply one health penalty to the indexer and send the
//!    request once to the fallback endpoint, which is never retried
//!
//! The number of calls is bounded by `max_retries + 2`. Cancellation is
//! observed between attempts.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use api_client::{AUTHORIZATION_HEADER, Transport, TransportRequest, envelope_error};
use scoring::{FailureClass, MemoryScoreStore, ScoreStore, ScoringEngine};
use serde::Serialize;
use serde_json::Value;
use shared_types::{Order, OrderType};
use tokio::time::sleep;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::{
    auth::CredentialManager,
    config::RoutingConfig,
    discovery::{HttpDiscovery, OrderDiscovery, PinnedDiscovery},
    error::{RoutingError, RoutingResult},
    registry::ProviderRegistry,
    transport::HttpTransport,
};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Delays between same-endpoint attempts, doubling from `base_ms`
fn retry_delays(base_ms: u64, max_retries: u32) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(base_ms / 2)
        .max_delay(MAX_RETRY_DELAY)
        .map(jitter)
        .take(max_retries as usize)
}

/// Where and how to send the next request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestParams {
    /// Indexer endpoint
    pub url: String,
    /// Headers carrying the credential
    pub headers: BTreeMap<String, String>,
    /// Indexer address
    pub runner: String,
    /// Order type the indexer was selected from
    pub order_type: OrderType,
    /// Selected order
    pub order_id: String,
}

/// Successful reply with routing details
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedResponse {
    /// Parsed reply body
    pub body: Value,
    /// Endpoint that answered
    pub endpoint: String,
    /// Indexer that answered, `None` for the fallback
    pub runner: Option<String>,
    /// Whether the fallback endpoint answered
    pub fallback: bool,
    /// Transport calls made, including the successful one
    pub attempts: u32,
}

/// Hooks for counting routing events
pub trait RoutingObserver: Send + Sync + fmt::Debug {
    /// An indexer failed and was penalized
    fn provider_failed(&self, _runner: &str, _class: FailureClass) {}

    /// The request was switched to the fallback endpoint
    fn fallback_used(&self, _cause: &RoutingError) {}
}

/// Routes requests over discovered indexers with retry and fallback
#[derive(Debug)]
pub struct RoutingLink<T, D, S> {
    registry: Arc<ProviderRegistry<D, S>>,
    credentials: CredentialManager<T>,
    transport: Arc<T>,
    config: RoutingConfig,
    observer: Option<Arc<dyn RoutingObserver>>,
}

/// Routing link over HTTP with in-memory scores
pub type HttpRoutingLink = RoutingLink<HttpTransport, HttpDiscovery, MemoryScoreStore>;

/// Routing link pinned to the indexer the service assigns to a chain
pub type ChainRoutingLink = RoutingLink<HttpTransport, PinnedDiscovery, MemoryScoreStore>;

fn http_transport(config: &RoutingConfig) -> RoutingResult<Arc<HttpTransport>> {
    HttpTransport::new(config.request_timeout())
        .map(Arc::new)
        .map_err(|e| RoutingError::configuration(format!("http transport: {e}")))
}

impl HttpRoutingLink {
    /// Build the HTTP stack for a project
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid or a
    /// client cannot be created
    pub fn from_config(config: RoutingConfig) -> RoutingResult<Self> {
        config.validate()?;

        let transport = http_transport(&config)?;
        let discovery = HttpDiscovery::new(config.clone())?;
        let scoring = ScoringEngine::new(Arc::new(MemoryScoreStore::new()));
        let registry = Arc::new(ProviderRegistry::new(
            discovery,
            scoring,
            config.resource_id.clone(),
            config.refresh_interval(),
        ));
        let credentials = CredentialManager::new(Arc::clone(&transport), config.clone())?;

        Ok(Self::new(registry, credentials, transport, config))
    }
}

impl ChainRoutingLink {
    /// Route every request to the indexer assigned to `chain_id`
    ///
    /// The assigned deployment and network chain id replace the configured
    /// `resource_id` and `chain_id`, so tokens are requested for what the
    /// indexer actually serves.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryUnavailable` if the metadata cannot be fetched or
    /// names no indexer, and a configuration error if the configuration is
    /// invalid
    pub async fn from_chain(mut config: RoutingConfig, chain_id: &str) -> RoutingResult<Self> {
        let metadata = HttpDiscovery::new(config.clone())?
            .fetch_metadata(chain_id)
            .await?;
        let order = metadata.agreement().ok_or_else(|| {
            RoutingError::discovery(format!("no indexer found for chain {chain_id}"))
        })?;

        config.resource_id = metadata.deployment_id;
        config.chain_id = metadata.network_chain_id;
        config.validate()?;
        debug!(
            runner = %order.runner,
            deployment = %config.resource_id,
            "pinned chain indexer"
        );

        let transport = http_transport(&config)?;
        let scoring = ScoringEngine::new(Arc::new(MemoryScoreStore::new()));
        let registry = Arc::new(ProviderRegistry::new(
            PinnedDiscovery::new(order),
            scoring,
            config.resource_id.clone(),
            config.refresh_interval(),
        ));
        let credentials = CredentialManager::new(Arc::clone(&transport), config.clone())?;

        Ok(Self::new(registry, credentials, transport, config))
    }
}

impl<T, D, S> RoutingLink<T, D, S>
where
    T: Transport,
    D: OrderDiscovery,
    S: ScoreStore,
{
    /// Assemble a link from its parts
    pub fn new(
        registry: Arc<ProviderRegistry<D, S>>,
        credentials: CredentialManager<T>,
        transport: Arc<T>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            registry,
            credentials,
            transport,
            config,
            observer: None,
        }
    }

    /// Report routing events to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RoutingObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Registry the link selects from
    pub fn registry(&self) -> &Arc<ProviderRegistry<D, S>> {
        &self.registry
    }

    /// Routing configuration
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Select the next indexer and build its credential headers
    ///
    /// # Errors
    ///
    /// Returns a selection error when no indexer is available and a
    /// credential error when the indexer cannot be authenticated
    pub async fn request_params(&self) -> RoutingResult<RequestParams> {
        let (order_type, order) = self.registry.next_order().await?;
        self.authorize(order_type, order).await
    }

    /// Build the credential headers for a selected order
    async fn authorize(&self, order_type: OrderType, order: Order) -> RoutingResult<RequestParams> {
        let authorization = match order_type {
            OrderType::Agreement => {
                let credential = self.credentials.agreement_token(&order).await?;
                if credential.fresh {
                    self.registry
                        .update_token_by_id(&order.id, credential.token.clone());
                }
                credential.bearer()
            }
            OrderType::FlexPlan => self
                .credentials
                .channel_state(&order)
                .await?
                .to_authorization()
                .map_err(|e| RoutingError::credential(&order.runner, e))?,
        };

        let Order { id, runner, url, .. } = order;
        Ok(RequestParams {
            url,
            headers: BTreeMap::from([(AUTHORIZATION_HEADER.to_string(), authorization)]),
            runner,
            order_type,
            order_id: id,
        })
    }

    /// Route one request
    ///
    /// # Errors
    ///
    /// Returns `NoEndpoint` when nothing could be selected and no fallback is
    /// configured, otherwise `Exhausted` naming the last endpoint tried
    pub async fn execute(&self, body: Value) -> RoutingResult<RoutedResponse> {
        self.execute_with_cancellation(body, &CancellationToken::new())
            .await
    }

    /// Route one request, stopping between attempts once `cancel` fires
    ///
    /// # Errors
    ///
    /// As [`RoutingLink::execute`], plus `Cancelled`
    pub async fn execute_with_cancellation(
        &self,
        body: Value,
        cancel: &CancellationToken,
    ) -> RoutingResult<RoutedResponse> {
        let span = info_span!(
            "route",
            request_id = %Uuid::new_v4(),
            project = %self.config.resource_id
        );
        self.route(body, cancel).instrument(span).await
    }

    async fn route(
        &self,
        body: Value,
        cancel: &CancellationToken,
    ) -> RoutingResult<RoutedResponse> {
        if cancel.is_cancelled() {
            return Err(RoutingError::Cancelled);
        }

        let mut attempts = 0;
        let (endpoint, cause) = match self.registry.next_order().await {
            Ok((order_type, order)) => {
                let url = order.url.clone();
                match self.authorize(order_type, order).await {
                    Ok(params) => {
                        match self
                            .send_with_retries(&params, &body, cancel, &mut attempts)
                            .await
                        {
                            Ok(reply) => {
                                return Ok(self.primary_success(params, reply, attempts).await);
                            }
                            Err(RoutingError::Cancelled) => return Err(RoutingError::Cancelled),
                            Err(e) => {
                                self.penalize(&params.runner, &e).await;
                                if matches!(e, RoutingError::Application { .. })
                                    && !self.config.fallback_on_application_error
                                {
                                    return Err(RoutingError::exhausted(params.url, e));
                                }
                                (Some(params.url), e)
                            }
                        }
                    }
                    Err(e) => (Some(url), e),
                }
            }
            Err(e) => (None, e),
        };

        let Some(fallback) = &self.config.fallback_url else {
            debug!(cause = %cause, "no fallback configured");
            return Err(match endpoint {
                Some(endpoint) => RoutingError::exhausted(endpoint, cause),
                None => RoutingError::NoEndpoint,
            });
        };
        if cancel.is_cancelled() {
            return Err(RoutingError::Cancelled);
        }

        debug!(endpoint = %fallback, cause = %cause, "use fallback url");
        if let Some(observer) = &self.observer {
            observer.fallback_used(&cause);
        }

        attempts += 1;
        match self.send_once(fallback.as_str(), None, &body).await {
            Ok(reply) => Ok(RoutedResponse {
                body: reply,
                endpoint: fallback.to_string(),
                runner: None,
                fallback: true,
                attempts,
            }),
            Err(e) => {
                warn!(endpoint = %fallback, error = %e, "fallback request failed");
                Err(RoutingError::exhausted(fallback.as_str(), e))
            }
        }
    }

    async fn primary_success(
        &self,
        params: RequestParams,
        reply: Value,
        attempts: u32,
    ) -> RoutedResponse {
        self.registry.record_success(&params.runner).await;
        if params.order_type == OrderType::FlexPlan {
            self.credentials.channel().sync_state(&reply).await;
        }

        RoutedResponse {
            body: reply,
            endpoint: params.url,
            runner: Some(params.runner),
            fallback: false,
            attempts,
        }
    }

    async fn penalize(&self, runner: &str, error: &RoutingError) {
        let Some(class) = error.failure_class() else {
            return;
        };
        let weight = self.registry.record_failure(runner, class).await;
        debug!(runner, class = class.as_str(), weight = ?weight, error = %error, "indexer failed");
        if let Some(observer) = &self.observer {
            observer.provider_failed(runner, class);
        }
    }

    async fn send_with_retries(
        &self,
        params: &RequestParams,
        body: &Value,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> RoutingResult<Value> {
        let mut delays = retry_delays(self.config.retry_base_delay_ms, self.config.max_retries);
        loop {
            *attempts += 1;
            let error = match self
                .send_once(&params.url, Some(&params.headers), body)
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            let Some(delay) = delays.next() else {
                debug!(endpoint = %params.url, attempts = *attempts, "reach max retries");
                return Err(error);
            };

            debug!(
                endpoint = %params.url,
                attempt = *attempts,
                delay = ?delay,
                error = %error,
                "retrying same endpoint"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(RoutingError::Cancelled),
                () = sleep(delay) => {}
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        headers: Option<&BTreeMap<String, String>>,
        body: &Value,
    ) -> RoutingResult<Value> {
        let mut request = TransportRequest::new(url, body.clone());
        if let Some(headers) = headers {
            request = request.with_headers(headers.clone());
        }

        let reply = self
            .transport
            .send(request)
            .await
            .map_err(|source| RoutingError::Transport {
                endpoint: url.to_string(),
                source,
            })?;

        match envelope_error(&reply) {
            Some(message) => Err(RoutingError::Application {
                endpoint: url.to_string(),
                message,
            }),
            None => Ok(reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_are_bounded() {
        assert_eq!(retry_delays(100, 0).count(), 0);
        assert_eq!(retry_delays(100, 3).count(), 3);
        assert!(retry_delays(100, 10).all(|d| d <= MAX_RETRY_DELAY));
        assert!(retry_delays(0, 2).all(|d| d.is_zero()));
    }
}
