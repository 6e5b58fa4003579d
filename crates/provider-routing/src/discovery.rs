// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Order discovery
//!
//! Fetches the agreements and flex plans currently offered for a project from
//! the discovery service, or the single indexer the service assigns to a
//! chain.

use reqwest::Client;
use serde::de::DeserializeOwned;
use shared_types::{IndexerMetadata, Order, OrdersResponse};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    config::RoutingConfig,
    error::{RoutingError, RoutingResult},
};

/// Source of service orders for one project
pub trait OrderDiscovery: Send + Sync {
    /// Fetch the current orders
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::DiscoveryUnavailable` if the orders cannot be
    /// obtained
    fn fetch_orders(&self) -> impl Future<Output = RoutingResult<OrdersResponse>> + Send;
}

/// Discovery over the HTTP orders endpoint
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    client: Client,
    config: RoutingConfig,
}

impl HttpDiscovery {
    /// Create a discovery client for the configured project
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: RoutingConfig) -> RoutingResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RoutingError::configuration(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Orders endpoint of the configured project
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be built
    pub fn orders_url(&self) -> RoutingResult<Url> {
        let mut url = self.config.service_url(&format!(
            "/orders/{}/{}",
            self.config.resource_type, self.config.resource_id
        ))?;
        if let Some(api_key) = &self.config.api_key {
            url.query_pairs_mut().append_pair("apikey", api_key);
        }
        Ok(url)
    }

    /// Fetch orders, treating any failure as an empty offer
    pub async fn fetch_orders_or_empty(&self) -> OrdersResponse {
        match self.fetch_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "order discovery failed, using no orders");
                OrdersResponse::default()
            }
        }
    }
    /// Indexer assigned to `chain_id`
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::DiscoveryUnavailable` if the metadata cannot be
    /// fetched
    #[instrument(skip(self))]
    pub async fn fetch_metadata(&self, chain_id: &str) -> RoutingResult<IndexerMetadata> {
        let url = self
            .config
            .service_url(&format!("/metadata/{}", chain_id.trim()))?;
        let metadata: IndexerMetadata = self.get_json(url).await?;
        debug!(
            indexer = metadata.indexer.as_deref().unwrap_or("none"),
            deployment = %metadata.deployment_id,
            "fetched chain metadata"
        );
        Ok(metadata)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> RoutingResult<T> {
        let response = timeout(self.config.request_timeout(), self.client.get(url).send())
            .await
            .map_err(|_| {
                RoutingError::discovery(format!(
                    "timed out after {} ms",
                    self.config.request_timeout_ms
                ))
            })?
            .map_err(RoutingError::discovery)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RoutingError::discovery(format!(
                "status {}: {message}",
                status.as_u16()
            )));
        }

        response.json().await.map_err(RoutingError::discovery)
    }
}

impl OrderDiscovery for HttpDiscovery {
    #[instrument(skip(self), fields(project = %self.config.resource_id))]
    async fn fetch_orders(&self) -> RoutingResult<OrdersResponse> {
        let orders: OrdersResponse = self.get_json(self.orders_url()?).await?;
        debug!(
            agreements = orders.agreements.len(),
            plans = orders.plans.len(),
            "fetched orders"
        );
        Ok(orders)
    }
}

/// Discovery that always offers the same single agreement
#[derive(Debug, Clone)]
pub struct PinnedDiscovery {
    order: Order,
}

impl PinnedDiscovery {
    /// Offer only `order`
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}

impl OrderDiscovery for PinnedDiscovery {
    async fn fetch_orders(&self) -> RoutingResult<OrdersResponse> {
        Ok(OrdersResponse {
            agreements: vec![self.order.clone()],
            plans: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shared_types::ProjectType;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    use super::*;

    fn discovery(server: &MockServer) -> HttpDiscovery {
        let config = RoutingConfig::new(
            Url::parse(&server.uri()).unwrap(),
            "QmProject",
            ProjectType::Deployment,
        );
        HttpDiscovery::new(config).unwrap()
    }

    #[tokio::test]
    async fn fetches_orders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/deployment/QmProject"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "agreements": [
                    { "id": "a1", "indexer": "0x01", "url": "http://one/query", "token": "t1" }
                ],
                "plans": [
                    { "id": "p1", "indexer": "0x02", "url": "http://two/query" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let orders = discovery(&server).fetch_orders().await.unwrap();
        assert_eq!(orders.agreements.len(), 1);
        assert_eq!(orders.agreements[0].token.as_deref(), Some("t1"));
        assert_eq!(orders.plans[0].runner, "0x02");
    }

    #[tokio::test]
    async fn appends_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/dictionary/QmProject"))
            .and(query_param("apikey", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = discovery(&server).config;
        config.resource_type = ProjectType::Dictionary;
        let discovery = HttpDiscovery::new(config.with_api_key("k")).unwrap();

        let orders = discovery.fetch_orders().await.unwrap();
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn error_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let discovery = discovery(&server);
        let error = discovery.fetch_orders().await.unwrap_err();
        assert!(matches!(error, RoutingError::DiscoveryUnavailable { .. }));
        assert!(discovery.fetch_orders_or_empty().await.is_empty());
    }

    #[tokio::test]
    async fn fetches_chain_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/0xgenesis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "indexer": "0x01",
                "uri": "http://one/query/QmChain",
                "deploymentId": "QmChain",
                "networkChainId": 137
            })))
            .expect(1)
            .mount(&server)
            .await;

        let metadata = discovery(&server).fetch_metadata("0xgenesis").await.unwrap();
        assert_eq!(metadata.indexer.as_deref(), Some("0x01"));
        assert_eq!(metadata.deployment_id, "QmChain");
        assert_eq!(metadata.network_chain_id, 137);
    }

    #[tokio::test]
    async fn unknown_chain_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/0xunknown"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let error = discovery(&server)
            .fetch_metadata("0xunknown")
            .await
            .unwrap_err();
        assert!(error.to_string().contains("404"));
    }

    #[tokio::test]
    async fn pinned_discovery_offers_one_agreement() {
        let orders = PinnedDiscovery::new(Order::new("0x01", "0x01", "http://one/query"))
            .fetch_orders()
            .await
            .unwrap();
        assert_eq!(orders.agreements.len(), 1);
        assert!(orders.plans.is_empty());
    }
}
