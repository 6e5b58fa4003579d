// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP implementation of [`Transport`]

use std::time::Duration;

use api_client::{ApiError, Transport, TransportRequest};
use reqwest::Client;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("indexer-router/", env!("CARGO_PKG_VERSION"));

/// Sends JSON requests with reqwest under a hard timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the given per-call timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(request_timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(ApiError::http)?;

        Ok(Self {
            client,
            timeout: request_timeout,
        })
    }

    /// The shared reqwest client
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[allow(clippy::cast_possible_truncation)]
    fn timeout_error(&self) -> ApiError {
        ApiError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<Value, ApiError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = timeout(self.timeout, builder.send())
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| {
                if e.is_timeout() {
                    self.timeout_error()
                } else {
                    ApiError::http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(
                url = %request.url,
                status = status.as_u16(),
                error = message,
                "indexer returned error status"
            );
            return Err(ApiError::from_status(status.as_u16(), message));
        }

        let text = timeout(self.timeout, response.text())
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(ApiError::http)?;
        debug!(url = %request.url, bytes = text.len(), "received reply");

        serde_json::from_str(&text).map_err(ApiError::invalid_response)
    }
}
