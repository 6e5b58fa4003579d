// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Flex plan channel credentials
//!
//! Every flex plan request carries the next channel state, obtained from the
//! consumer service just before the request. Nothing is cached.

use std::sync::Arc;

use alloy_primitives::hex;
use api_client::{Transport, TransportRequest};
use serde_json::{Value, json};
use shared_types::{ChannelState, Order};
use tracing::{debug, warn};

use crate::{
    config::RoutingConfig,
    eip712::{ChannelUpdate, MessageSigner, parse_address, parse_uint, sign_typed},
    error::{RoutingError, RoutingResult},
};

const SIGN_PATH: &str = "/channel/sign";
const STATE_PATH: &str = "/channel/state";

/// Client of the channel signing service
#[derive(Debug)]
pub struct ChannelClient<T> {
    transport: Arc<T>,
    config: RoutingConfig,
    signer: Option<Arc<dyn MessageSigner>>,
}

impl<T> Clone for ChannelClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            signer: self.signer.clone(),
        }
    }
}

impl<T: Transport> ChannelClient<T> {
    /// Create a client; with a signer the consumer signature is issued locally
    pub fn new(
        transport: Arc<T>,
        config: RoutingConfig,
        signer: Option<Arc<dyn MessageSigner>>,
    ) -> Self {
        Self {
            transport,
            config,
            signer,
        }
    }

    /// Obtain the next signed state for a flex plan
    ///
    /// # Errors
    ///
    /// Returns a credential error if the state cannot be obtained, is final
    /// or cannot be signed
    pub async fn next_state(&self, plan: &Order) -> RoutingResult<ChannelState> {
        let url = self.config.service_url(SIGN_PATH)?;
        let request = TransportRequest::new(
            url.as_str(),
            json!({
                "deployment": self.config.resource_id,
                "channelId": plan.id,
            }),
        );

        let reply = self
            .transport
            .send(request)
            .await
            .map_err(|e| RoutingError::credential(&plan.runner, format!("channel sign: {e}")))?;
        let mut state: ChannelState = serde_json::from_value(reply).map_err(|e| {
            RoutingError::credential(&plan.runner, format!("malformed channel state: {e}"))
        })?;

        if state.is_final {
            return Err(RoutingError::credential(
                &plan.runner,
                format!("channel {} is final", state.channel_id),
            ));
        }

        if let Some(signer) = &self.signer {
            state.consumer_sign = self.consumer_signature(signer.as_ref(), &plan.runner, &state)?;
        }

        debug!(
            runner = %plan.runner,
            channel = %state.channel_id,
            spent = %state.spent,
            "obtained channel state"
        );
        Ok(state)
    }

    fn consumer_signature(
        &self,
        signer: &dyn MessageSigner,
        runner: &str,
        state: &ChannelState,
    ) -> RoutingResult<String> {
        let update = ChannelUpdate {
            channelId: parse_uint(runner, &state.channel_id)?,
            indexer: parse_address(runner, &state.indexer)?,
            consumer: parse_address(runner, &state.consumer)?,
            spent: parse_uint(runner, &state.spent)?,
            isFinal: state.is_final,
        };
        let signature = sign_typed(signer, &update, self.config.chain_id)?;
        Ok(hex::encode(signature.as_bytes()))
    }

    /// Forward the state returned alongside a flex plan reply
    ///
    /// Does nothing when the reply carries no state. Failures are logged.
    pub async fn sync_state(&self, reply: &Value) {
        let Some(state @ Value::Object(_)) = reply.get("state") else {
            return;
        };

        let url = match self.config.service_url(STATE_PATH) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build channel state url");
                return;
            }
        };

        if let Err(e) = self
            .transport
            .send(TransportRequest::new(url.as_str(), state.clone()))
            .await
        {
            warn!(error = %e, "failed to sync channel state");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::{B256, Signature};
    use alloy_sol_types::SolStruct;
    use shared_types::ProjectType;
    use url::Url;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path},
    };

    use super::*;
    use crate::{
        eip712::{LocalSigner, domain},
        transport::HttpTransport,
    };

    const CHANNEL_ID: &str = "0x91abb40d77fe1f340a98a57a0c5bc24b3a9b91007e345ea4795901d9698adf4";

    fn state(is_final: bool) -> Value {
        json!({
            "channelId": CHANNEL_ID,
            "indexer": "0x1111111111111111111111111111111111111111",
            "consumer": "0x2222222222222222222222222222222222222222",
            "spent": "10000000000000000",
            "remote": "10000000000000000",
            "isFinal": is_final,
            "indexerSign": "aa",
            "consumerSign": "bb",
        })
    }

    fn client(
        server: &MockServer,
        signer: Option<Arc<dyn MessageSigner>>,
    ) -> ChannelClient<HttpTransport> {
        let config = RoutingConfig::new(
            Url::parse(&server.uri()).unwrap(),
            "QmProject",
            ProjectType::Deployment,
        );
        let transport = Arc::new(HttpTransport::new(Duration::from_secs(2)).unwrap());
        ChannelClient::new(transport, config, signer)
    }

    fn plan() -> Order {
        Order::new("7", "0x1111111111111111111111111111111111111111", "http://indexer")
    }

    #[tokio::test]
    async fn requests_next_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channel/sign"))
            .and(body_json(json!({ "deployment": "QmProject", "channelId": "7" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(state(false)))
            .expect(1)
            .mount(&server)
            .await;

        let state = client(&server, None).next_state(&plan()).await.unwrap();
        assert_eq!(state.consumer_sign, "bb");
        assert_eq!(state.spent, "10000000000000000");
    }

    #[tokio::test]
    async fn final_state_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channel/sign"))
            .respond_with(ResponseTemplate::new(200).set_body_json(state(true)))
            .mount(&server)
            .await;

        let error = client(&server, None).next_state(&plan()).await.unwrap_err();
        assert!(matches!(error, RoutingError::Credential { .. }));
        assert!(error.to_string().contains("is final"));
    }

    #[tokio::test]
    async fn signer_reissues_consumer_signature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channel/sign"))
            .respond_with(ResponseTemplate::new(200).set_body_json(state(false)))
            .mount(&server)
            .await;

        let signer = LocalSigner::random();
        let expected = signer.address();
        let state = client(&server, Some(Arc::new(signer)))
            .next_state(&plan())
            .await
            .unwrap();

        let bytes = hex::decode(&state.consumer_sign).unwrap();
        let signature = Signature::from_raw(&bytes).unwrap();
        let update = ChannelUpdate {
            channelId: parse_uint("r", CHANNEL_ID).unwrap(),
            indexer: parse_address("r", &state.indexer).unwrap(),
            consumer: parse_address("r", &state.consumer).unwrap(),
            spent: parse_uint("r", &state.spent).unwrap(),
            isFinal: false,
        };
        let hash: B256 = update.eip712_signing_hash(&domain(1287));
        assert_eq!(signature.recover_address_from_prehash(&hash).unwrap(), expected);
    }

    #[tokio::test]
    async fn sign_failure_is_a_credential_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channel/sign"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let error = client(&server, None).next_state(&plan()).await.unwrap_err();
        assert!(matches!(error, RoutingError::Credential { .. }));
    }

    #[tokio::test]
    async fn syncs_returned_state_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channel/state"))
            .and(body_json(state(false)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, None);
        client
            .sync_state(&json!({ "data": {}, "state": state(false) }))
            .await;
        client.sync_state(&json!({ "data": {} })).await;
    }
}
