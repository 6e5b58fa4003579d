// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Indexer assigned to a chain by the authorization service

use serde::{Deserialize, Serialize};

use crate::Order;

/// Reply of the metadata endpoint for one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerMetadata {
    /// Indexer address, absent when no indexer serves the chain
    #[serde(default)]
    pub indexer: Option<String>,
    /// Endpoint of the indexer
    pub uri: String,
    /// Deployment the indexer serves for the chain
    pub deployment_id: String,
    /// Chain id of the network the indexer is registered on
    pub network_chain_id: u64,
}

impl IndexerMetadata {
    /// The assigned indexer as a token-less agreement order
    ///
    /// Returns `None` when no indexer is assigned.
    pub fn agreement(&self) -> Option<Order> {
        self.indexer
            .as_deref()
            .filter(|indexer| !indexer.is_empty())
            .map(|indexer| Order::new(indexer, indexer, &self.uri))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn assigned_indexer_becomes_agreement() {
        let metadata: IndexerMetadata = serde_json::from_value(json!({
            "indexer": "0xabc",
            "uri": "https://indexer.example/query/Qm1",
            "deploymentId": "Qm1",
            "networkChainId": 137
        }))
        .unwrap();

        let order = metadata.agreement().unwrap();
        assert_eq!(order.runner, "0xabc");
        assert_eq!(order.url, "https://indexer.example/query/Qm1");
        assert!(order.token.is_none());
        assert_eq!(metadata.network_chain_id, 137);
    }

    #[test]
    fn missing_indexer_has_no_agreement() {
        let metadata: IndexerMetadata = serde_json::from_value(json!({
            "uri": "",
            "deploymentId": "Qm1",
            "networkChainId": 1
        }))
        .unwrap();
        assert!(metadata.agreement().is_none());
    }
}
