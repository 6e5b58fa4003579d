// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! State channel types for flex plan settlement

use serde::{Deserialize, Serialize};

/// Running balance and signatures of a flex plan channel
///
/// Amounts are decimal strings as produced by the indexer service. A final
/// state accepts no further spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    /// Channel identifier (hex encoded)
    pub channel_id: String,
    /// Indexer address
    pub indexer: String,
    /// Consumer address
    pub consumer: String,
    /// Amount spent so far
    pub spent: String,
    /// Amount acknowledged by the remote side
    pub remote: String,
    /// Whether the channel is closed for spending
    pub is_final: bool,
    /// Indexer signature over the state
    pub indexer_sign: String,
    /// Consumer signature over the state
    pub consumer_sign: String,
}

impl ChannelState {
    /// Encode the state as the value of an `Authorization` header
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized
    pub fn to_authorization(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_state_uses_camel_case() {
        let state = ChannelState {
            channel_id: "0x01".to_string(),
            indexer: "0xindexer".to_string(),
            consumer: "0xconsumer".to_string(),
            spent: "10".to_string(),
            remote: "10".to_string(),
            is_final: false,
            indexer_sign: "0xaa".to_string(),
            consumer_sign: "0xbb".to_string(),
        };

        let header = state.to_authorization().unwrap();
        assert!(header.contains("\"channelId\":\"0x01\""));
        assert!(header.contains("\"isFinal\":false"));

        let decoded: ChannelState = serde_json::from_str(&header).unwrap();
        assert_eq!(decoded, state);
    }
}
