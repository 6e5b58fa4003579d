// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Service orders offered by indexers
//!
//! An order is one indexer's offer to serve one project. Agreements are
//! prepaid and authenticated with a bearer token; flex plans are metered and
//! settled per request against a signed channel state.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Commercial terms under which an order is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Prepaid service agreement
    #[serde(rename = "agreement")]
    Agreement,
    /// Pay-per-use plan settled over a state channel
    #[serde(rename = "flexPlan")]
    FlexPlan,
}

impl OrderType {
    /// Returns the canonical wire name of the order type
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agreement => "agreement",
            Self::FlexPlan => "flexPlan",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of project an order serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    /// Dictionary project used to accelerate indexing
    Dictionary,
    /// Regular indexing deployment
    Deployment,
}

impl ProjectType {
    /// Returns the path segment used by the discovery service
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dictionary => "dictionary",
            Self::Deployment => "deployment",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown project type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown project type: {0}")]
pub struct ProjectTypeParseError(String);

impl FromStr for ProjectType {
    type Err = ProjectTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dictionary" => Ok(Self::Dictionary),
            "deployment" => Ok(Self::Deployment),
            _ => Err(ProjectTypeParseError(s.to_string())),
        }
    }
}

/// An offer from one indexer to serve one project
///
/// `url` and `runner` never change for the lifetime of an order. The token of
/// an agreement is tracked by the registry and patched onto copies handed out
/// to callers, so the order itself stays immutable inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Identifier, unique within one discovery snapshot
    pub id: String,
    /// Indexer address serving this order
    #[serde(alias = "indexer")]
    pub runner: String,
    /// Endpoint requests are sent to
    pub url: String,
    /// Bearer token of an authenticated agreement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Order {
    /// Create an order without a token
    pub fn new(id: impl Into<String>, runner: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            runner: runner.into(),
            url: url.into(),
            token: None,
        }
    }

    /// Attach a bearer token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Orders returned by the discovery service for one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdersResponse {
    /// Prepaid agreements, in discovery order
    #[serde(default)]
    pub agreements: Vec<Order>,
    /// Flex plans, in discovery order
    #[serde(default)]
    pub plans: Vec<Order>,
}

impl OrdersResponse {
    /// Whether neither list contains an order
    pub fn is_empty(&self) -> bool {
        self.agreements.is_empty() && self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderType::Agreement).unwrap(),
            "\"agreement\""
        );
        assert_eq!(
            serde_json::to_string(&OrderType::FlexPlan).unwrap(),
            "\"flexPlan\""
        );
        assert_eq!(OrderType::FlexPlan.to_string(), "flexPlan");
    }

    #[test]
    fn project_type_parsing() {
        assert_eq!(
            "deployment".parse::<ProjectType>().unwrap(),
            ProjectType::Deployment
        );
        assert_eq!(
            "Dictionary".parse::<ProjectType>().unwrap(),
            ProjectType::Dictionary
        );
        assert!("subgraph".parse::<ProjectType>().is_err());
    }

    #[test]
    fn order_accepts_indexer_alias() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "id": "1",
            "indexer": "0xabc",
            "url": "https://indexer.example/query",
            "token": "t"
        }))
        .unwrap();

        assert_eq!(order.runner, "0xabc");
        assert_eq!(order.token.as_deref(), Some("t"));
    }

    #[test]
    fn orders_response_defaults_missing_lists() {
        let response: OrdersResponse =
            serde_json::from_value(serde_json::json!({ "plans": [] })).unwrap();
        assert!(response.agreements.is_empty());
        assert!(response.is_empty());
    }
}
