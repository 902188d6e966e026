//! Wallet reader over the ledger's GraphQL endpoint.

use crate::decode::{decode_wallet, DynamicFieldNode, MoveValue};
use crate::snapshot::WalletSnapshot;
use crate::{LedgerError, LedgerReader};
use async_trait::async_trait;
use deadhand_core::Address;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Wallet contents plus up to 50 beneficiary dynamic fields.
pub const WALLET_QUERY: &str = r#"
query GetWalletDetails($walletId: SuiAddress!) {
  object(address: $walletId) {
    address
    asMoveObject {
      contents {
        data
      }
      dynamicFields(first: 50) {
        nodes {
          name {
            bcs
          }
          value {
            ... on MoveValue {
              bcs
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<WalletQueryData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct WalletQueryData {
    object: Option<ObjectNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectNode {
    as_move_object: Option<MoveObjectNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveObjectNode {
    contents: ContentsNode,
    dynamic_fields: FieldConnection,
}

#[derive(Debug, Deserialize)]
struct ContentsNode {
    data: MoveValue,
}

#[derive(Debug, Deserialize)]
struct FieldConnection {
    nodes: Vec<DynamicFieldNode>,
}

/// Parse a GraphQL response body for [`WALLET_QUERY`].
pub fn parse_wallet_response(
    wallet: &Address,
    body: &str,
) -> Result<Option<WalletSnapshot>, LedgerError> {
    let response: GraphqlResponse = serde_json::from_str(body)
        .map_err(|e| LedgerError::Transport(format!("unexpected response body: {}", e)))?;

    if !response.errors.is_empty() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(LedgerError::Transport(messages.join("; ")));
    }

    let object = match response.data.and_then(|d| d.object) {
        Some(o) => o,
        None => return Ok(None),
    };
    // An address that is not a Move object is not a wallet
    let Some(move_object) = object.as_move_object else {
        return Ok(None);
    };

    let snapshot = decode_wallet(
        *wallet,
        &move_object.contents.data,
        &move_object.dynamic_fields.nodes,
    )?;
    Ok(Some(snapshot))
}

/// Reads wallet state from a GraphQL endpoint.
pub struct GraphqlReader {
    endpoint: String,
    http: reqwest::Client,
}

impl GraphqlReader {
    /// # Arguments
    /// * `endpoint` - GraphQL URL (e.g. "https://sui-testnet.mystenlabs.com/graphql")
    /// * `timeout` - per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("https://") {
            log::warn!("Ledger endpoint {} is not using TLS", endpoint);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LedgerReader for GraphqlReader {
    async fn wallet(&self, wallet: &Address) -> Result<Option<WalletSnapshot>, LedgerError> {
        log::debug!("Fetching wallet {} from {}", wallet, self.endpoint);

        let request = json!({
            "query": WALLET_QUERY,
            "variables": { "walletId": wallet.to_string() },
        });
        let response = self.http.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Transport(format!(
                "{} returned HTTP {}",
                self.endpoint, status
            )));
        }

        let body = response.text().await?;
        parse_wallet_response(wallet, &body)
    }
}
