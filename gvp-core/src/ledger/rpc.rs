//! JSON-RPC implementation of [`LedgerClient`].
//!
//! Talks to the settlement gateway node, which exposes the donation
//! contract's state over a small JSON-RPC surface:
//!
//! - `gvp_blockNumber` -> current block height
//! - `gvp_getTransactionReceipt [txHash]` -> receipt or null
//! - `gvp_getEvents [fromBlock]` -> typed contract events since a block
//!
//! Every request carries the configured timeout so a slow provider cannot
//! stall the reconciler or the event poller.

use super::{LedgerClient, LedgerError, LedgerEventBatch, ReceiptStatus, SettlementReceipt};
use crate::events::LedgerEvent;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

pub struct JsonRpcLedgerClient {
    rpc_url: Url,
    /// Donation contract address; scoping parameter for `gvp_getEvents`.
    contract_address: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    tx_hash: String,
    status: String,
    block_number: i64,
    settled_at: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcEventPage {
    latest_block: i64,
    events: Vec<RpcEventItem>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "eventType", rename_all = "snake_case")]
enum RpcEventItem {
    #[serde(rename_all = "camelCase")]
    DonationSettled {
        tx_hash: String,
        campaign_id: Uuid,
        donor_address: String,
        amount: Decimal,
        block_number: i64,
        settled_at: i64,
    },
    #[serde(rename_all = "camelCase")]
    CampaignCompleted { campaign_id: Uuid },
    #[serde(rename_all = "camelCase")]
    WithdrawalExecuted {
        recipient_address: String,
        amount: Decimal,
    },
}

impl From<RpcEventItem> for LedgerEvent {
    fn from(item: RpcEventItem) -> Self {
        match item {
            RpcEventItem::DonationSettled {
                tx_hash,
                campaign_id,
                donor_address,
                amount,
                block_number,
                settled_at,
            } => LedgerEvent::DonationSettled {
                tx_hash,
                campaign_id,
                donor_address,
                amount,
                block_number,
                settled_at,
            },
            RpcEventItem::CampaignCompleted { campaign_id } => {
                LedgerEvent::CampaignCompleted { campaign_id }
            }
            RpcEventItem::WithdrawalExecuted {
                recipient_address,
                amount,
            } => LedgerEvent::WithdrawalExecuted {
                recipient_address,
                amount,
            },
        }
    }
}

impl JsonRpcLedgerClient {
    pub fn new(
        rpc_url: Url,
        contract_address: String,
        request_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            rpc_url,
            contract_address,
            http_client,
        })
    }

    /// Issue a call whose result may legitimately be null.
    async fn call_opt<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, LedgerError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .http_client
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await?;
        let response: RpcResponse<T> = response.json().await?;

        if let Some(error) = response.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }

    /// Issue a call that must return a result.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, LedgerError> {
        self.call_opt(method, params)
            .await?
            .ok_or_else(|| LedgerError::Parse(format!("{method}: missing result")))
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedgerClient {
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<SettlementReceipt>, LedgerError> {
        // A null result means the transaction has not settled yet.
        let receipt: Option<RpcReceipt> = self
            .call_opt("gvp_getTransactionReceipt", serde_json::json!([tx_hash]))
            .await?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };

        let status = match receipt.status.as_str() {
            "success" => ReceiptStatus::Success,
            "failed" => ReceiptStatus::Failed,
            other => {
                return Err(LedgerError::Parse(format!(
                    "unknown receipt status: {other}"
                )));
            }
        };

        Ok(Some(SettlementReceipt {
            tx_hash: receipt.tx_hash,
            status,
            block_number: receipt.block_number,
            settled_at: receipt.settled_at,
        }))
    }

    async fn block_height(&self) -> Result<i64, LedgerError> {
        self.call("gvp_blockNumber", serde_json::json!([])).await
    }

    async fn fetch_events(&self, from_block: i64) -> Result<LedgerEventBatch, LedgerError> {
        let page: RpcEventPage = self
            .call(
                "gvp_getEvents",
                serde_json::json!([from_block, self.contract_address]),
            )
            .await?;
        Ok(LedgerEventBatch {
            latest_block: page.latest_block,
            events: page.events.into_iter().map(LedgerEvent::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_items_decode_by_type_tag() {
        let raw = r#"
        {
          "latestBlock": 120,
          "events": [
            {
              "eventType": "donation_settled",
              "txHash": "0xaa",
              "campaignId": "7f3b0000-0000-0000-0000-000000000001",
              "donorAddress": "0xdonor",
              "amount": "1000000000000000000",
              "blockNumber": 118,
              "settledAt": 1724700000
            },
            {"eventType": "campaign_completed", "campaignId": "7f3b0000-0000-0000-0000-000000000001"},
            {"eventType": "withdrawal_executed", "recipientAddress": "0xrec", "amount": "5"}
          ]
        }"#;
        let page: RpcEventPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.latest_block, 120);
        assert_eq!(page.events.len(), 3);

        let events: Vec<LedgerEvent> = page.events.into_iter().map(LedgerEvent::from).collect();
        match &events[0] {
            LedgerEvent::DonationSettled {
                tx_hash,
                amount,
                block_number,
                ..
            } => {
                assert_eq!(tx_hash, "0xaa");
                assert_eq!(*block_number, 118);
                assert_eq!(
                    *amount,
                    "1000000000000000000".parse::<Decimal>().unwrap()
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_fails_to_decode() {
        let raw = r#"{"latestBlock": 1, "events": [{"eventType": "minted"}]}"#;
        assert!(serde_json::from_str::<RpcEventPage>(raw).is_err());
    }
}
