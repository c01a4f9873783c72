//! Settlement-ledger access.
//!
//! The ledger is the authoritative source: a donation is final once it
//! appears here. Access goes through the [`LedgerClient`] trait so the
//! watcher and reconciler can be exercised against a stub in tests; the
//! production implementation is [`JsonRpcLedgerClient`].

pub mod rpc;
pub mod subscription;

pub use rpc::JsonRpcLedgerClient;
pub use subscription::LedgerSubscription;

use crate::events::LedgerEvent;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from ledger RPC calls. All transient from the pipeline's
/// perspective: retried on the next poll or sweep, never recorded as a
/// donation failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// HTTP transport error (includes request timeouts)
    #[error("RPC request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The node answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The response did not match the expected shape
    #[error("RPC response parsing error: {0}")]
    Parse(String),
}

/// Settlement outcome recorded in a transaction receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Failed,
}

/// Receipt for a settled transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub tx_hash: String,
    pub status: ReceiptStatus,
    pub block_number: i64,
    /// Settlement unix timestamp (seconds).
    pub settled_at: i64,
}

/// One page of ledger events plus the cursor for the next fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEventBatch {
    pub events: Vec<LedgerEvent>,
    /// Highest block covered by this batch; the next fetch starts after it.
    pub latest_block: i64,
}

/// Point queries and event fetches against the settlement ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Receipt for a transaction hash; `None` while unsettled.
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<SettlementReceipt>, LedgerError>;

    /// Current block height (health reporting).
    async fn block_height(&self) -> Result<i64, LedgerError>;

    /// Contract events at or after `from_block`.
    async fn fetch_events(&self, from_block: i64) -> Result<LedgerEventBatch, LedgerError>;
}
