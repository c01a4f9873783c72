//! Event type definitions for the internal channels.

use rust_decimal::Decimal;
use uuid::Uuid;

/// A notification decoded from the settlement ledger.
///
/// These are authoritative: they can arrive late or be re-delivered, but
/// the handlers are idempotent (guarded by the donation's transaction-hash
/// key and status CAS), so redelivery is harmless.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    /// A donation settled on-chain.
    DonationSettled {
        tx_hash: String,
        campaign_id: Uuid,
        donor_address: String,
        amount: Decimal,
        block_number: i64,
        /// Settlement unix timestamp (seconds).
        settled_at: i64,
    },
    /// The contract marked a campaign complete.
    CampaignCompleted { campaign_id: Uuid },
    /// A withdrawal was executed on-chain.
    WithdrawalExecuted {
        recipient_address: String,
        amount: Decimal,
    },
}

/// Ask the stream listener to subscribe to a logical stream (e.g. a
/// campaign created while the process is running).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub stream_id: String,
}
