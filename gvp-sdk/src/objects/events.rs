//! Broadcast event payloads shared by publishers and the fan-out hub.
//!
//! The stream listener and ledger watcher publish these as JSON on the
//! broker's pub/sub channels; the hub decodes them and relays each one to
//! every viewer whose subscription set matches the event's channels.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hub channel carrying every donation event.
pub const CHANNEL_DONATIONS: &str = "donations";
/// Hub channel carrying aggregate statistics.
pub const CHANNEL_STATS: &str = "stats";

/// Hub channel for a single campaign's events.
pub fn campaign_channel(campaign_id: Uuid) -> String {
    format!("campaign:{campaign_id}")
}

/// Viewer-visible donation state.
///
/// Viewers see eventual consistency: a donation appears as `Pending` when
/// announced by the stream and flips to `Confirmed` once settled, so the
/// distinction is carried on the wire rather than hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationState {
    Pending,
    Confirmed,
}

/// A single donation, as shown in live feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationSummary {
    pub tx_hash: String,
    pub campaign_id: Uuid,
    /// `None` when the donor asked to stay anonymous.
    pub donor_address: Option<String>,
    pub amount: Decimal,
    #[serde(default)]
    pub message: Option<String>,
    pub state: DonationState,
    /// Unix timestamp (seconds) of the observation that produced this
    /// summary.
    pub timestamp: i64,
}

/// Campaign progress after a confirmed donation was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignProgress {
    pub campaign_id: Uuid,
    pub current_amount: Decimal,
    pub target_amount: Decimal,
    pub donor_count: i64,
    pub completed: bool,
}

/// Global aggregate statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_raised: Decimal,
    pub confirmed_donations: i64,
}

/// An event published on the broker and relayed by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    Donation { data: DonationSummary },
    CampaignUpdate { data: CampaignProgress },
    Stats { data: StatsSnapshot },
}

impl BroadcastEvent {
    /// The hub channels this event is delivered on.
    pub fn channels(&self) -> Vec<String> {
        match self {
            BroadcastEvent::Donation { data } => vec![
                CHANNEL_DONATIONS.to_string(),
                campaign_channel(data.campaign_id),
            ],
            BroadcastEvent::CampaignUpdate { data } => {
                vec![campaign_channel(data.campaign_id)]
            }
            BroadcastEvent::Stats { .. } => vec![CHANNEL_STATS.to_string()],
        }
    }
}
