//! Wire types for the external donation push stream.
//!
//! The stream announces donations *before* they settle on-chain. Every
//! message arrives wrapped in a [`StreamEnvelope`]; donation announcements
//! carry a [`DonationAnnouncement`] as the envelope payload.
//!
//! The stream is provisional by design: announcements may be duplicated,
//! arrive out of order, or never be followed by an on-chain settlement.
//! Consumers must treat the envelope `id` as a replay guard and the
//! transaction hash as the donation identity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message kinds delivered by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// A new donation announcement ([`DonationAnnouncement`] payload).
    Donation,
    /// Subscription acknowledgement (empty payload).
    Subscribed,
    /// Unsubscription acknowledgement (empty payload).
    Unsubscribed,
}

/// Envelope wrapping every message received from the push stream.
///
/// ```json
/// {"id":"evt_01","type":"donation","streamId":"campaign:...","payload":{...},"timestamp":1724700000}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEnvelope {
    /// The stream's own event identifier, unique per delivery attempt
    /// series (redeliveries reuse it). Used for replay protection.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    /// Logical stream this event belongs to (a campaign stream or the
    /// global stream).
    pub stream_id: String,
    /// Type-specific payload; decoded according to `event_type`.
    pub payload: serde_json::Value,
    /// Stream-origin unix timestamp (seconds).
    pub timestamp: i64,
}

/// Client-to-stream control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRequest {
    Subscribe {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    Unsubscribe {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
}

/// Payload of a `donation` stream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationAnnouncement {
    /// Transaction hash — the donation's global identity.
    pub tx_hash: String,
    pub campaign_id: Uuid,
    pub donor_address: String,
    /// Donation amount in the token's smallest unit. Decimal on the wire
    /// (serialized as a string), never a float.
    pub amount: Decimal,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

/// Validation failures for incoming announcements.
///
/// These are data-integrity errors: the event is dropped and never retried.
#[derive(Debug, thiserror::Error)]
pub enum AnnouncementError {
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("transaction hash is empty or not 0x-prefixed")]
    BadTxHash,
    #[error("donor address is empty")]
    BadDonorAddress,
    #[error("amount must be positive")]
    BadAmount,
}

impl DonationAnnouncement {
    /// Decode and validate a `donation` envelope payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, AnnouncementError> {
        let announcement: DonationAnnouncement = serde_json::from_value(payload.clone())?;
        announcement.validate()?;
        Ok(announcement)
    }

    fn validate(&self) -> Result<(), AnnouncementError> {
        if self.tx_hash.len() < 3 || !self.tx_hash.starts_with("0x") {
            return Err(AnnouncementError::BadTxHash);
        }
        if self.donor_address.is_empty() {
            return Err(AnnouncementError::BadDonorAddress);
        }
        if self.amount <= Decimal::ZERO {
            return Err(AnnouncementError::BadAmount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips_wire_casing() {
        let raw = r#"{"id":"evt_1","type":"donation","streamId":"campaign:x","payload":{},"timestamp":1724700000}"#;
        let envelope: StreamEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.id, "evt_1");
        assert_eq!(envelope.event_type, StreamEventType::Donation);
        assert_eq!(envelope.stream_id, "campaign:x");

        let back = serde_json::to_value(&envelope).unwrap();
        assert_eq!(back["streamId"], "campaign:x");
        assert_eq!(back["type"], "donation");
    }

    #[test]
    fn announcement_rejects_bad_fields() {
        let base = json!({
            "txHash": "0xaa",
            "campaignId": "7f3b0000-0000-0000-0000-000000000001",
            "donorAddress": "0xdonor",
            "amount": "1000000000000000000",
        });

        assert!(DonationAnnouncement::from_payload(&base).is_ok());

        let mut bad_hash = base.clone();
        bad_hash["txHash"] = json!("aa");
        assert!(matches!(
            DonationAnnouncement::from_payload(&bad_hash),
            Err(AnnouncementError::BadTxHash)
        ));

        let mut zero = base.clone();
        zero["amount"] = json!("0");
        assert!(matches!(
            DonationAnnouncement::from_payload(&zero),
            Err(AnnouncementError::BadAmount)
        ));

        let mut missing = base.clone();
        missing.as_object_mut().unwrap().remove("donorAddress");
        assert!(matches!(
            DonationAnnouncement::from_payload(&missing),
            Err(AnnouncementError::Payload(_))
        ));
    }

    #[test]
    fn subscribe_request_wire_shape() {
        let request = StreamRequest::Subscribe {
            stream_id: "campaign:abc".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["streamId"], "campaign:abc");
    }
}
