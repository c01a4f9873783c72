//! WebSocket protocol for live donation viewers.
//!
//! The `GET /ws` endpoint upgrades to a WebSocket connection. A viewer
//! manages its own channel subscriptions with [`ClientMessage`] control
//! frames and receives [`ServerMessage`] JSON frames for every matching
//! broadcast event.
//!
//! # Protocol
//!
//! 1. The client sends `{"type":"subscribe","channels":["donations"]}`;
//!    the server acknowledges with `{"type":"subscribed","channels":[...]}`
//!    carrying the connection's full subscription set.
//! 2. Broadcast events are pushed as `donation`, `campaign_update` and
//!    `stats` frames to every connection subscribed to one of the event's
//!    channels. Delivery is at-least-once and best-effort per connection.
//! 3. The server pings periodically; a connection that does not answer
//!    within the timeout window is closed with [`WsCloseCode::PING_TIMEOUT`].

use serde::{Deserialize, Serialize};

use super::events::{CampaignProgress, DonationSummary, StatsSnapshot};
use super::BroadcastEvent;

/// Client-to-server control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add channels to this connection's subscription set.
    Subscribe { channels: Vec<String> },
    /// Remove channels from this connection's subscription set.
    Unsubscribe { channels: Vec<String> },
}

/// Server-to-client message.
///
/// Internally tagged so the client can dispatch on the `"type"` field:
///
/// ```json
/// {"type":"donation","data":{ ... }}
/// {"type":"subscribed","channels":["donations","campaign:..."]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a subscribe; `channels` is the full current set.
    Subscribed { channels: Vec<String> },
    /// Acknowledges an unsubscribe; `channels` is the full current set.
    Unsubscribed { channels: Vec<String> },
    /// A donation was observed (pending or confirmed).
    Donation { data: DonationSummary },
    /// A campaign's aggregates changed.
    CampaignUpdate { data: CampaignProgress },
    /// Global statistics changed.
    Stats { data: StatsSnapshot },
    /// A malformed control frame was received; the connection stays open.
    Error { code: u16, reason: String },
}

impl From<BroadcastEvent> for ServerMessage {
    fn from(event: BroadcastEvent) -> Self {
        match event {
            BroadcastEvent::Donation { data } => ServerMessage::Donation { data },
            BroadcastEvent::CampaignUpdate { data } => ServerMessage::CampaignUpdate { data },
            BroadcastEvent::Stats { data } => ServerMessage::Stats { data },
        }
    }
}

/// Well-known WebSocket close codes used by the viewer stream.
///
/// Codes in the 4000–4999 range are reserved for application use by
/// [RFC 6455 §7.4.2](https://www.rfc-editor.org/rfc/rfc6455#section-7.4.2).
pub struct WsCloseCode;

impl WsCloseCode {
    /// Normal closure (server shutdown).
    pub const NORMAL: u16 = 1000;

    /// An unexpected server-side error prevented the connection from
    /// continuing.
    pub const INTERNAL_ERROR: u16 = 1011;

    /// The connection failed to answer a ping within the timeout window.
    pub const PING_TIMEOUT: u16 = 4008;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frames_parse() {
        let raw = r#"{"type":"subscribe","channels":["donations","stats"]}"#;
        let message: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            message,
            ClientMessage::Subscribe {
                channels: vec!["donations".into(), "stats".into()],
            }
        );
    }

    #[test]
    fn unknown_control_type_is_rejected() {
        let raw = r#"{"type":"shout","channels":[]}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }
}
