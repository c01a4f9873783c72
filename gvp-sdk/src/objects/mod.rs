pub mod events;
pub mod stream;
pub mod ws;

pub use events::{
    campaign_channel, BroadcastEvent, CampaignProgress, DonationState, DonationSummary,
    StatsSnapshot, CHANNEL_DONATIONS, CHANNEL_STATS,
};
pub use stream::{
    AnnouncementError, DonationAnnouncement, StreamEnvelope, StreamEventType, StreamRequest,
};
pub use ws::{ClientMessage, ServerMessage, WsCloseCode};
