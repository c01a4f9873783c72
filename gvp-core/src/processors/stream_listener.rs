//! StreamListener processor.
//!
//! Maintains the WebSocket connection to the external donation push
//! stream. Donations arrive here before settlement; the listener
//! materializes them as `pending` rows and fans them out, leaving
//! confirmation to the ledger watcher and the reconciler.
//!
//! The stream is untrusted plumbing: announcements are validated,
//! deduplicated against the raw event log, and checked against known
//! campaigns before they touch donation state. A single bad event is
//! dropped with a log line; it never kills the connection or the loop.
//!
//! Connection loss triggers bounded exponential backoff with jitter and a
//! hard stop after the configured attempt budget, surfaced through
//! [`ConnectionState`] as a standing degraded condition.

use crate::cache::CacheStore;
use crate::entities::{Campaign, Donation, DonorAggregate, NewPendingDonation, RawStreamEvent};
use crate::events::SubscribeRequestReceiver;
use crate::health::SharedConnectionState;
use crate::utils::backoff::{reconnect_delay, with_jitter};
use crate::utils::primitive_from_unix;
use futures_util::{SinkExt, StreamExt};
use gvp_sdk::objects::{
    BroadcastEvent, DonationAnnouncement, DonationState, DonationSummary, StreamEnvelope,
    StreamEventType, StreamRequest,
};
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("frame encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    ConnectionLost(String),
}

#[derive(Debug, Clone)]
pub struct StreamListenerConfig {
    pub url: Url,
    /// Stream carrying donations for every campaign.
    pub global_stream_id: String,
    pub ping_interval: Duration,
    /// A connection that shows no activity (messages or pongs) for this
    /// long after a ping is considered dead.
    pub pong_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub max_reconnect_attempts: u32,
}

/// Stream identifier for a campaign's donation stream.
pub fn campaign_stream_id(campaign_id: Uuid) -> String {
    format!("campaign:{campaign_id}")
}

pub struct StreamListener {
    pool: PgPool,
    cache: CacheStore,
    config: StreamListenerConfig,
    state: SharedConnectionState,
    subscribe_rx: SubscribeRequestReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl StreamListener {
    pub fn new(
        pool: PgPool,
        cache: CacheStore,
        config: StreamListenerConfig,
        state: SharedConnectionState,
        subscribe_rx: SubscribeRequestReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            cache,
            config,
            state,
            subscribe_rx,
            shutdown_rx,
        }
    }

    /// Run the listener until shutdown or until the reconnect budget is
    /// exhausted.
    pub async fn run(mut self) {
        info!(url = %self.config.url, "StreamListener started");

        self.seed_subscriptions().await;

        let mut attempts: u32 = 0;
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let end = self.connect_and_serve().await;
            self.state.write().await.connected = false;

            match end {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::ConnectionLost(reason)) => {
                    warn!(reason = %reason, "Stream connection lost");
                    self.note_error(reason).await;
                    // A successful session resets the budget.
                    attempts = 1;
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempts + 1, "Stream connection failed");
                    self.note_error(e.to_string()).await;
                    attempts += 1;
                }
            }

            {
                let mut state = self.state.write().await;
                state.reconnect_attempts = attempts;
            }

            if attempts >= self.config.max_reconnect_attempts {
                error!(
                    attempts,
                    "Stream reconnect budget exhausted, giving up"
                );
                self.state.write().await.gave_up = true;
                break;
            }

            let delay = with_jitter(reconnect_delay(
                self.config.reconnect_base,
                self.config.reconnect_max,
                attempts.saturating_sub(1),
            ));
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            if !self.wait_backoff(delay).await {
                break;
            }
        }

        info!("StreamListener stopped");
    }

    /// Initial subscription set: the global stream plus one stream per
    /// active campaign.
    async fn seed_subscriptions(&self) {
        let mut streams = std::collections::BTreeSet::new();
        streams.insert(self.config.global_stream_id.clone());

        match Campaign::active_ids(&self.pool).await {
            Ok(ids) => {
                for id in ids {
                    streams.insert(campaign_stream_id(id));
                }
            }
            Err(e) => error!(error = %e, "Failed to load active campaigns for subscriptions"),
        }

        self.state.write().await.subscribed = streams;
    }

    async fn note_error(&self, reason: String) {
        self.state.write().await.last_error = Some(reason);
    }

    /// Sleep out the backoff while still absorbing subscribe requests so
    /// they are not lost while disconnected. Returns `false` on shutdown.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        return false;
                    }
                }

                Some(request) = self.subscribe_rx.recv() => {
                    self.state.write().await.subscribed.insert(request.stream_id);
                }

                _ = tokio::time::sleep_until(deadline) => {
                    return true;
                }
            }
        }
    }

    /// One connection lifecycle: connect, resubscribe everything, then
    /// serve until the connection dies or shutdown is signaled.
    async fn connect_and_serve(&mut self) -> Result<SessionEnd, StreamError> {
        let (ws, _) = connect_async(self.config.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        // Resubscribe the full desired set: streams from before the
        // disconnect plus any requested while offline.
        let subscribed = {
            let mut state = self.state.write().await;
            state.connected = true;
            state.last_error = None;
            state.subscribed.clone()
        };
        for stream_id in &subscribed {
            send_subscribe(&mut sink, stream_id).await?;
        }
        info!(streams = subscribed.len(), "Stream connected and subscribed");

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }

                Some(request) = self.subscribe_rx.recv() => {
                    let newly_added = self
                        .state
                        .write()
                        .await
                        .subscribed
                        .insert(request.stream_id.clone());
                    if newly_added {
                        send_subscribe(&mut sink, &request.stream_id).await?;
                        debug!(stream_id = %request.stream_id, "Subscribed to stream");
                    }
                }

                _ = ping.tick() => {
                    if last_activity.elapsed() > self.config.pong_timeout {
                        return Ok(SessionEnd::ConnectionLost(
                            "keep-alive timeout".to_string(),
                        ));
                    }
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        return Ok(SessionEnd::ConnectionLost("ping send failed".to_string()));
                    }
                }

                message = stream.next() => {
                    match message {
                        None => return Ok(SessionEnd::ConnectionLost("stream closed".to_string())),
                        Some(Err(e)) => return Ok(SessionEnd::ConnectionLost(e.to_string())),
                        Some(Ok(frame)) => {
                            last_activity = Instant::now();
                            match frame {
                                Message::Text(text) => self.handle_frame(&text).await,
                                Message::Ping(payload) => {
                                    if sink.send(Message::Pong(payload)).await.is_err() {
                                        return Ok(SessionEnd::ConnectionLost(
                                            "pong send failed".to_string(),
                                        ));
                                    }
                                }
                                Message::Close(_) => {
                                    return Ok(SessionEnd::ConnectionLost(
                                        "server closed connection".to_string(),
                                    ));
                                }
                                // Pong and binary frames only refresh activity.
                                _ => {}
                            }
                        }
                    }
                }
            }
        }
    }

    /// Decode and apply one stream frame. Faults here are contained: bad
    /// events are dropped with a log line, database errors are logged and
    /// the frame is abandoned (the reconciler covers the gap).
    async fn handle_frame(&self, text: &str) {
        let envelope: StreamEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Malformed stream frame, dropping");
                return;
            }
        };

        match envelope.event_type {
            StreamEventType::Donation => {}
            StreamEventType::Subscribed | StreamEventType::Unsubscribed => {
                debug!(stream_id = %envelope.stream_id, kind = ?envelope.event_type, "Stream ack");
                return;
            }
        }

        let announcement = match DonationAnnouncement::from_payload(&envelope.payload) {
            Ok(announcement) => announcement,
            Err(e) => {
                warn!(event_id = %envelope.id, error = %e, "Invalid donation announcement, dropping");
                return;
            }
        };

        // Replay protection: the raw event log is keyed by the stream's
        // own event identifier.
        match RawStreamEvent::insert(
            &self.pool,
            &envelope.id,
            "donation",
            &envelope.stream_id,
            &envelope.payload,
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(event_id = %envelope.id, "Replayed stream event, dropping");
                return;
            }
            Err(e) => {
                error!(event_id = %envelope.id, error = %e, "Failed to record stream event");
                return;
            }
        }

        match Campaign::exists(&self.pool, announcement.campaign_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    campaign_id = %announcement.campaign_id,
                    tx_hash = %announcement.tx_hash,
                    "Announcement references unknown campaign, dropping"
                );
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to check campaign existence");
                return;
            }
        }

        let insert = NewPendingDonation {
            tx_hash: announcement.tx_hash.clone(),
            campaign_id: announcement.campaign_id,
            donor_address: announcement.donor_address.clone(),
            amount: announcement.amount,
            message: announcement.message.clone(),
            is_anonymous: announcement.is_anonymous,
            announced_at: primitive_from_unix(envelope.timestamp),
        };

        match Donation::insert_pending(&self.pool, &insert).await {
            Ok(true) => {}
            Ok(false) => {
                // Already known: duplicate announcement, or the ledger
                // created the row first.
                debug!(tx_hash = %announcement.tx_hash, "Donation already exists, dropping");
                return;
            }
            Err(e) => {
                error!(tx_hash = %announcement.tx_hash, error = %e, "Failed to insert donation");
                return;
            }
        }

        info!(
            tx_hash = %announcement.tx_hash,
            campaign_id = %announcement.campaign_id,
            amount = %announcement.amount,
            "Pending donation created from stream"
        );

        if let Err(e) = DonorAggregate::record_donation(
            &self.pool,
            &announcement.donor_address,
            announcement.amount,
        )
        .await
        {
            error!(error = %e, "Failed to update donor aggregate");
        }

        self.fan_out(&envelope, &announcement).await;
    }

    /// Advisory cache and broadcast updates for a new pending donation.
    async fn fan_out(&self, envelope: &StreamEnvelope, announcement: &DonationAnnouncement) {
        let summary = pending_summary(envelope, announcement);

        if let Err(e) = self.cache.push_feed(&summary).await {
            warn!(error = %e, "Failed to push donation feed entry");
        }
        if let Err(e) = self
            .cache
            .incr_leaderboard(
                announcement.campaign_id,
                &announcement.donor_address,
                announcement.amount,
            )
            .await
        {
            warn!(error = %e, "Failed to update leaderboard");
        }
        if let Err(e) = self
            .cache
            .publish(&BroadcastEvent::Donation { data: summary })
            .await
        {
            warn!(error = %e, "Failed to publish donation event");
        }
    }
}

async fn send_subscribe<S>(sink: &mut S, stream_id: &str) -> Result<(), StreamError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let request = StreamRequest::Subscribe {
        stream_id: stream_id.to_string(),
    };
    let frame = serde_json::to_string(&request)?;
    sink.send(Message::Text(frame)).await?;
    Ok(())
}

/// Viewer-facing summary of a freshly announced (pending) donation.
fn pending_summary(
    envelope: &StreamEnvelope,
    announcement: &DonationAnnouncement,
) -> DonationSummary {
    DonationSummary {
        tx_hash: announcement.tx_hash.clone(),
        campaign_id: announcement.campaign_id,
        donor_address: (!announcement.is_anonymous)
            .then(|| announcement.donor_address.clone()),
        amount: announcement.amount,
        message: announcement.message.clone(),
        state: DonationState::Pending,
        timestamp: envelope.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn envelope() -> StreamEnvelope {
        StreamEnvelope {
            id: "evt_1".into(),
            event_type: StreamEventType::Donation,
            stream_id: "campaign:x".into(),
            payload: serde_json::Value::Null,
            timestamp: 1_724_700_000,
        }
    }

    fn announcement(is_anonymous: bool) -> DonationAnnouncement {
        DonationAnnouncement {
            tx_hash: "0xaa".into(),
            campaign_id: Uuid::nil(),
            donor_address: "0xdonor".into(),
            amount: Decimal::from(3),
            message: None,
            is_anonymous,
        }
    }

    #[test]
    fn pending_summary_carries_stream_timestamp_and_state() {
        let summary = pending_summary(&envelope(), &announcement(false));
        assert_eq!(summary.state, DonationState::Pending);
        assert_eq!(summary.timestamp, 1_724_700_000);
        assert_eq!(summary.donor_address.as_deref(), Some("0xdonor"));
    }

    #[test]
    fn pending_summary_masks_anonymous_donors() {
        let summary = pending_summary(&envelope(), &announcement(true));
        assert_eq!(summary.donor_address, None);
    }

    #[test]
    fn campaign_stream_ids_are_stable() {
        let id = Uuid::nil();
        assert_eq!(
            campaign_stream_id(id),
            "campaign:00000000-0000-0000-0000-000000000000"
        );
    }
}
