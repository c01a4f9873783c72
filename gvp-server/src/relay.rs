//! Broker-to-hub relay.
//!
//! Holds the single redis pub/sub subscription and forwards every decoded
//! [`BroadcastEvent`] into the in-process broadcast channel that viewer
//! WebSocket connections read from. If redis goes away the relay retries
//! with backoff while the hub keeps serving (viewers just stop receiving
//! events until the subscription is back).

use futures_util::StreamExt;
use gvp_core::cache::CacheStore;
use gvp_core::utils::backoff::{reconnect_delay, with_jitter};
use gvp_sdk::objects::BroadcastEvent;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_MAX: Duration = Duration::from_secs(15);

enum RelayEnd {
    Shutdown,
    SubscriptionLost,
}

pub struct EventRelay {
    cache: CacheStore,
    broadcast_tx: broadcast::Sender<BroadcastEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventRelay {
    pub fn new(
        cache: CacheStore,
        broadcast_tx: broadcast::Sender<BroadcastEvent>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cache,
            broadcast_tx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("EventRelay started");

        let mut attempt: u32 = 0;
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            match self.cache.subscribe_events().await {
                Ok(pubsub) => {
                    info!("EventRelay subscribed to broker");
                    attempt = 0;
                    if let RelayEnd::Shutdown = self.pump(pubsub).await {
                        break;
                    }
                    warn!("Broker subscription lost");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to subscribe to broker");
                    attempt = attempt.saturating_add(1);
                }
            }

            let delay = with_jitter(reconnect_delay(RETRY_BASE, RETRY_MAX, attempt));
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("EventRelay stopped");
    }

    async fn pump(&mut self, mut pubsub: redis::aio::PubSub) -> RelayEnd {
        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        return RelayEnd::Shutdown;
                    }
                }

                message = messages.next() => {
                    let Some(message) = message else {
                        return RelayEnd::SubscriptionLost;
                    };
                    self.forward(&message);
                }
            }
        }
    }

    fn forward(&self, message: &redis::Msg) {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Non-text broker message, dropping");
                return;
            }
        };

        let event: BroadcastEvent = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Malformed broadcast event, dropping");
                return;
            }
        };

        // Err means no viewer is connected right now.
        if self.broadcast_tx.send(event).is_err() {
            debug!("No viewers connected, event dropped");
        }
    }
}
