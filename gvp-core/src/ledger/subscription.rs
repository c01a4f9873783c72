//! Ledger event subscription.
//!
//! The settlement layer has no push channel, so "subscribing" means
//! polling `fetch_events` on an interval and forwarding each decoded
//! event into the `LedgerEvent` channel. The watcher never misses an
//! event by design: the cursor only advances past blocks whose events
//! were handed to the channel, and redeliveries are harmless because the
//! watcher is idempotent.

use super::LedgerClient;
use crate::events::LedgerEventSender;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct LedgerSubscription {
    client: Arc<dyn LedgerClient>,
    event_tx: LedgerEventSender,
    poll_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl LedgerSubscription {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        event_tx: LedgerEventSender,
        poll_interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            event_tx,
            poll_interval,
            shutdown_rx,
        }
    }

    /// Poll the ledger until shutdown.
    ///
    /// Starts from the current block height; history before startup is the
    /// reconciler's responsibility.
    pub async fn run(mut self) {
        info!("LedgerSubscription started");

        let mut cursor: Option<i64> = None;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("LedgerSubscription received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(&mut cursor).await {
                        // Transient: retried on the next tick.
                        warn!(error = %e, "Ledger poll failed");
                    }
                }
            }
        }

        info!("LedgerSubscription shutdown complete");
    }

    async fn poll_once(
        &self,
        cursor: &mut Option<i64>,
    ) -> Result<(), super::LedgerError> {
        let from_block = match cursor {
            Some(block) => *block + 1,
            None => {
                let height = self.client.block_height().await?;
                *cursor = Some(height);
                debug!(height, "Ledger subscription anchored at current height");
                return Ok(());
            }
        };

        let batch = self.client.fetch_events(from_block).await?;
        let count = batch.events.len();

        for event in batch.events {
            // Send failure means the watcher is gone (shutdown); stop
            // advancing so nothing is silently skipped.
            if self.event_tx.send(event).await.is_err() {
                warn!("LedgerEvent channel closed, stopping poll");
                return Ok(());
            }
        }

        if batch.latest_block >= from_block {
            *cursor = Some(batch.latest_block);
        }

        if count > 0 {
            debug!(count, latest_block = batch.latest_block, "Forwarded ledger events");
        }
        Ok(())
    }
}
