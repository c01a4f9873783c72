//! LedgerWatcher processor.
//!
//! Consumes `LedgerEvent`s from the settlement subscription:
//! - donation settlements confirm an existing `pending` row or create the
//!   row directly as `confirmed` when the stream never announced it
//! - campaign completion events force-complete the campaign
//! - withdrawal executions close the matching withdrawal request
//!
//! Every handler is idempotent: redelivered events hit the transaction-hash
//! key or a status CAS and become no-ops, so no ordering is assumed
//! between this watcher, the stream listener, and the reconciler.

use crate::cache::CacheStore;
use crate::entities::{Campaign, CampaignStatus, NewConfirmedDonation, Withdrawal};
use crate::events::{LedgerEvent, LedgerEventReceiver};
use crate::processors::AggregateUpdater;
use crate::utils::primitive_from_unix;
use gvp_sdk::objects::{BroadcastEvent, CampaignProgress};
use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Postgres error code for foreign key violations; raised when a
/// settlement references a campaign this instance doesn't know.
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct LedgerWatcher {
    pool: PgPool,
    cache: CacheStore,
    aggregates: AggregateUpdater,
    event_rx: LedgerEventReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl LedgerWatcher {
    pub fn new(
        pool: PgPool,
        cache: CacheStore,
        aggregates: AggregateUpdater,
        event_rx: LedgerEventReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            cache,
            aggregates,
            event_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("LedgerWatcher started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("LedgerWatcher received shutdown signal");
                        break;
                    }
                }

                Some(event) = self.event_rx.recv() => {
                    if let Err(e) = self.process_event(event).await {
                        error!(error = %e, "Failed to process ledger event");
                    }
                }

                else => {
                    info!("LedgerEvent channel closed");
                    break;
                }
            }
        }

        info!("LedgerWatcher shutdown complete");
    }

    async fn process_event(&self, event: LedgerEvent) -> Result<(), WatchError> {
        match event {
            LedgerEvent::DonationSettled {
                tx_hash,
                campaign_id,
                donor_address,
                amount,
                block_number,
                settled_at,
            } => {
                self.handle_settled(
                    tx_hash,
                    campaign_id,
                    donor_address,
                    amount,
                    block_number,
                    settled_at,
                )
                .await
            }
            LedgerEvent::CampaignCompleted { campaign_id } => {
                self.handle_completed(campaign_id).await
            }
            LedgerEvent::WithdrawalExecuted {
                recipient_address,
                amount,
            } => self.handle_withdrawal(recipient_address, amount).await,
        }
    }

    async fn handle_settled(
        &self,
        tx_hash: String,
        campaign_id: Uuid,
        donor_address: String,
        amount: Decimal,
        block_number: i64,
        settled_at: i64,
    ) -> Result<(), WatchError> {
        let insert = NewConfirmedDonation {
            tx_hash,
            campaign_id,
            donor_address,
            amount,
            block_number,
            settled_at: primitive_from_unix(settled_at),
        };

        // Status CAS and aggregates commit together inside `settle`.
        match self.aggregates.settle(&insert).await {
            Ok(Some(donation)) => {
                info!(
                    tx_hash = %donation.tx_hash,
                    campaign_id = %donation.campaign_id,
                    amount = %donation.amount,
                    stream_first = donation.announced_at.is_some(),
                    "Donation confirmed by ledger"
                );
                Ok(())
            }
            Ok(None) => {
                debug!(tx_hash = %insert.tx_hash, "Settlement already applied, skipping");
                Ok(())
            }
            // The ledger can settle donations for campaigns this instance
            // never created; dropped with a warning, never retried.
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                warn!(
                    tx_hash = %insert.tx_hash,
                    campaign_id = %insert.campaign_id,
                    "Settlement references unknown campaign, dropping"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_completed(&self, campaign_id: Uuid) -> Result<(), WatchError> {
        let flipped = Campaign::force_complete(&self.pool, campaign_id).await?;
        if !flipped {
            debug!(campaign_id = %campaign_id, "Campaign already completed");
            return Ok(());
        }

        info!(campaign_id = %campaign_id, "Campaign completed by ledger event");

        if let Err(e) = self.cache.invalidate_campaign(campaign_id).await {
            warn!(error = %e, "Failed to invalidate campaign view cache");
        }

        match Campaign::get(&self.pool, campaign_id).await? {
            Some(campaign) => {
                let progress = CampaignProgress {
                    campaign_id,
                    current_amount: campaign.current_amount,
                    target_amount: campaign.target_amount,
                    donor_count: campaign.donor_count,
                    completed: campaign.status == CampaignStatus::Completed,
                };
                if let Err(e) = self
                    .cache
                    .publish(&BroadcastEvent::CampaignUpdate { data: progress })
                    .await
                {
                    warn!(error = %e, "Failed to publish campaign completion");
                }
            }
            None => warn!(campaign_id = %campaign_id, "Completed campaign not found"),
        }
        Ok(())
    }

    async fn handle_withdrawal(
        &self,
        recipient_address: String,
        amount: Decimal,
    ) -> Result<(), WatchError> {
        match Withdrawal::complete_matching(&self.pool, &recipient_address, amount).await? {
            Some(id) => {
                info!(withdrawal_id = %id, recipient = %recipient_address, "Withdrawal completed");
            }
            None => {
                // Withdrawal requests are created elsewhere; an unmatched
                // execution is logged and left alone.
                warn!(
                    recipient = %recipient_address,
                    amount = %amount,
                    "Withdrawal execution matches no requested withdrawal"
                );
            }
        }
        Ok(())
    }
}
