//! Reconciler processor.
//!
//! The source of truth of last resort: a fixed-interval sweep over
//! `pending` donations older than the orphan timeout. Each one is checked
//! against the ledger directly:
//!
//! - success receipt -> confirm (status CAS, so a concurrent ledger-watcher
//!   confirmation wins cleanly) and apply aggregates
//! - failure receipt -> `failed`, no aggregate change
//! - no receipt     -> `orphaned`, flagged for operational review
//!
//! Per-item failures are isolated; one unreconcilable donation never
//! blocks the rest of the sweep, and sweeps never overlap. Each sweep ends
//! by recomputing the aggregates of every campaign it touched, restoring
//! totals that drifted through past faults or operator edits.

use crate::entities::{Campaign, Donation};
use crate::health::{ReconcileOutcome, SharedReconcileOutcome};
use crate::ledger::{LedgerClient, LedgerError, ReceiptStatus, SettlementReceipt};
use crate::processors::AggregateUpdater;
use crate::utils::{now_primitive, primitive_from_unix};
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Upper bound on rows handled per sweep, so one run stays bounded and
/// never delays the next scheduled run indefinitely.
const SWEEP_LIMIT: i64 = 500;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// What a receipt lookup means for a stale `pending` donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconcileAction {
    Confirm,
    Fail,
    Orphan,
}

fn decide(receipt: Option<&SettlementReceipt>) -> ReconcileAction {
    match receipt {
        Some(receipt) if receipt.status == ReceiptStatus::Success => ReconcileAction::Confirm,
        Some(_) => ReconcileAction::Fail,
        // The donation is already past the orphan timeout (that is the
        // selection criterion), so a missing receipt is terminal.
        None => ReconcileAction::Orphan,
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    pub orphan_timeout: Duration,
}

pub struct Reconciler {
    pool: PgPool,
    ledger: Arc<dyn LedgerClient>,
    aggregates: AggregateUpdater,
    config: ReconcilerConfig,
    outcome: SharedReconcileOutcome,
    shutdown_rx: watch::Receiver<bool>,
}

impl Reconciler {
    pub fn new(
        pool: PgPool,
        ledger: Arc<dyn LedgerClient>,
        aggregates: AggregateUpdater,
        config: ReconcilerConfig,
        outcome: SharedReconcileOutcome,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            ledger,
            aggregates,
            config,
            outcome,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            orphan_timeout_secs = self.config.orphan_timeout.as_secs(),
            "Reconciler started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        // Delayed, not bursty: a long sweep pushes the next one out instead
        // of running it immediately after.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Reconciler received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let outcome = self.sweep().await;
                    info!(
                        scanned = outcome.scanned,
                        confirmed = outcome.confirmed,
                        failed = outcome.failed,
                        orphaned = outcome.orphaned,
                        errors = outcome.errors,
                        "Reconciliation sweep finished"
                    );
                    *self.outcome.write().await = Some(outcome);
                }
            }
        }

        info!("Reconciler shutdown complete");
    }

    /// One reconciliation pass over stale `pending` donations, followed by
    /// an aggregate recompute of the campaigns they belong to. `run` drives
    /// this on the configured interval.
    pub async fn sweep(&self) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome {
            ran_at: OffsetDateTime::now_utc(),
            scanned: 0,
            confirmed: 0,
            failed: 0,
            orphaned: 0,
            errors: 0,
        };

        let cutoff = now_primitive()
            - time::Duration::seconds(self.config.orphan_timeout.as_secs() as i64);

        let stale = match Donation::find_stale_pending(&self.pool, cutoff, SWEEP_LIMIT).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to query stale pending donations");
                outcome.errors = 1;
                return outcome;
            }
        };

        outcome.scanned = stale.len() as u64;
        let touched: BTreeSet<Uuid> = stale.iter().map(|d| d.campaign_id).collect();

        for donation in stale {
            match self.reconcile_one(&donation).await {
                Ok(ReconcileAction::Confirm) => outcome.confirmed += 1,
                Ok(ReconcileAction::Fail) => outcome.failed += 1,
                Ok(ReconcileAction::Orphan) => outcome.orphaned += 1,
                Err(e) => {
                    error!(
                        tx_hash = %donation.tx_hash,
                        error = %e,
                        "Failed to reconcile donation"
                    );
                    outcome.errors += 1;
                }
            }
        }

        // Campaigns with stale donations took an abnormal path; reset their
        // aggregates from the confirmed rows.
        for campaign_id in touched {
            match Campaign::recompute_total(&self.pool, campaign_id).await {
                Ok(campaign) => debug!(
                    campaign_id = %campaign_id,
                    current_amount = %campaign.current_amount,
                    donor_count = campaign.donor_count,
                    "Recomputed campaign aggregates"
                ),
                Err(e) => {
                    error!(
                        campaign_id = %campaign_id,
                        error = %e,
                        "Failed to recompute campaign aggregates"
                    );
                    outcome.errors += 1;
                }
            }
        }

        outcome
    }

    async fn reconcile_one(&self, donation: &Donation) -> Result<ReconcileAction, ReconcileError> {
        let receipt = self.ledger.get_receipt(&donation.tx_hash).await?;
        let action = decide(receipt.as_ref());

        match action {
            ReconcileAction::Confirm => {
                let Some(receipt) = receipt else {
                    return Ok(action);
                };
                match self
                    .aggregates
                    .confirm_pending(
                        &donation.tx_hash,
                        receipt.block_number,
                        primitive_from_unix(receipt.settled_at),
                    )
                    .await?
                {
                    Some(confirmed) => {
                        info!(
                            tx_hash = %confirmed.tx_hash,
                            campaign_id = %confirmed.campaign_id,
                            "Reconciler confirmed stale donation"
                        );
                    }
                    None => {
                        // The ledger watcher got there first.
                        debug!(tx_hash = %donation.tx_hash, "Donation no longer pending");
                    }
                }
            }
            ReconcileAction::Fail => {
                if Donation::fail_if_pending(&self.pool, &donation.tx_hash).await? {
                    warn!(tx_hash = %donation.tx_hash, "Donation failed on-chain");
                }
            }
            ReconcileAction::Orphan => {
                if Donation::orphan_if_pending(&self.pool, &donation.tx_hash).await? {
                    warn!(
                        tx_hash = %donation.tx_hash,
                        campaign_id = %donation.campaign_id,
                        "Donation orphaned: announced but never settled"
                    );
                }
            }
        }

        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(status: ReceiptStatus) -> SettlementReceipt {
        SettlementReceipt {
            tx_hash: "0xaa".into(),
            status,
            block_number: 5,
            settled_at: 1_724_700_000,
        }
    }

    #[test]
    fn receipt_outcomes_map_to_terminal_actions() {
        assert_eq!(
            decide(Some(&receipt(ReceiptStatus::Success))),
            ReconcileAction::Confirm
        );
        assert_eq!(
            decide(Some(&receipt(ReceiptStatus::Failed))),
            ReconcileAction::Fail
        );
        assert_eq!(decide(None), ReconcileAction::Orphan);
    }
}
