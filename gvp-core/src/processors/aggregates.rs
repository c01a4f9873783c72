//! Confirmed-donation bookkeeping, shared by the ledger watcher and the
//! reconciler.
//!
//! The status CAS to `confirmed` and the aggregate updates it triggers
//! commit in a single transaction: a donation is either fully settled
//! (status, campaign totals, donor aggregate, completion check) or not at
//! all, so a crash mid-confirmation never strands a confirmed row whose
//! amount is missing from the totals. Cache and broadcast updates happen
//! after the commit and are advisory; they degrade to warnings.

use crate::cache::CacheStore;
use crate::entities::{
    Campaign, CampaignStatus, Donation, DonorAggregate, NewConfirmedDonation,
};
use gvp_sdk::objects::{
    BroadcastEvent, CampaignProgress, DonationState, DonationSummary, StatsSnapshot,
};
use sqlx::{PgPool, Postgres, Transaction};
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AggregateUpdater {
    pool: PgPool,
    cache: CacheStore,
}

impl AggregateUpdater {
    pub fn new(pool: PgPool, cache: CacheStore) -> Self {
        Self { pool, cache }
    }

    /// Settle a ledger observation: confirm the existing `pending` row (or
    /// create the row as `confirmed`) and apply aggregates, atomically.
    ///
    /// Returns the confirmed row when this call settled the donation;
    /// `None` when it was already in a terminal state and nothing changed.
    pub async fn settle(
        &self,
        insert: &NewConfirmedDonation,
    ) -> Result<Option<Donation>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let Some(donation) = Donation::confirm_or_insert(&mut *tx, insert).await? else {
            return Ok(None);
        };
        let (campaign, completed_now) = Self::apply_in_tx(&mut tx, &donation).await?;
        tx.commit().await?;

        self.report(&donation, &campaign, completed_now).await;
        Ok(Some(donation))
    }

    /// Confirm a `pending` donation from a receipt lookup and apply
    /// aggregates, atomically. The CAS makes a concurrent settlement of the
    /// same hash a clean no-op for the loser.
    pub async fn confirm_pending(
        &self,
        tx_hash: &str,
        block_number: i64,
        settled_at: PrimitiveDateTime,
    ) -> Result<Option<Donation>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let Some(donation) =
            Donation::confirm_if_pending(&mut *tx, tx_hash, block_number, settled_at).await?
        else {
            return Ok(None);
        };
        let (campaign, completed_now) = Self::apply_in_tx(&mut tx, &donation).await?;
        tx.commit().await?;

        self.report(&donation, &campaign, completed_now).await;
        Ok(Some(donation))
    }

    /// Aggregate updates for a donation just moved to `confirmed` in `tx`.
    ///
    /// Locks the campaign row first, serializing concurrent confirmations
    /// for the same campaign so the distinct-donor check cannot double- or
    /// under-count a donor. The donor-count bump only happens for the
    /// donor's first confirmed donation to the campaign; the donor lifetime
    /// aggregate is only touched for ledger-first donations
    /// (stream-announced ones were recorded at announcement time, keyed off
    /// `announced_at`).
    async fn apply_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        donation: &Donation,
    ) -> Result<(Campaign, bool), sqlx::Error> {
        Campaign::lock(&mut **tx, donation.campaign_id).await?;

        let has_other = Donation::donor_has_other_confirmed(
            &mut **tx,
            donation.campaign_id,
            &donation.donor_address,
            &donation.tx_hash,
        )
        .await?;

        let campaign = Campaign::apply_confirmed_donation(
            &mut **tx,
            donation.campaign_id,
            donation.amount,
            !has_other,
        )
        .await?;

        if donation.announced_at.is_none() {
            DonorAggregate::record_donation(&mut **tx, &donation.donor_address, donation.amount)
                .await?;
        }

        let completed_now = Campaign::complete_if_reached(&mut **tx, donation.campaign_id).await?;

        Ok((campaign, completed_now))
    }

    async fn report(&self, donation: &Donation, campaign: &Campaign, completed_now: bool) {
        if completed_now {
            info!(
                campaign_id = %donation.campaign_id,
                current_amount = %campaign.current_amount,
                target_amount = %campaign.target_amount,
                "Campaign reached its target"
            );
        } else {
            debug!(
                campaign_id = %donation.campaign_id,
                tx_hash = %donation.tx_hash,
                amount = %donation.amount,
                "Applied confirmed donation"
            );
        }

        self.publish_updates(donation, campaign, completed_now)
            .await;
    }

    /// Cache/broadcast side of a confirmation. Best effort throughout: the
    /// database already holds the truth, so every failure here is a
    /// warning, never an error.
    async fn publish_updates(&self, donation: &Donation, campaign: &Campaign, completed_now: bool) {
        if let Err(e) = self.cache.invalidate_campaign(donation.campaign_id).await {
            warn!(error = %e, "Failed to invalidate campaign view cache");
        }

        let summary = confirmed_summary(donation);

        // Ledger-first donations never went through the stream path, so
        // their feed and leaderboard entries are created here.
        if donation.announced_at.is_none() {
            if let Err(e) = self.cache.push_feed(&summary).await {
                warn!(error = %e, "Failed to push donation feed entry");
            }
            if let Err(e) = self
                .cache
                .incr_leaderboard(donation.campaign_id, &donation.donor_address, donation.amount)
                .await
            {
                warn!(error = %e, "Failed to update leaderboard");
            }
        }

        if let Err(e) = self
            .cache
            .publish(&BroadcastEvent::Donation { data: summary })
            .await
        {
            warn!(error = %e, "Failed to publish donation event");
        }

        let progress = CampaignProgress {
            campaign_id: campaign.id,
            current_amount: campaign.current_amount,
            target_amount: campaign.target_amount,
            donor_count: campaign.donor_count,
            completed: completed_now || campaign.status == CampaignStatus::Completed,
        };
        if let Err(e) = self
            .cache
            .publish(&BroadcastEvent::CampaignUpdate { data: progress })
            .await
        {
            warn!(error = %e, "Failed to publish campaign update");
        }

        match Donation::confirmed_totals(&self.pool).await {
            Ok((total_raised, confirmed_donations)) => {
                let stats = StatsSnapshot {
                    total_raised,
                    confirmed_donations,
                };
                if let Err(e) = self
                    .cache
                    .publish(&BroadcastEvent::Stats { data: stats })
                    .await
                {
                    warn!(error = %e, "Failed to publish stats");
                }
            }
            Err(e) => warn!(error = %e, "Failed to compute stats snapshot"),
        }
    }
}

/// Viewer-facing summary of a confirmed donation. Anonymous donors are
/// masked on the wire even though the address is public on-chain.
pub(crate) fn confirmed_summary(donation: &Donation) -> DonationSummary {
    DonationSummary {
        tx_hash: donation.tx_hash.clone(),
        campaign_id: donation.campaign_id,
        donor_address: (!donation.is_anonymous).then(|| donation.donor_address.clone()),
        amount: donation.amount,
        message: donation.message.clone(),
        state: DonationState::Confirmed,
        timestamp: donation
            .settled_at
            .map(|t| t.assume_utc().unix_timestamp())
            .unwrap_or_else(|| OffsetDateTime::now_utc().unix_timestamp()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::DonationStatus;
    use crate::utils::now_primitive;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn donation(is_anonymous: bool) -> Donation {
        Donation {
            tx_hash: "0xaa".into(),
            campaign_id: Uuid::nil(),
            donor_address: "0xdonor".into(),
            amount: Decimal::from(7),
            message: Some("gm".into()),
            is_anonymous,
            status: DonationStatus::Confirmed,
            block_number: Some(10),
            announced_at: None,
            settled_at: Some(now_primitive()),
            created_at: now_primitive(),
        }
    }

    #[test]
    fn anonymous_donor_is_masked_in_summaries() {
        let summary = confirmed_summary(&donation(true));
        assert_eq!(summary.donor_address, None);
        assert_eq!(summary.state, DonationState::Confirmed);

        let summary = confirmed_summary(&donation(false));
        assert_eq!(summary.donor_address.as_deref(), Some("0xdonor"));
    }
}
