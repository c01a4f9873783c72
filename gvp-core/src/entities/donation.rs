//! The central entity: one row per donation, keyed by transaction hash.
//!
//! The transaction hash is the idempotency key. Both observation sources
//! (push stream and settlement ledger) funnel through the conditional
//! operations here, so concurrent writers resolve to exactly one row and
//! the status machine (`pending -> confirmed | failed | orphaned`) only
//! moves forward. Terminal states never change.

use rust_decimal::Decimal;
use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "donation_status")]
pub enum DonationStatus {
    Pending,
    Confirmed,
    Failed,
    Orphaned,
}

impl DonationStatus {
    /// Terminal statuses are never left once entered.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DonationStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Donation {
    pub tx_hash: String,
    pub campaign_id: Uuid,
    pub donor_address: String,
    pub amount: Decimal,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub status: DonationStatus,
    pub block_number: Option<i64>,
    /// Set when the push stream announced this donation; `None` for rows
    /// created directly from a ledger settlement.
    pub announced_at: Option<PrimitiveDateTime>,
    pub settled_at: Option<PrimitiveDateTime>,
    pub created_at: PrimitiveDateTime,
}

/// Insert data for a stream-announced donation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPendingDonation {
    pub tx_hash: String,
    pub campaign_id: Uuid,
    pub donor_address: String,
    pub amount: Decimal,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub announced_at: PrimitiveDateTime,
}

/// Insert data for a donation first observed on the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConfirmedDonation {
    pub tx_hash: String,
    pub campaign_id: Uuid,
    pub donor_address: String,
    pub amount: Decimal,
    pub block_number: i64,
    pub settled_at: PrimitiveDateTime,
}

const SELECT_COLUMNS: &str = "tx_hash, campaign_id, donor_address, amount, message, \
     is_anonymous, status, block_number, announced_at, settled_at, created_at";

impl Donation {
    /// Create a `pending` donation from a stream announcement.
    ///
    /// Returns `false` when a row for this transaction hash already exists
    /// (duplicate announcement, or the ledger got there first).
    pub async fn insert_pending(
        pool: &PgPool,
        insert: &NewPendingDonation,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO donations
                (tx_hash, campaign_id, donor_address, amount, message, is_anonymous, status, announced_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(&insert.tx_hash)
        .bind(insert.campaign_id)
        .bind(&insert.donor_address)
        .bind(insert.amount)
        .bind(&insert.message)
        .bind(insert.is_anonymous)
        .bind(insert.announced_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Settle a donation observed on the ledger, creating the row if the
    /// stream never announced it.
    ///
    /// On a `pending` promotion the ledger values win: amount, donor and
    /// campaign are overwritten from the settlement, so a provisional
    /// announcement that disagreed with the chain never reaches the
    /// aggregates. Returns the row when this call moved it to `confirmed`
    /// (fresh insert or promotion); `None` when the donation was already in
    /// a terminal state. Aggregates must be applied exactly when this
    /// returns `Some`, in the same transaction.
    pub async fn confirm_or_insert<'e, E>(
        executor: E,
        insert: &NewConfirmedDonation,
    ) -> Result<Option<Donation>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let donation = sqlx::query_as::<_, Donation>(&format!(
            r#"
            INSERT INTO donations
                (tx_hash, campaign_id, donor_address, amount, status, block_number, settled_at)
            VALUES ($1, $2, $3, $4, 'confirmed', $5, $6)
            ON CONFLICT (tx_hash) DO UPDATE
            SET status = 'confirmed',
                campaign_id = EXCLUDED.campaign_id,
                donor_address = EXCLUDED.donor_address,
                amount = EXCLUDED.amount,
                block_number = EXCLUDED.block_number,
                settled_at = EXCLUDED.settled_at
            WHERE donations.status = 'pending'
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(&insert.tx_hash)
        .bind(insert.campaign_id)
        .bind(&insert.donor_address)
        .bind(insert.amount)
        .bind(insert.block_number)
        .bind(insert.settled_at)
        .fetch_optional(executor)
        .await?;
        Ok(donation)
    }

    /// Compare-and-swap to `confirmed`; the guard against double-applying
    /// aggregates when the ledger watcher and the reconciler race.
    pub async fn confirm_if_pending<'e, E>(
        executor: E,
        tx_hash: &str,
        block_number: i64,
        settled_at: PrimitiveDateTime,
    ) -> Result<Option<Donation>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let donation = sqlx::query_as::<_, Donation>(&format!(
            r#"
            UPDATE donations
            SET status = 'confirmed', block_number = $2, settled_at = $3
            WHERE tx_hash = $1 AND status = 'pending'
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(tx_hash)
        .bind(block_number)
        .bind(settled_at)
        .fetch_optional(executor)
        .await?;
        Ok(donation)
    }

    /// Mark a donation `failed` (settlement receipt reported failure).
    pub async fn fail_if_pending(pool: &PgPool, tx_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE donations SET status = 'failed' WHERE tx_hash = $1 AND status = 'pending'",
        )
        .bind(tx_hash)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a donation `orphaned` (announced but never settled within the
    /// timeout). Terminal; orphaned rows are excluded from future sweeps.
    pub async fn orphan_if_pending(pool: &PgPool, tx_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE donations SET status = 'orphaned' WHERE tx_hash = $1 AND status = 'pending'",
        )
        .bind(tx_hash)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_tx_hash(
        pool: &PgPool,
        tx_hash: &str,
    ) -> Result<Option<Donation>, sqlx::Error> {
        sqlx::query_as::<_, Donation>(&format!(
            "SELECT {SELECT_COLUMNS} FROM donations WHERE tx_hash = $1"
        ))
        .bind(tx_hash)
        .fetch_optional(pool)
        .await
    }

    /// `pending` donations created at or before `cutoff`, oldest first.
    /// The reconciler's work queue.
    pub async fn find_stale_pending(
        pool: &PgPool,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<Donation>, sqlx::Error> {
        sqlx::query_as::<_, Donation>(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM donations
            WHERE status = 'pending' AND created_at <= $1
            ORDER BY created_at
            LIMIT $2
            "#
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn count_by_status(
        pool: &PgPool,
        status: DonationStatus,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM donations WHERE status = $1")
                .bind(status)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    /// Whether `donor_address` already has another confirmed donation for
    /// this campaign. Used to keep the campaign donor count distinct.
    pub async fn donor_has_other_confirmed<'e, E>(
        executor: E,
        campaign_id: Uuid,
        donor_address: &str,
        exclude_tx_hash: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM donations
                WHERE campaign_id = $1 AND donor_address = $2
                  AND status = 'confirmed' AND tx_hash <> $3
            )
            "#,
        )
        .bind(campaign_id)
        .bind(donor_address)
        .bind(exclude_tx_hash)
        .fetch_one(executor)
        .await?;
        Ok(exists)
    }

    /// Global confirmed totals for the stats broadcast.
    pub async fn confirmed_totals(pool: &PgPool) -> Result<(Decimal, i64), sqlx::Error> {
        let (total, count): (Decimal, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount), 0), COUNT(*) FROM donations WHERE status = 'confirmed'",
        )
        .fetch_one(pool)
        .await?;
        Ok((total, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!DonationStatus::Pending.is_terminal());
        assert!(DonationStatus::Confirmed.is_terminal());
        assert!(DonationStatus::Failed.is_terminal());
        assert!(DonationStatus::Orphaned.is_terminal());
    }
}
