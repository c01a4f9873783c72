//! Campaign rows and the derived aggregate columns mutated by confirmed
//! donations.

use rust_decimal::Decimal;
use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "campaign_status")]
pub enum CampaignStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub title: String,
    pub target_amount: Decimal,
    pub current_amount: Decimal,
    pub donor_count: i64,
    pub status: CampaignStatus,
    pub created_at: PrimitiveDateTime,
    pub completed_at: Option<PrimitiveDateTime>,
}

const SELECT_COLUMNS: &str =
    "id, title, target_amount, current_amount, donor_count, status, created_at, completed_at";

impl Campaign {
    /// Create a new active campaign.
    pub async fn create(
        pool: &PgPool,
        title: &str,
        target_amount: Decimal,
    ) -> Result<Campaign, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(&format!(
            r#"
            INSERT INTO campaigns (id, title, target_amount)
            VALUES ($1, $2, $3)
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(target_amount)
        .fetch_one(pool)
        .await
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(&format!(
            "SELECT {SELECT_COLUMNS} FROM campaigns WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn exists(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM campaigns WHERE id = $1)")
                .bind(id)
                .fetch_one(pool)
                .await?;
        Ok(exists)
    }

    /// Identifiers of all active campaigns; the stream listener subscribes
    /// to one stream per entry at startup.
    pub async fn active_ids(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM campaigns WHERE status = 'active'")
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Row-lock the campaign for the rest of the surrounding transaction.
    ///
    /// Concurrent confirmations take this lock before reading donor state,
    /// so the distinct-donor check always sees every committed confirmation
    /// for the campaign.
    pub async fn lock<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let _: (Uuid,) = sqlx::query_as("SELECT id FROM campaigns WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_one(executor)
            .await?;
        Ok(())
    }

    /// Atomically add a confirmed donation to the running total, bumping
    /// the donor count when this is the donor's first confirmed donation
    /// for the campaign. Returns the updated row.
    pub async fn apply_confirmed_donation<'e, E>(
        executor: E,
        id: Uuid,
        amount: Decimal,
        new_donor: bool,
    ) -> Result<Campaign, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Campaign>(&format!(
            r#"
            UPDATE campaigns
            SET current_amount = current_amount + $2,
                donor_count = donor_count + $3
            WHERE id = $1
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(amount)
        .bind(if new_donor { 1i64 } else { 0i64 })
        .fetch_one(executor)
        .await
    }

    /// One-way completion: flips `active -> completed` once the running
    /// total reaches the target. Returns `true` only for the call that
    /// actually flipped the row, so completion side effects fire exactly
    /// once no matter how often the threshold is re-crossed.
    pub async fn complete_if_reached<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'completed', completed_at = now()
            WHERE id = $1 AND status = 'active' AND current_amount >= target_amount
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Completion reported by the ledger directly. Idempotent; ignores the
    /// threshold since the ledger is authoritative.
    pub async fn force_complete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'completed', completed_at = now()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reconciliation repair: reset the running total to the sum of
    /// confirmed donations, restoring the aggregate invariant after faults.
    pub async fn recompute_total(pool: &PgPool, id: Uuid) -> Result<Campaign, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(&format!(
            r#"
            UPDATE campaigns
            SET current_amount = COALESCE(
                    (SELECT SUM(amount) FROM donations
                     WHERE campaign_id = $1 AND status = 'confirmed'), 0),
                donor_count = COALESCE(
                    (SELECT COUNT(DISTINCT donor_address) FROM donations
                     WHERE campaign_id = $1 AND status = 'confirmed'), 0)
            WHERE id = $1
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(pool)
        .await
    }
}
