//! Per-donor lifetime aggregates, keyed by address.
//!
//! A donor row is touched exactly once per donation, at the donation's
//! first observation (stream announcement, or ledger settlement when the
//! stream never saw it). The donation row's `announced_at` field is the
//! guard: the confirmed path only writes here when it is `NULL`.

use rust_decimal::Decimal;
use sqlx::PgPool;
use time::PrimitiveDateTime;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct DonorAggregate {
    pub address: String,
    pub total_donated: Decimal,
    pub donation_count: i64,
    pub first_donation_at: PrimitiveDateTime,
    pub last_donation_at: PrimitiveDateTime,
}

impl DonorAggregate {
    /// Create-or-increment in a single upsert.
    pub async fn record_donation<'e, E>(
        executor: E,
        address: &str,
        amount: Decimal,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO donor_aggregates (address, total_donated, donation_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (address) DO UPDATE
            SET total_donated = donor_aggregates.total_donated + EXCLUDED.total_donated,
                donation_count = donor_aggregates.donation_count + 1,
                last_donation_at = now()
            "#,
        )
        .bind(address)
        .bind(amount)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn get(pool: &PgPool, address: &str) -> Result<Option<DonorAggregate>, sqlx::Error> {
        sqlx::query_as::<_, DonorAggregate>(
            r#"
            SELECT address, total_donated, donation_count, first_donation_at, last_donation_at
            FROM donor_aggregates WHERE address = $1
            "#,
        )
        .bind(address)
        .fetch_optional(pool)
        .await
    }
}
