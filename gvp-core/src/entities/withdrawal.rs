//! Withdrawal bookkeeping.
//!
//! Requests are created by an external collaborator; this side only closes
//! them when the ledger reports a matching execution.

use rust_decimal::Decimal;
use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "withdrawal_status")]
pub enum WithdrawalStatus {
    Requested,
    Completed,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_address: String,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub requested_at: PrimitiveDateTime,
    pub completed_at: Option<PrimitiveDateTime>,
}

impl Withdrawal {
    /// Close the oldest `requested` withdrawal matching recipient and
    /// amount. Returns the matched id, or `None` when no request matches
    /// (logged by the caller, not an error: withdrawal creation is another
    /// component's concern).
    pub async fn complete_matching(
        pool: &PgPool,
        recipient_address: &str,
        amount: Decimal,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE withdrawals
            SET status = 'completed', completed_at = now()
            WHERE id = (
                SELECT id FROM withdrawals
                WHERE recipient_address = $1 AND amount = $2 AND status = 'requested'
                ORDER BY requested_at
                LIMIT 1
            )
            RETURNING id
            "#,
        )
        .bind(recipient_address)
        .bind(amount)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }
}
