//! Append-only record of every message received from the push stream.
//!
//! Keyed by the stream's own event identifier; a conflicting insert means
//! the event was already processed (replay). Kept for debugging and
//! replay analysis, never mutated.

use sqlx::PgPool;
use time::PrimitiveDateTime;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RawStreamEvent {
    pub event_id: String,
    pub event_type: String,
    pub stream_id: String,
    pub payload: serde_json::Value,
    pub received_at: PrimitiveDateTime,
}

impl RawStreamEvent {
    /// Record an incoming stream event.
    ///
    /// Returns `false` when the event identifier was seen before; the
    /// caller must drop the event without touching donation state.
    pub async fn insert(
        pool: &PgPool,
        event_id: &str,
        event_type: &str,
        stream_id: &str,
        payload: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_stream_events (event_id, event_type, stream_id, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(stream_id)
        .bind(payload)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
