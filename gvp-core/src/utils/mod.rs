pub mod backoff;

use time::{OffsetDateTime, PrimitiveDateTime};

/// Current UTC wall clock as a `PrimitiveDateTime` (the type the naive
/// `TIMESTAMP` columns map to).
pub fn now_primitive() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Convert a unix timestamp (seconds) to a `PrimitiveDateTime`, saturating
/// on out-of-range values instead of failing.
pub fn primitive_from_unix(timestamp: i64) -> PrimitiveDateTime {
    let offset = OffsetDateTime::from_unix_timestamp(timestamp)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    PrimitiveDateTime::new(offset.date(), offset.time())
}
