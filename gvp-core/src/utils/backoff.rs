//! Bounded exponential backoff for stream reconnects.

use rand::Rng;
use std::time::Duration;

/// Delay before reconnect attempt number `attempt` (0-based):
/// `base * 2^attempt`, capped at `max`.
pub fn reconnect_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    // 2^20 already overshoots any sane cap; avoids overflow for large counters.
    let factor = 2u32.saturating_pow(attempt.min(20));
    base.saturating_mul(factor).min(max)
}

/// Spread a delay by +/-20% so reconnecting clients don't stampede.
pub fn with_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::rng().random_range(0.8..1.2);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(500);
    const MAX: Duration = Duration::from_secs(30);

    #[test]
    fn delay_doubles_until_the_cap() {
        assert_eq!(reconnect_delay(BASE, MAX, 0), Duration::from_millis(500));
        assert_eq!(reconnect_delay(BASE, MAX, 1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(BASE, MAX, 3), Duration::from_secs(4));
        assert_eq!(reconnect_delay(BASE, MAX, 6), Duration::from_secs(30));
        assert_eq!(reconnect_delay(BASE, MAX, 7), Duration::from_secs(30));
        assert_eq!(reconnect_delay(BASE, MAX, 1000), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_secs(10);
        for _ in 0..100 {
            let jittered = with_jitter(delay);
            assert!(jittered >= Duration::from_secs(8));
            assert!(jittered < Duration::from_secs(12));
        }
    }
}
