//! Retry ladder for transiently failing messages.
//!
//! The attempt count travels with the message in the `sb_retry` header; the
//! worker sleeps the jittered delay, republishes with the incremented header
//! and acks the original. Exhausted messages go to the DLQ.

use rand::Rng;
use std::time::Duration;

/// Jittered exponential delay for the given attempt (0-based): `base * 2^n`
/// capped at `max`, randomized into the upper half of the window.
pub fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let ceiling = base
        .saturating_mul(2u32.saturating_pow(attempt.min(30)))
        .min(max);
    let half = ceiling / 2;
    let spread = ceiling.saturating_sub(half);
    if spread.is_zero() {
        return ceiling;
    }
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..=spread);
    half + jitter
}

/// Whether a message observed at `attempt` retries has exhausted its budget.
pub fn exhausted(attempt: u32, max_retries: u32) -> bool {
    attempt >= max_retries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_then_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(5);
        for attempt in 0..16 {
            let ceiling = base
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(max);
            for _ in 0..25 {
                let d = retry_delay(attempt, base, max);
                assert!(d >= ceiling / 2);
                assert!(d <= ceiling);
            }
        }
    }

    #[test]
    fn budget_check() {
        assert!(!exhausted(0, 5));
        assert!(!exhausted(4, 5));
        assert!(exhausted(5, 5));
        assert!(exhausted(6, 5));
    }
}
