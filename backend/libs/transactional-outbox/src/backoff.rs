//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff with equal jitter.
///
/// Attempt `n` waits `base * 2^n` capped at `max`, then randomized into
/// `[half, full]` so a herd of failing rows does not retry in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Deterministic upper bound for attempt `retries` (0-based).
    pub fn ceiling(&self, retries: i32) -> Duration {
        let exp = retries.clamp(0, 30) as u32;
        let uncapped = self.base.saturating_mul(2u32.saturating_pow(exp));
        uncapped.min(self.max)
    }

    /// Jittered delay for attempt `retries`.
    pub fn delay(&self, retries: i32) -> Duration {
        let ceiling = self.ceiling(retries);
        let half = ceiling / 2;
        let spread = ceiling.saturating_sub(half);
        if spread.is_zero() {
            return ceiling;
        }
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=spread);
        half + jitter
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_doubles_until_cap() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(300));
        assert_eq!(policy.ceiling(0), Duration::from_secs(1));
        assert_eq!(policy.ceiling(1), Duration::from_secs(2));
        assert_eq!(policy.ceiling(2), Duration::from_secs(4));
        assert_eq!(policy.ceiling(3), Duration::from_secs(8));
        assert_eq!(policy.ceiling(8), Duration::from_secs(256));
        assert_eq!(policy.ceiling(9), Duration::from_secs(300));
        assert_eq!(policy.ceiling(30), Duration::from_secs(300));
    }

    #[test]
    fn delay_stays_within_jitter_band() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(60));
        for retries in 0..12 {
            let ceiling = policy.ceiling(retries);
            for _ in 0..50 {
                let d = policy.delay(retries);
                assert!(d >= ceiling / 2, "delay {d:?} below half of {ceiling:?}");
                assert!(d <= ceiling, "delay {d:?} above ceiling {ceiling:?}");
            }
        }
    }

    #[test]
    fn negative_retries_behave_like_zero() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.ceiling(-3), policy.ceiling(0));
    }
}
