//! Capped exponential backoff with additive jitter.
//!
//! Delay for attempt `n` is `min(base * 2^n, cap) + jitter`, where jitter is
//! drawn uniformly from `[0, jitter_max]`.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter_max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, jitter_max: Duration) -> Self {
        Self {
            base,
            cap,
            jitter_max,
        }
    }

    pub fn from_millis(base_ms: u64, cap_ms: u64, jitter_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(cap_ms),
            Duration::from_millis(jitter_ms),
        )
    }

    pub fn jitter_max(&self) -> Duration {
        self.jitter_max
    }

    /// `min(base * 2^attempt, cap)`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let jitter_ms = u64::try_from(self.jitter_max.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..=jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::Backoff;
    use std::time::Duration;

    #[test]
    fn delay_stays_within_jitter_window() {
        let backoff = Backoff::from_millis(1_000, 30_000, 250);
        for attempt in 0..8 {
            let floor = Duration::from_millis((1_000u64 << attempt).min(30_000));
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
                assert!(
                    delay <= floor + Duration::from_millis(250),
                    "attempt {attempt}: {delay:?} above window"
                );
            }
        }
    }

    #[test]
    fn huge_attempts_saturate_at_cap() {
        let backoff = Backoff::from_millis(1_000, 30_000, 0);
        assert_eq!(backoff.base_delay(64), Duration::from_millis(30_000));
        assert_eq!(backoff.delay(64), Duration::from_millis(30_000));
    }
}
