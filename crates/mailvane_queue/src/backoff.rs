//! Retry delay policy.

use std::time::Duration;

use rand::Rng;

use mailvane_protocol::defaults;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
}

/// Delay computation for a failed attempt. `attempts` is the 1-based count
/// of the attempt that just failed, so the first retry waits `initial`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub initial: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial: Duration::from_millis(defaults::DEFAULT_BACKOFF_INITIAL_MS),
            cap: Duration::from_millis(defaults::DEFAULT_BACKOFF_CAP_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let attempts = attempts.max(1);
        let initial_ms = self.initial.as_millis() as u64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Exponential => {
                let factor = 1u64.checked_shl(attempts - 1).unwrap_or(u64::MAX);
                initial_ms.saturating_mul(factor)
            }
            BackoffStrategy::Linear => initial_ms.saturating_mul(attempts as u64),
        };
        Duration::from_millis(raw_ms).min(self.cap)
    }

    /// Delay plus a small positive jitter to spread simultaneous retries.
    pub fn delay_with_jitter(&self, attempts: u32) -> Duration {
        let base = self.delay_for(attempts);
        let jitter_span = (base.as_millis() as u64 / 10).min(250);
        if jitter_span == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_span);
        base + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_per_attempt() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn test_exponential_hits_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
        // Shift overflow saturates instead of wrapping.
        assert_eq!(policy.delay_for(80), Duration::from_secs(30));
    }

    #[test]
    fn test_linear_grows_per_attempt() {
        let policy = BackoffPolicy {
            strategy: BackoffStrategy::Linear,
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let policy = BackoffPolicy::default();
        for _ in 0..50 {
            let with_jitter = policy.delay_with_jitter(2);
            let base = policy.delay_for(2);
            assert!(with_jitter >= base);
            assert!(with_jitter <= base + Duration::from_millis(250));
        }
    }
}
