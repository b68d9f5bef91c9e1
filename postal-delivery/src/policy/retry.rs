//! Retry scheduling for failed dispatch attempts
//!
//! The delay before retry `n` (1-based) is
//! `min(base * 2^(n - 1) * (1 ± jitter), max_delay)`, and the record's next
//! due time never moves backwards.

use std::time::Duration;

use postal_common::clock::millis;
use rand::Rng;
use serde::{Deserialize, Serialize};

mod defaults {
    pub const fn max_retries() -> u32 {
        16
    }

    pub const fn base_delay_ms() -> u64 {
        1_000
    }

    pub const fn max_delay_ms() -> u64 {
        3_600_000
    }

    pub const fn jitter_factor() -> f64 {
        0.2
    }
}

/// How failed attempts are rescheduled and when a record is given up on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts after which a record moves to `DEAD`
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay (milliseconds)
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Relative randomisation of each delay, `0.2` means ±20%
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Whether a record with `retries` failed attempts gets another one
    #[must_use]
    pub const fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    #[must_use]
    pub const fn remaining(&self, retries: u32) -> u32 {
        self.max_retries.saturating_sub(retries)
    }

    /// Delay before the attempt following failure number `retries`
    #[must_use]
    pub fn backoff(&self, retries: u32) -> Duration {
        let exponent = retries.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_delay_ms
        } else {
            self.base_delay_ms
                .saturating_mul(1u64 << exponent)
                .min(self.max_delay_ms)
        };

        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        if jitter <= 0.0 || delay == 0 {
            return Duration::from_millis(delay);
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = {
            let spread = delay as f64 * jitter;
            let offset: f64 = rand::rng().random_range(-spread..=spread);
            (delay as f64 + offset).max(0.0) as u64
        };

        Duration::from_millis(jittered.min(self.max_delay_ms))
    }

    /// Next due time after failure number `retries` at `now`
    ///
    /// Never earlier than `previous`.
    #[must_use]
    pub fn next_retry_at(&self, previous: i64, now: i64, retries: u32) -> i64 {
        previous.max(now.saturating_add(millis(self.backoff(retries))))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn exact(base_delay_ms: u64, max_delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay_ms,
            max_delay_ms,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn exponential_and_capped() {
        let policy = exact(100, 1_000);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(200), Duration::from_millis(1_000));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter_factor: 0.25,
            ..exact(1_000, 60_000)
        };
        for _ in 0..200 {
            let delay = policy.backoff(2).as_millis();
            assert!((1_500..=2_500).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn jitter_never_exceeds_cap() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..exact(1_000, 1_000)
        };
        for _ in 0..200 {
            assert!(policy.backoff(10) <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn next_retry_never_moves_backwards() {
        let policy = exact(100, 1_000);
        assert_eq!(policy.next_retry_at(0, 5_000, 1), 5_100);
        assert_eq!(policy.next_retry_at(9_000, 5_000, 1), 9_000);
    }

    #[test]
    fn retry_budget() {
        let policy = exact(1, 1);
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert_eq!(policy.remaining(3), 2);
        assert_eq!(policy.remaining(9), 0);
    }
}
