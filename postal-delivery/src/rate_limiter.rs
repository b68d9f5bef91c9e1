//! Per-topic send throttling with token buckets
//!
//! Each topic owns a bucket holding up to `burst_size` tokens that refills at
//! `messages_per_second`. A send takes one token; when none is left the caller
//! learns how long until the next one and may wait for it, up to a bound.
//! Throttling is independent of retry: a throttled dispatcher attempt is put
//! back without counting as a failure.

use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

mod defaults {
    pub const fn messages_per_second() -> f64 {
        50.0
    }

    pub const fn burst_size() -> u32 {
        100
    }

    pub const fn max_wait_ms() -> u64 {
        1_000
    }
}

/// Rate limit settings, applied per topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained sends per second for topics without an override
    #[serde(default = "defaults::messages_per_second")]
    pub messages_per_second: f64,

    /// Tokens available for a burst
    #[serde(default = "defaults::burst_size")]
    pub burst_size: u32,

    /// Longest a send waits for a token before giving up (milliseconds)
    #[serde(default = "defaults::max_wait_ms")]
    pub max_wait_ms: u64,

    /// Per-topic overrides
    #[serde(default)]
    pub topics: AHashMap<String, TopicRateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_second: defaults::messages_per_second(),
            burst_size: defaults::burst_size(),
            max_wait_ms: defaults::max_wait_ms(),
            topics: AHashMap::default(),
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Override for a single topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRateLimit {
    pub messages_per_second: f64,
    pub burst_size: u32,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    fn full(messages_per_second: f64, burst_size: u32) -> Self {
        let capacity = f64::from(burst_size.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_rate: messages_per_second,
            refilled_at: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.refilled_at = now;
    }

    /// Take a token, or report how long until one is available
    fn take(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }

        if self.refill_rate <= 0.0 {
            return Err(Duration::MAX);
        }

        Err(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate))
    }
}

/// Token bucket rate limiter keyed by topic
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn bucket(&self, topic: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(topic) {
            return Arc::clone(&bucket);
        }

        self.buckets
            .entry(topic.to_string())
            .or_insert_with(|| {
                let bucket = self.config.topics.get(topic).map_or_else(
                    || TokenBucket::full(self.config.messages_per_second, self.config.burst_size),
                    |limit| TokenBucket::full(limit.messages_per_second, limit.burst_size),
                );
                Arc::new(Mutex::new(bucket))
            })
            .clone()
    }

    /// Take a token for `topic` without waiting
    ///
    /// # Errors
    /// The time until the next token when the bucket is empty
    pub fn check_rate_limit(&self, topic: &str) -> Result<(), Duration> {
        let result = self.bucket(topic).lock().take();
        if let Err(wait) = result {
            tracing::debug!(
                topic,
                wait_ms = wait.as_millis(),
                "Rate limit reached"
            );
        }
        result
    }

    /// Take a token for `topic`, sleeping for it if it arrives within `max_wait`
    ///
    /// # Errors
    /// The remaining wait when a token would arrive later than `max_wait`
    pub async fn acquire(&self, topic: &str, max_wait: Duration) -> Result<(), Duration> {
        let started = Instant::now();

        loop {
            let wait = match self.check_rate_limit(topic) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let remaining = max_wait.saturating_sub(started.elapsed());
            if wait > remaining {
                return Err(wait);
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// Current bucket state for `topic`, `None` if the topic was never used
    #[must_use]
    pub fn stats(&self, topic: &str) -> Option<RateLimitStats> {
        self.buckets.get(topic).map(|bucket| {
            let mut bucket = bucket.lock();
            bucket.refill();
            RateLimitStats {
                available_tokens: bucket.tokens,
                capacity: bucket.capacity,
                refill_rate: bucket.refill_rate,
            }
        })
    }
}

/// Snapshot of one topic's bucket
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    pub available_tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
}
