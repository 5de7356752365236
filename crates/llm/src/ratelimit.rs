//! Token-bucket rate gates
//!
//! One bucket per external service (embedding, generation, judge). A task
//! that finds its bucket empty suspends until a token refills; it only fails
//! once the configured wait cap elapses, which surfaces as `QuotaExhausted`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use sodam_config::RateLimitConfig;

use crate::LlmError;

/// An async token bucket.
pub struct TokenBucket {
    name: &'static str,
    capacity: u32,
    refill_interval: Duration,
    max_wait: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(name: &'static str, capacity: u32, refill_interval: Duration, max_wait: Duration) -> Self {
        Self {
            name,
            capacity,
            refill_interval,
            max_wait,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, suspending while the bucket is empty.
    pub async fn acquire(&self) -> Result<(), LlmError> {
        let deadline = Instant::now() + self.max_wait;

        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                // Time until one token is available; floored so fractional
                // balances cannot spin the loop.
                self.refill_interval
                    .mul_f64((1.0 - state.tokens).max(0.05))
            };

            let now = Instant::now();
            if now + wait > deadline {
                tracing::warn!(bucket = self.name, "rate-limit wait cap exceeded");
                return Err(LlmError::QuotaExhausted(self.name.to_string()));
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (after refill); test and metrics hook.
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens as u32
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed();
        if elapsed >= self.refill_interval {
            let refilled = elapsed.as_secs_f64() / self.refill_interval.as_secs_f64();
            state.tokens = (state.tokens + refilled).min(self.capacity as f64);
            state.last_refill = Instant::now();
        }
    }
}

/// The process-wide gate set, initialized once at startup.
#[derive(Clone)]
pub struct RateGates {
    pub embedding: Arc<TokenBucket>,
    pub generation: Arc<TokenBucket>,
    pub judge: Arc<TokenBucket>,
}

impl RateGates {
    pub fn new(config: &RateLimitConfig) -> Self {
        let refill = Duration::from_millis(config.refill_ms);
        let max_wait = Duration::from_secs(config.max_wait_s);
        Self {
            embedding: Arc::new(TokenBucket::new(
                "embedding",
                config.embedding_capacity,
                refill,
                max_wait,
            )),
            generation: Arc::new(TokenBucket::new(
                "generation",
                config.generation_capacity,
                refill,
                max_wait,
            )),
            judge: Arc::new(TokenBucket::new("judge", config.judge_capacity, refill, max_wait)),
        }
    }
}

impl Default for RateGates {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_under_capacity() {
        let bucket = TokenBucket::new(
            "test",
            3,
            Duration::from_millis(50),
            Duration::from_secs(1),
        );
        for _ in 0..3 {
            bucket.acquire().await.unwrap();
        }
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test]
    async fn test_empty_bucket_suspends_then_succeeds() {
        tokio::time::pause();
        let bucket = TokenBucket::new(
            "test",
            1,
            Duration::from_millis(100),
            Duration::from_secs(5),
        );
        bucket.acquire().await.unwrap();
        // Bucket now empty; acquire should suspend across the refill and
        // succeed rather than fail.
        bucket.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_cap_surfaces_quota_exhausted() {
        tokio::time::pause();
        let bucket = TokenBucket::new(
            "judge",
            1,
            Duration::from_secs(60),
            Duration::from_millis(10),
        );
        bucket.acquire().await.unwrap();
        let err = bucket.acquire().await.unwrap_err();
        assert!(matches!(err, LlmError::QuotaExhausted(name) if name == "judge"));
    }

    #[test]
    fn test_gate_set_from_config() {
        let gates = RateGates::default();
        assert!(gates.generation.available() > 0);
    }
}
