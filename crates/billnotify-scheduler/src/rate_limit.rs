//! Outbound rate limiting shared by all workers.
//!
//! [`TokenBucket`] allows bursts up to its capacity and refills continuously
//! at the steady rate. It reads `tokio::time::Instant`, so tests with a
//! paused runtime clock are deterministic.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Shared throttle consulted before every dequeue.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until one token is available and take it.
    async fn acquire(&self);

    /// Take one token if available right now.
    fn try_acquire(&self) -> bool;
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: `rate_per_sec` steady refill, `burst` capacity.
#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A full bucket. Zero rate or burst is clamped to 1.
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate_per_sec: f64::from(rate_per_sec.max(1)),
            burst,
            state: Mutex::new(BucketState { tokens: burst, last_refill: Instant::now() }),
        }
    }

    pub fn rate_per_sec(&self) -> f64 {
        self.rate_per_sec
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Refill, then take a token or report how long until one is available.
    fn take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.rate_per_sec))
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn acquire(&self) {
        loop {
            match self.take() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }
}

/// Always-ready limiter for tests and one-shot CLI runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn acquire(&self) {}

    fn try_acquire(&self) -> bool {
        true
    }
}
