//! Admission pacing for requests towards the OCR service.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

const MIN_WAIT: Duration = Duration::from_millis(1);

/// Gate called once per admitted task.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until one more request may start.
    async fn acquire(&self);
}

/// Token bucket refilled continuously at `rate` permits per second.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// `burst` caps how many permits can accumulate while idle; a burst of 1 spaces
    /// admissions evenly at `1 / rate` seconds.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: f64::from(per_second.max(1)),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn per_second(per_second: u32) -> Self {
        Self::new(per_second, 1)
    }

    async fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 - f64::EPSILON * 16.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            Ok(())
        } else {
            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.rate);
            Err(wait.max(MIN_WAIT))
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn acquire(&self) {
        while let Err(wait) = self.try_take().await {
            sleep(wait).await;
        }
    }
}

/// Admits immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn acquire(&self) {}
}
