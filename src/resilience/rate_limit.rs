//! # Rate Limiter
//! Token-bucket admission control for one upstream service.
//!
//! The bucket starts full and refills continuously at `rate` tokens per
//! second, capped at `burst`. `try_acquire` is a non-blocking check;
//! `acquire` polls until tokens are available. Refill bookkeeping uses a
//! monotonic clock and is serialized behind a mutex.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Thread-safe token bucket.
#[derive(Debug)]
pub struct RateLimiter {
    inner: Mutex<Inner>,
    rate: f64,
    burst: f64,
}

#[derive(Debug)]
struct Inner {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a bucket refilling at `rate` tokens/second with `burst` capacity.
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst).max(0.0);
        Self {
            inner: Mutex::new(Inner {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            rate: rate.max(0.0),
            burst,
        }
    }

    /// Take `tokens` if the bucket holds them. Never blocks.
    pub fn try_acquire(&self, tokens: f64) -> bool {
        let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut inner);
        if inner.tokens >= tokens {
            inner.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Wait until `tokens` can be taken, polling every 100 ms.
    pub async fn acquire(&self, tokens: f64) {
        loop {
            if self.try_acquire(tokens) {
                return;
            }
            debug!(need = tokens, "rate limiter saturated, waiting");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Tokens currently available (after refill). Diagnostic only.
    pub fn available(&self) -> f64 {
        let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut inner);
        inner.tokens
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    fn refill(&self, inner: &mut Inner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.rate).min(self.burst);
        inner.last_refill = now;
    }
}
