//! # Retry Policy
//! Bounded retries with exponential/linear/fixed backoff, optional jitter and
//! an optional terminal fallback.
//!
//! Only transient-class failures are retried; a malformed upstream response
//! aborts the loop immediately (replaying the call cannot fix it). A breaker
//! fast-fail counts as a failed attempt and waits out the same backoff.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::breaker::CircuitBreaker;
use super::{CallError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Exponential,
    Linear,
    Fixed,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (min 1).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor for exponential backoff.
    pub exponential_base: f64,
    /// Multiply each delay by a uniform factor in [0.5, 1.0].
    pub jitter: bool,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Pre-jitter delay in seconds after failed attempt `attempt` (1-based),
    /// capped at `max_delay`. Pure; the schedule tests pin this down.
    pub fn raw_delay_secs(&self, attempt: u32) -> f64 {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs_f64();
        let raw = match self.backoff {
            Backoff::Exponential => base * self.exponential_base.powi(attempt as i32 - 1),
            Backoff::Linear => base * attempt as f64,
            Backoff::Fixed => base,
        };
        raw.min(self.max_delay.as_secs_f64())
    }

    /// Delay to sleep after failed attempt `attempt`, jittered when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut secs = self.raw_delay_secs(attempt);
        if self.jitter {
            secs *= rand::thread_rng().gen_range(0.5..=1.0);
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Drive `op` to success or attempt exhaustion. Each attempt runs through
    /// `breaker` when one is supplied.
    pub async fn run<T, F, Fut>(
        &self,
        breaker: Option<&CircuitBreaker>,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err: Option<CallError> = None;

        for attempt in 1..=attempts {
            let result = match breaker {
                Some(b) => b.call(op()).await,
                None => op().await,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.kind() == ErrorKind::Malformed {
                warn!(attempt, error = %err, "malformed response, not retrying");
                return Err(err);
            }

            warn!(attempt, max = attempts, error = %err, "attempt failed");
            counter!("retry_attempts_failed_total").increment(1);
            last_err = Some(err);

            if attempt < attempts {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| CallError::transient("retry loop exhausted")))
    }

    /// Like [`run`](Self::run), but serves `fallback` once attempts are
    /// exhausted. Errors only if the fallback errors too.
    pub async fn run_with_fallback<T, F, Fut, FB, FbFut>(
        &self,
        breaker: Option<&CircuitBreaker>,
        op: F,
        fallback: FB,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, CallError>>,
    {
        match self.run(breaker, op).await {
            Ok(value) => Ok(value),
            Err(err) => {
                info!(error = %err, "attempts exhausted, serving fallback");
                counter!("retry_fallback_served_total").increment(1);
                fallback().await
            }
        }
    }
}
