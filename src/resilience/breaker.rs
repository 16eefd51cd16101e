//! # Circuit Breaker
//! CLOSED → OPEN → HALF_OPEN failure isolation for one upstream service.
//!
//! CLOSED counts consecutive counted failures; at `failure_threshold` the
//! circuit opens and calls fail fast (the guarded operation is not invoked)
//! until `timeout` elapses. The first call after that runs in HALF_OPEN
//! probation: three consecutive successes close the circuit, any failure
//! reopens it with a fresh timeout window. Errors outside the counted set
//! pass through without touching breaker state.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};

use super::{CallError, ErrorKind};

/// Successes required in HALF_OPEN before the circuit closes again.
const HALF_OPEN_SUCCESSES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Counted failures that trip the circuit.
    pub failure_threshold: u32,
    /// Cool-down before an OPEN circuit allows a probe call.
    pub timeout: Duration,
    /// Error kinds the breaker tracks; anything else passes through untouched.
    pub counted_kinds: Vec<ErrorKind>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            counted_kinds: vec![ErrorKind::Transient],
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    open_until: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn fresh() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            open_until: None,
            last_failure_at: None,
            next_attempt_at: None,
        }
    }
}

/// Point-in-time view of one breaker, for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub timeout_secs: u64,
}

/// Per-service circuit breaker. State mutations are serialized behind a mutex;
/// the lock is never held across the guarded call.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            state: Mutex::new(BreakerState::fresh()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Run `op` under the breaker. Fails fast with `CallError::CircuitOpen`
    /// while the circuit is open; otherwise forwards the operation's result
    /// after recording it.
    pub async fn call<T, Fut>(&self, op: Fut) -> Result<T, CallError>
    where
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.before_call()?;
        match op.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if self.config.counted_kinds.contains(&err.kind()) {
                    self.on_failure();
                }
                Err(err)
            }
        }
    }

    fn before_call(&self) -> Result<(), CallError> {
        let mut st = self.state.lock().expect("circuit breaker mutex poisoned");
        if st.state == CircuitState::Open {
            let now = Instant::now();
            match st.open_until {
                Some(until) if now < until => {
                    return Err(CallError::CircuitOpen {
                        service: self.service.clone(),
                        retry_in: until - now,
                    });
                }
                _ => {
                    st.state = CircuitState::HalfOpen;
                    st.success_count = 0;
                    info!(service = %self.service, "circuit half-open, probing");
                    counter!(
                        "breaker_transitions_total",
                        "service" => self.service.clone(),
                        "to" => "half_open"
                    )
                    .increment(1);
                }
            }
        }
        Ok(())
    }

    fn on_success(&self) {
        let mut st = self.state.lock().expect("circuit breaker mutex poisoned");
        match st.state {
            CircuitState::HalfOpen => {
                st.success_count += 1;
                if st.success_count >= HALF_OPEN_SUCCESSES {
                    st.state = CircuitState::Closed;
                    st.failure_count = 0;
                    st.success_count = 0;
                    st.open_until = None;
                    st.next_attempt_at = None;
                    info!(service = %self.service, "circuit closed after probation");
                    counter!(
                        "breaker_transitions_total",
                        "service" => self.service.clone(),
                        "to" => "closed"
                    )
                    .increment(1);
                }
            }
            CircuitState::Closed => {
                st.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut st = self.state.lock().expect("circuit breaker mutex poisoned");
        st.failure_count += 1;
        st.last_failure_at = Some(Utc::now());
        let trip = st.state == CircuitState::HalfOpen
            || st.failure_count >= self.config.failure_threshold;
        if trip && st.state != CircuitState::Open {
            st.state = CircuitState::Open;
            st.open_until = Some(Instant::now() + self.config.timeout);
            let cool_down = chrono::Duration::from_std(self.config.timeout)
                .unwrap_or_else(|_| chrono::Duration::zero());
            st.next_attempt_at = Some(Utc::now() + cool_down);
            warn!(
                service = %self.service,
                failures = st.failure_count,
                timeout_secs = self.config.timeout.as_secs(),
                "circuit opened"
            );
            counter!(
                "breaker_transitions_total",
                "service" => self.service.clone(),
                "to" => "open"
            )
            .increment(1);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().expect("circuit breaker mutex poisoned").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let st = self.state.lock().expect("circuit breaker mutex poisoned");
        BreakerSnapshot {
            service: self.service.clone(),
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            last_failure_at: st.last_failure_at,
            next_attempt_at: st.next_attempt_at,
            failure_threshold: self.config.failure_threshold,
            timeout_secs: self.config.timeout.as_secs(),
        }
    }

    /// Force the circuit back to a fresh CLOSED state (admin surface).
    pub fn reset(&self) {
        let mut st = self.state.lock().expect("circuit breaker mutex poisoned");
        *st = BreakerState::fresh();
        info!(service = %self.service, "circuit manually reset");
    }
}
