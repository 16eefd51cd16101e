//! # Resilience Layer
//! Fault-tolerance primitives guarding every external call: token-bucket
//! rate limiting, circuit breaking, bounded retries and TTL fallback caching.
//!
//! Everything hangs off an explicit [`ResilienceContext`] that callers build
//! and inject. There are no module-level registries; two contexts never share
//! state, which keeps tests hermetic and lets an embedder run several
//! isolated stacks side by side.

pub mod breaker;
pub mod cache;
pub mod rate_limit;
pub mod retry;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use cache::{CacheEntryInfo, CacheStats, FallbackCache};
pub use rate_limit::RateLimiter;
pub use retry::{Backoff, RetryPolicy};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

/// Canonical upstream service names used across the pipeline.
pub mod service {
    pub const CLASSIFIER: &str = "classifier";
    pub const NEWS_SEARCH: &str = "news_search";
    pub const NEWS_SCRAPE: &str = "news_scrape";
    pub const MARKET_DATA: &str = "market_data";
}

/// Failure classes for guarded calls. The breaker counts `Transient` by
/// default; `Malformed` marks contract violations that retrying cannot fix.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("malformed upstream response: {0}")]
    Malformed(String),
    #[error("circuit `{service}` open, retry in {retry_in:?}")]
    CircuitOpen { service: String, retry_in: Duration },
    #[error("rate limited")]
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Malformed,
    CircuitOpen,
    RateLimited,
}

impl CallError {
    pub fn transient(msg: impl Into<String>) -> Self {
        CallError::Transient(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        CallError::Malformed(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Transient(_) => ErrorKind::Transient,
            CallError::Malformed(_) => ErrorKind::Malformed,
            CallError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            CallError::RateLimited => ErrorKind::RateLimited,
        }
    }
}

/// Type-erased view over a typed [`FallbackCache`], so the context can expose
/// one status/clear surface across caches holding different value types.
pub trait CacheInspect: Send + Sync {
    fn stats(&self) -> CacheStats;
    fn clear(&self) -> usize;
}

impl<V: Send + 'static> CacheInspect for FallbackCache<V> {
    fn stats(&self) -> CacheStats {
        FallbackCache::stats(self)
    }

    fn clear(&self) -> usize {
        FallbackCache::clear(self)
    }
}

/// Registry of named breakers, limiters and fallback caches.
///
/// Lookup is get-or-create: asking for an unknown service installs one with
/// default tuning, so callers never have to pre-declare services they talk to.
#[derive(Default)]
pub struct ResilienceContext {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    caches: RwLock<HashMap<String, Arc<dyn CacheInspect>>>,
}

impl ResilienceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context pre-tuned for the services this pipeline talks to.
    pub fn with_default_services() -> Self {
        let ctx = Self::new();
        ctx.breaker_with(service::CLASSIFIER, CircuitBreakerConfig::default());
        ctx.breaker_with(service::NEWS_SEARCH, CircuitBreakerConfig::default());
        ctx.breaker_with(
            service::NEWS_SCRAPE,
            CircuitBreakerConfig {
                failure_threshold: 8,
                timeout: Duration::from_secs(180),
                ..CircuitBreakerConfig::default()
            },
        );
        ctx.breaker_with(service::MARKET_DATA, CircuitBreakerConfig::default());

        ctx.limiter_with(service::CLASSIFIER, 2.0, 5);
        ctx.limiter_with(service::NEWS_SEARCH, 5.0, 10);
        ctx.limiter_with(service::NEWS_SCRAPE, 5.0, 10);
        ctx.limiter_with(service::MARKET_DATA, 10.0, 20);
        ctx
    }

    /// Breaker for `service`, installing one with default config on first use.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self
            .breakers
            .read()
            .expect("breaker registry lock poisoned")
            .get(service)
        {
            return Arc::clone(b);
        }
        self.breaker_with(service, CircuitBreakerConfig::default())
    }

    /// Breaker for `service` with explicit config; an already-registered
    /// breaker wins (first registration is authoritative).
    pub fn breaker_with(&self, service: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut map = self.breakers.write().expect("breaker registry lock poisoned");
        Arc::clone(
            map.entry(service.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(service, config))),
        )
    }

    /// Limiter for `service`, installing a conservative 1 token/s, burst 5
    /// bucket on first use.
    pub fn limiter(&self, service: &str) -> Arc<RateLimiter> {
        if let Some(l) = self
            .limiters
            .read()
            .expect("limiter registry lock poisoned")
            .get(service)
        {
            return Arc::clone(l);
        }
        self.limiter_with(service, 1.0, 5)
    }

    pub fn limiter_with(&self, service: &str, rate: f64, burst: u32) -> Arc<RateLimiter> {
        let mut map = self.limiters.write().expect("limiter registry lock poisoned");
        Arc::clone(
            map.entry(service.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::new(rate, burst))),
        )
    }

    /// Snapshots of every registered breaker, sorted by service name.
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        let map = self.breakers.read().expect("breaker registry lock poisoned");
        let mut snaps: Vec<BreakerSnapshot> = map.values().map(|b| b.snapshot()).collect();
        snaps.sort_by(|a, b| a.service.cmp(&b.service));
        snaps
    }

    /// Manually close one breaker. False if the service is unknown.
    pub fn reset_breaker(&self, service: &str) -> bool {
        let map = self.breakers.read().expect("breaker registry lock poisoned");
        match map.get(service) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every breaker that is not already CLOSED; returns how many moved.
    pub fn reset_all_breakers(&self) -> usize {
        let map = self.breakers.read().expect("breaker registry lock poisoned");
        let mut moved = 0;
        for b in map.values() {
            if b.state() != CircuitState::Closed {
                b.reset();
                moved += 1;
            }
        }
        moved
    }

    /// Register a typed cache under a name so it shows up in the status
    /// surface. Owners keep the typed handle; the context keeps the erased one.
    pub fn register_cache(&self, name: &str, cache: Arc<dyn CacheInspect>) {
        let mut map = self.caches.write().expect("cache registry lock poisoned");
        map.insert(name.to_string(), cache);
    }

    /// Per-cache stats, sorted by cache name.
    pub fn cache_stats(&self) -> Vec<(String, CacheStats)> {
        let map = self.caches.read().expect("cache registry lock poisoned");
        let mut stats: Vec<(String, CacheStats)> =
            map.iter().map(|(name, c)| (name.clone(), c.stats())).collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Clear every registered cache; returns total entries removed.
    pub fn clear_caches(&self) -> usize {
        let map = self.caches.read().expect("cache registry lock poisoned");
        let removed: usize = map.values().map(|c| c.clear()).sum();
        info!(removed, "fallback caches cleared");
        removed
    }
}
