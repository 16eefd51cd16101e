// tests/resilience_flow.rs
// Breaker lifecycle, retry/breaker interplay and the shared registry,
// exercised through the public crate surface.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use narrapulse::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FallbackCache, RateLimiter, RetryPolicy,
};
use narrapulse::{CallError, ResilienceContext};

fn cfg(threshold: u32, timeout_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: threshold,
        timeout: Duration::from_millis(timeout_ms),
        ..CircuitBreakerConfig::default()
    }
}

#[tokio::test]
async fn breaker_opens_at_threshold_and_skips_the_operation() {
    let breaker = CircuitBreaker::new("gateway", cfg(3, 60_000));
    let invocations = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let n = Arc::clone(&invocations);
        let _ = breaker
            .call(async move {
                n.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CallError::transient("upstream 503"))
            })
            .await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    // While open the wrapped future must not run.
    let n = Arc::clone(&invocations);
    let err = breaker
        .call(async move {
            n.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CallError>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::CircuitOpen { .. }));
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn breaker_closes_after_three_probe_successes() {
    let breaker = CircuitBreaker::new("gateway", cfg(2, 40));
    for _ in 0..2 {
        let _ = breaker
            .call(async { Err::<(), _>(CallError::transient("boom")) })
            .await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(70)).await;
    for i in 0..3 {
        breaker
            .call(async { Ok::<_, CallError>(()) })
            .await
            .unwrap();
        if i < 2 {
            assert_eq!(breaker.state(), CircuitState::HalfOpen);
        }
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().failure_count, 0);
}

#[tokio::test]
async fn breaker_reopens_on_probe_failure() {
    let breaker = CircuitBreaker::new("gateway", cfg(2, 40));
    for _ in 0..2 {
        let _ = breaker
            .call(async { Err::<(), _>(CallError::transient("boom")) })
            .await;
    }
    tokio::time::sleep(Duration::from_millis(70)).await;

    let _ = breaker
        .call(async { Err::<(), _>(CallError::transient("still down")) })
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn retry_against_open_circuit_never_invokes_the_operation() {
    let breaker = CircuitBreaker::new("gateway", cfg(1, 60_000));
    let _ = breaker
        .call(async { Err::<(), _>(CallError::transient("boom")) })
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);

    let invocations = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(
        4,
        Duration::from_millis(1),
        Duration::from_millis(1),
    )
    .without_jitter();
    let n = Arc::clone(&invocations);
    let err = policy
        .run(Some(&breaker), || {
            let n = Arc::clone(&n);
            async move {
                n.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, _>(7)
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::CircuitOpen { .. }));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_serves_fallback_once_attempts_are_exhausted() {
    let policy = RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(1),
    )
    .without_jitter();
    let value = policy
        .run_with_fallback(
            None,
            || async { Err::<&str, _>(CallError::transient("down")) },
            || async { Ok("stale-but-served") },
        )
        .await
        .unwrap();
    assert_eq!(value, "stale-but-served");
}

#[tokio::test]
async fn malformed_responses_abort_the_retry_loop() {
    let attempts = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(
        5,
        Duration::from_millis(1),
        Duration::from_millis(1),
    )
    .without_jitter();
    let n = Arc::clone(&attempts);
    let err = policy
        .run(None, || {
            let n = Arc::clone(&n);
            async move {
                n.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CallError::malformed("bad json"))
            }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Malformed(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn limiter_two_burst_then_half_second_wait() {
    let limiter = RateLimiter::new(2.0, 2);
    assert!(limiter.try_acquire(1.0));
    assert!(limiter.try_acquire(1.0));
    assert!(!limiter.try_acquire(1.0));

    let started = Instant::now();
    limiter.acquire(1.0).await;
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(400), "waited {waited:?}");
    assert!(waited < Duration::from_secs(2), "waited {waited:?}");
}

#[tokio::test]
async fn fallback_cache_expires_and_evicts() {
    let cache: FallbackCache<String> = FallbackCache::new();
    cache.set("sol", "cached".to_string(), Duration::from_millis(30));
    assert_eq!(cache.get("sol"), Some("cached".to_string()));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.get("sol"), None);
    assert_eq!(cache.len(), 0);
}

#[tokio::test]
async fn context_registry_shares_instances_and_resets() {
    let ctx = ResilienceContext::with_default_services();

    let a = ctx.breaker("news_scrape");
    let b = ctx.breaker("news_scrape");
    assert!(Arc::ptr_eq(&a, &b));

    let _ = a
        .call(async { Err::<(), _>(CallError::transient("boom")) })
        .await;
    assert_eq!(a.snapshot().failure_count, 1);
    assert!(ctx.reset_breaker("news_scrape"));
    assert_eq!(a.snapshot().failure_count, 0);
    assert!(!ctx.reset_breaker("unknown_service"));

    let snapshots = ctx.breaker_snapshots();
    assert!(snapshots.iter().any(|s| s.service == "news_scrape"));
}
