//! # Metrics
//!
//! Prometheus recorder install plus one-time descriptions for every series
//! the engine emits. The recorder is process-global, so a second install
//! (tests, embedding hosts) is downgraded to a warning unless the
//! `strict-metrics` feature is on.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::warn;

/// Install the process-wide Prometheus recorder and register descriptions.
/// Returns the render handle, or `None` when installation failed and
/// `strict-metrics` is off.
pub fn init() -> Option<PrometheusHandle> {
    ensure_described();
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(error) => {
            if cfg!(feature = "strict-metrics") {
                panic!("prometheus: install recorder: {error}");
            }
            warn!(error = %error, "prometheus recorder not installed, series will be dropped");
            None
        }
    }
}

/// One-time metrics registration (so series show up with help text).
fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_articles_total",
            "Articles per ingest pass by outcome (processed/skipped/failed)."
        );
        describe_counter!(
            "search_cache_served_total",
            "Search queries answered from the fallback cache."
        );
        describe_counter!("extract_articles_total", "Articles run through feature extraction.");
        describe_counter!(
            "extract_degraded_total",
            "Extractions that fell back to keyword classification."
        );
        describe_counter!(
            "classifier_calls_total",
            "Event classifier calls by outcome."
        );
        describe_counter!(
            "classifier_fallback_total",
            "Classifier fallbacks served, by stage (cache/rules)."
        );
        describe_counter!(
            "aggregate_buckets_total",
            "Buckets rebuilt by aggregation sweeps."
        );
        describe_counter!(
            "predictions_total",
            "Predictions served, by path (model/rules)."
        );
        describe_counter!(
            "models_trained_total",
            "Models trained and activated, by supervision kind."
        );
        describe_counter!(
            "labels_recorded_total",
            "Outcome labels recorded by the backfill sweep."
        );
        describe_counter!(
            "breaker_transitions_total",
            "Circuit breaker state transitions, by service and target state."
        );
        describe_counter!(
            "retry_attempts_failed_total",
            "Individual retry attempts that failed."
        );
        describe_counter!(
            "retry_fallback_served_total",
            "Calls answered by a fallback after retry exhaustion."
        );
        describe_counter!("scheduler_ticks_total", "Completed scheduler ticks.");
        describe_histogram!("ingest_pass_ms", "Wall time of one token ingest pass.");
        describe_gauge!("narrative_heat", "Latest narrative heat per token.");
        describe_gauge!("model_roc_auc", "Holdout ROC-AUC of the active model.");
        describe_gauge!("scheduler_last_tick_ts", "Unix ts of the last completed tick.");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_is_idempotent() {
        ensure_described();
        ensure_described();
    }

    #[cfg(not(feature = "strict-metrics"))]
    #[serial_test::serial]
    #[test]
    fn second_install_is_tolerated() {
        let first = init();
        let second = init();
        if first.is_some() {
            assert!(second.is_none());
        }
    }
}
