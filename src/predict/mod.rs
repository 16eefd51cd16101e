//! # Prediction
//! Probability-of-upward-move per bucket. Scores with the active trained
//! artifact when one exists and fits the feature contract; otherwise a
//! deterministic rule-based estimator takes over. `predict` is total: model
//! lookup or scoring trouble degrades, it never errors out.

pub mod features;
pub mod train;

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use metrics::{counter, gauge};
use tracing::{debug, warn};

use crate::store::Store;
use crate::types::{round3, Bucket, Confidence, ModelRecord, Prediction};

pub use features::{feature_vector, FEATURE_COUNT, FEATURE_NAMES};
pub use train::{
    synthetic_label, train_model, TrainOutcome, TrainRow, DEFAULT_HOLDOUT, DEFAULT_MIN_SAMPLES,
};

/// Real labels at or above this count switch training off the synthetic
/// bootstrap path.
pub const SYNTHETIC_LABEL_CEILING: usize = 10;

pub struct PredictionEngine {
    store: Arc<dyn Store>,
    min_samples: usize,
    holdout: f64,
}

impl PredictionEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            min_samples: DEFAULT_MIN_SAMPLES,
            holdout: DEFAULT_HOLDOUT,
        }
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples.max(2);
        self
    }

    /// Score one bucket. Trained path when the active model loads and its
    /// shape matches; rule-based default otherwise.
    pub async fn predict(&self, bucket: &Bucket) -> Prediction {
        let features = features::feature_vector(bucket);
        match self.store.active_model().await {
            Ok(Some(record)) => {
                if let Some(raw) = train::score_with(&record.params, &features) {
                    counter!("predictions_total", "path" => "model").increment(1);
                    return model_prediction(bucket, &record, raw, &features);
                }
                warn!(
                    version = %record.version,
                    "active model shape mismatch, using rule-based estimator"
                );
            }
            Ok(None) => debug!(token = %bucket.token, "no active model, using rule-based estimator"),
            Err(error) => warn!(%error, "model lookup failed, using rule-based estimator"),
        }
        counter!("predictions_total", "path" => "rules").increment(1);
        rule_based(bucket)
    }

    /// Train from real labels joined against their stored buckets. A trained
    /// artifact is saved and becomes the active model.
    pub async fn train_from_labels(&self) -> Result<TrainOutcome> {
        let labels = self.store.all_labels().await?;
        let mut rows = Vec::with_capacity(labels.len());
        for label in &labels {
            if let Some(bucket) = self.store.bucket_at(&label.token, label.bucket_ts).await? {
                rows.push(TrainRow {
                    features: features::feature_vector(&bucket),
                    label: label.label_binary,
                });
            }
        }
        let outcome = train_model(&rows, self.min_samples, self.holdout, false);
        self.save_if_trained(&outcome, "false").await?;
        Ok(outcome)
    }

    /// Bootstrap path: pseudo-label recent buckets with the heuristic score
    /// and fit on those. The record is flagged `synthetic`; callers gate this
    /// on real labels being scarce.
    pub async fn bootstrap_synthetic(
        &self,
        tokens: &[String],
        hours_back: i64,
    ) -> Result<TrainOutcome> {
        let since = Utc::now() - Duration::hours(hours_back);
        let mut rows = Vec::new();
        for token in tokens {
            for bucket in self.store.buckets_for_token_since(token, since).await? {
                rows.push(TrainRow {
                    features: features::feature_vector(&bucket),
                    label: train::synthetic_label(&bucket),
                });
            }
        }
        let outcome = train_model(&rows, self.min_samples, self.holdout, true);
        self.save_if_trained(&outcome, "true").await?;
        Ok(outcome)
    }

    /// Pick the training path by label volume: real labels once there are at
    /// least [`SYNTHETIC_LABEL_CEILING`] of them, the synthetic bootstrap
    /// before that.
    pub async fn auto_train(&self, tokens: &[String], hours_back: i64) -> Result<TrainOutcome> {
        let real_labels = self.store.all_labels().await?.len();
        if real_labels >= SYNTHETIC_LABEL_CEILING {
            self.train_from_labels().await
        } else {
            self.bootstrap_synthetic(tokens, hours_back).await
        }
    }

    async fn save_if_trained(&self, outcome: &TrainOutcome, synthetic: &'static str) -> Result<()> {
        match outcome {
            TrainOutcome::Trained(record) => {
                self.store.save_model(record.clone()).await?;
                counter!("models_trained_total", "synthetic" => synthetic).increment(1);
                gauge!("model_roc_auc").set(record.metrics.roc_auc);
            }
            TrainOutcome::InsufficientSamples { available, required } => {
                debug!(available, required, "not enough labeled rows to train");
            }
        }
        Ok(())
    }
}

fn model_prediction(
    bucket: &Bucket,
    record: &ModelRecord,
    raw: f64,
    features: &[f64],
) -> Prediction {
    let probability = round3(raw.clamp(0.1, 0.9));
    let score = (probability - 0.5).abs() * 2.0
        + bucket.consensus * 0.2
        + (bucket.narrative_heat.abs() / 5.0).min(0.3);
    let confidence = if score > 0.7 {
        Confidence::High
    } else if score > 0.4 {
        Confidence::Medium
    } else {
        Confidence::Low
    };
    Prediction {
        token: bucket.token.clone(),
        bucket_ts: bucket.bucket_ts,
        probability_up: probability,
        confidence,
        model_version: Some(record.version.clone()),
        attribution: model_attribution(record, features),
    }
}

fn model_attribution(record: &ModelRecord, features: &[f64]) -> Vec<(String, f64)> {
    let masses = train::contribution_masses(&record.params, features);
    let total: f64 = masses.iter().sum();
    let mut entries: Vec<(String, f64)> = record
        .feature_names
        .iter()
        .cloned()
        .zip(masses)
        .filter(|(_, mass)| *mass > 0.0)
        .collect();
    if total > 0.0 {
        for entry in entries.iter_mut() {
            entry.1 = round3(entry.1 / total);
        }
    }
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    entries.truncate(5);
    entries
}

/// Deterministic default estimator. Each term is individually bounded so the
/// final probability stays inside [0.1, 0.9].
pub fn rule_based(bucket: &Bucket) -> Prediction {
    let heat = bucket.narrative_heat;
    let mut p = 0.5 + heat.signum() * (heat.abs() * 0.1).min(0.2);
    if bucket.consensus > 0.5 {
        p += (bucket.consensus - 0.5) * 0.2;
    }
    p += bucket.risk_polarity * 0.15;
    p += (bucket.hype_velocity * 0.1).clamp(-0.1, 0.1);
    let probability = round3(p.clamp(0.1, 0.9));

    let signal = (probability - 0.5).abs();
    let confidence = if signal > 0.3 {
        Confidence::High
    } else if signal > 0.15 {
        Confidence::Medium
    } else {
        Confidence::Low
    };
    Prediction {
        token: bucket.token.clone(),
        bucket_ts: bucket.bucket_ts,
        probability_up: probability,
        confidence,
        model_version: None,
        attribution: rule_attribution(),
    }
}

/// Fixed driver weights of the rule-based path, already normalized.
fn rule_attribution() -> Vec<(String, f64)> {
    [
        ("narrative_heat", 0.3),
        ("consensus", 0.25),
        ("risk_polarity", 0.2),
        ("hype_velocity", 0.15),
        ("signal_strength", 0.1),
    ]
    .into_iter()
    .map(|(name, w)| (name.to_string(), w))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{EventDistribution, EventKind, LogisticParams};
    use chrono::{DateTime, TimeZone};

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 24, h, m, 0).unwrap()
    }

    fn neutral_bucket() -> Bucket {
        Bucket {
            token: "BTC".to_string(),
            bucket_ts: ts(10, 0),
            narrative_heat: 0.0,
            positive_heat: 0.0,
            negative_heat: 0.0,
            hype_velocity: 0.0,
            consensus: 0.0,
            risk_polarity: 0.0,
            event_distribution: EventDistribution::zero(),
            top_event: None,
            article_count: 0,
            avg_source_trust: 0.5,
            avg_novelty: 0.5,
            liquidity_usd: None,
            trades_count_change: None,
            spread_estimate: None,
        }
    }

    fn bullish_bucket(at: DateTime<Utc>) -> Bucket {
        let mut b = neutral_bucket();
        b.bucket_ts = at;
        b.narrative_heat = 2.0;
        b.positive_heat = 2.0;
        b.consensus = 0.8;
        b.hype_velocity = 0.2;
        b.risk_polarity = 0.5;
        b.event_distribution = EventDistribution::single(EventKind::Listing);
        b.top_event = Some(EventKind::Listing);
        b
    }

    fn bearish_bucket(at: DateTime<Utc>) -> Bucket {
        let mut b = neutral_bucket();
        b.bucket_ts = at;
        b.narrative_heat = -2.0;
        b.negative_heat = -2.0;
        b.risk_polarity = -0.5;
        b.event_distribution = EventDistribution::single(EventKind::Hack);
        b.top_event = Some(EventKind::Hack);
        b
    }

    #[test]
    fn neutral_bucket_scores_even_odds() {
        let p = rule_based(&neutral_bucket());
        assert_eq!(p.probability_up, 0.5);
        assert_eq!(p.confidence, Confidence::Low);
        assert!(p.model_version.is_none());
        assert_eq!(p.top_driver().unwrap().0, "narrative_heat");
    }

    #[test]
    fn rule_terms_are_bounded_and_probability_clamped() {
        let mut hot = neutral_bucket();
        hot.narrative_heat = 3.0;
        hot.consensus = 0.9;
        hot.risk_polarity = 0.8;
        hot.hype_velocity = 2.0;
        let p = rule_based(&hot);
        // 0.5 + 0.2 + 0.08 + 0.12 + 0.1 overshoots, then clamps.
        assert_eq!(p.probability_up, 0.9);
        assert_eq!(p.confidence, Confidence::High);

        let mut cold = neutral_bucket();
        cold.narrative_heat = -3.0;
        cold.risk_polarity = -0.9;
        cold.hype_velocity = -2.0;
        let p = rule_based(&cold);
        assert_eq!(p.probability_up, 0.1);
        assert_eq!(p.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn predict_without_model_uses_rules() {
        let engine = PredictionEngine::new(Arc::new(MemoryStore::new()));
        let p = engine.predict(&bullish_bucket(ts(10, 0))).await;
        assert!(p.model_version.is_none());
        assert!(p.probability_up > 0.5);
    }

    #[tokio::test]
    async fn predict_with_saved_model_uses_it_and_attributes_drivers() {
        let store = Arc::new(MemoryStore::new());
        let feature_names: Vec<String> =
            FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        let mut weights = vec![0.0; FEATURE_COUNT];
        weights[0] = 5.0;
        let record = ModelRecord {
            version: "logistic_20250824_090000".to_string(),
            kind: "logistic".to_string(),
            feature_names,
            params: LogisticParams {
                weights,
                intercept: 0.0,
                feature_means: vec![0.0; FEATURE_COUNT],
                feature_stds: vec![1.0; FEATURE_COUNT],
            },
            metrics: crate::types::EvalMetrics {
                accuracy: 0.9,
                precision: 0.9,
                recall: 0.9,
                f1: 0.9,
                roc_auc: 0.9,
                train_samples: 64,
                test_samples: 16,
            },
            synthetic: false,
            is_active: true,
            trained_at: ts(9, 0),
        };
        store.save_model(record).await.unwrap();

        let engine = PredictionEngine::new(store);
        let p = engine.predict(&bullish_bucket(ts(10, 0))).await;
        assert_eq!(p.model_version.as_deref(), Some("logistic_20250824_090000"));
        assert_eq!(p.probability_up, 0.9);
        assert_eq!(p.top_driver().unwrap().0, "narrative_heat");
    }

    #[tokio::test]
    async fn incompatible_model_degrades_to_rules() {
        let store = Arc::new(MemoryStore::new());
        let record = ModelRecord {
            version: "logistic_20250824_090000".to_string(),
            kind: "logistic".to_string(),
            feature_names: vec!["narrative_heat".to_string()],
            params: LogisticParams {
                weights: vec![1.0],
                intercept: 0.0,
                feature_means: vec![0.0],
                feature_stds: vec![1.0],
            },
            metrics: crate::types::EvalMetrics {
                accuracy: 0.5,
                precision: 0.5,
                recall: 0.5,
                f1: 0.5,
                roc_auc: 0.5,
                train_samples: 10,
                test_samples: 3,
            },
            synthetic: false,
            is_active: true,
            trained_at: ts(9, 0),
        };
        store.save_model(record).await.unwrap();

        let engine = PredictionEngine::new(store);
        let p = engine.predict(&neutral_bucket()).await;
        assert!(p.model_version.is_none());
        assert_eq!(p.probability_up, 0.5);
    }

    #[tokio::test]
    async fn bootstrap_trains_a_flagged_synthetic_model() {
        let store = Arc::new(MemoryStore::new());
        let base = Utc::now();
        for i in 0..60i64 {
            let at = base - Duration::minutes(10 * i);
            let bucket = if i % 2 == 0 {
                bullish_bucket(at)
            } else {
                bearish_bucket(at)
            };
            store.upsert_bucket(bucket).await.unwrap();
        }

        let engine = PredictionEngine::new(store.clone()).with_min_samples(40);
        let outcome = engine
            .bootstrap_synthetic(&["BTC".to_string()], 24)
            .await
            .unwrap();
        let record = match outcome {
            TrainOutcome::Trained(r) => r,
            TrainOutcome::InsufficientSamples { .. } => panic!("60 buckets should train"),
        };
        assert!(record.synthetic);
        assert!(record.metrics.accuracy > 0.9);

        let active = store.active_model().await.unwrap().unwrap();
        assert_eq!(active.version, record.version);

        // Scoring now runs through the synthetic artifact.
        let p = engine.predict(&bullish_bucket(base)).await;
        assert_eq!(p.model_version.as_deref(), Some(record.version.as_str()));
        assert!(p.probability_up > 0.5);
    }

    #[tokio::test]
    async fn train_from_labels_needs_enough_rows() {
        let store = Arc::new(MemoryStore::new());
        let engine = PredictionEngine::new(store.clone());
        match engine.train_from_labels().await.unwrap() {
            TrainOutcome::InsufficientSamples { available, .. } => assert_eq!(available, 0),
            TrainOutcome::Trained(_) => panic!("no labels stored"),
        }
        assert!(store.active_model().await.unwrap().is_none());
    }
}
