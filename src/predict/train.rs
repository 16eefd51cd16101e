//! In-crate logistic regression trainer. Small, dependency-free on purpose:
//! the artifact contract (versioned records, standardization baked into the
//! params, holdout metrics) matters more than the fit quality an external ML
//! stack would add. The holdout is the time-ordered tail, not a shuffle, so
//! evaluation never peeks at later buckets.

use chrono::Utc;
use tracing::info;

use super::features::{FEATURE_COUNT, FEATURE_NAMES};
use crate::types::{Bucket, EvalMetrics, LogisticParams, ModelRecord};

pub const DEFAULT_MIN_SAMPLES: usize = 50;
pub const DEFAULT_HOLDOUT: f64 = 0.2;

const EPOCHS: usize = 500;
const LEARNING_RATE: f64 = 0.1;
const L2: f64 = 1e-4;

/// One labeled bucket, already mapped to the canonical vector.
#[derive(Debug, Clone)]
pub struct TrainRow {
    pub features: [f64; FEATURE_COUNT],
    pub label: u8,
}

/// Training result. Too little data is a reported outcome, not an error.
#[derive(Debug, Clone)]
pub enum TrainOutcome {
    Trained(ModelRecord),
    InsufficientSamples { available: usize, required: usize },
}

/// Fit, evaluate and package a logistic artifact. `synthetic` marks records
/// fit on heuristic pseudo-labels so their metrics are never mistaken for
/// real-data performance.
pub fn train_model(rows: &[TrainRow], min_samples: usize, holdout: f64, synthetic: bool) -> TrainOutcome {
    if rows.len() < min_samples {
        return TrainOutcome::InsufficientSamples {
            available: rows.len(),
            required: min_samples,
        };
    }

    let test_len = (((rows.len() as f64) * holdout).ceil() as usize).clamp(1, rows.len() - 1);
    let (train, test) = rows.split_at(rows.len() - test_len);

    let (means, stds) = standardize_stats(train);
    let train_x: Vec<Vec<f64>> = train
        .iter()
        .map(|r| standardized(&r.features, &means, &stds))
        .collect();
    let train_y: Vec<u8> = train.iter().map(|r| r.label).collect();
    let (weights, intercept) = fit(&train_x, &train_y);

    let params = LogisticParams {
        weights,
        intercept,
        feature_means: means,
        feature_stds: stds,
    };
    let scores: Vec<f64> = test
        .iter()
        .map(|r| score_standardized(&params, &r.features))
        .collect();
    let labels: Vec<u8> = test.iter().map(|r| r.label).collect();
    let metrics = evaluate(&scores, &labels, train.len());

    let version = format!("logistic_{}", Utc::now().format("%Y%m%d_%H%M%S"));
    info!(
        version,
        synthetic,
        train_samples = metrics.train_samples,
        test_samples = metrics.test_samples,
        accuracy = metrics.accuracy,
        roc_auc = metrics.roc_auc,
        "trained logistic model"
    );
    TrainOutcome::Trained(ModelRecord {
        version,
        kind: "logistic".to_string(),
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        params,
        metrics,
        synthetic,
        is_active: true,
        trained_at: Utc::now(),
    })
}

/// Per-feature |weight × standardized value| masses, the raw material for
/// trained-model attribution. Callers validate shape via [`score_with`].
pub(crate) fn contribution_masses(params: &LogisticParams, features: &[f64]) -> Vec<f64> {
    standardized(features, &params.feature_means, &params.feature_stds)
        .iter()
        .zip(params.weights.iter())
        .map(|(z, w)| (z * w).abs())
        .collect()
}

/// Score a raw feature vector with a fitted artifact. `None` when the vector
/// shape does not match what the model was trained on.
pub fn score_with(params: &LogisticParams, features: &[f64]) -> Option<f64> {
    if params.weights.len() != features.len()
        || params.feature_means.len() != features.len()
        || params.feature_stds.len() != features.len()
    {
        return None;
    }
    Some(score_standardized(params, features))
}

/// Heuristic pseudo-label for bootstrap training: a bucket whose narrative
/// points up scores positive, risk drags it down.
pub fn synthetic_label(bucket: &Bucket) -> u8 {
    let mut score = 0i32;
    if bucket.narrative_heat > 1.0 {
        score += 1;
    }
    if bucket.consensus > 0.6 {
        score += 1;
    }
    if bucket.hype_velocity > 0.1 {
        score += 1;
    }
    if bucket.event_distribution.positive_mass() > 0.5 {
        score += 2;
    }
    if bucket.risk_polarity > 0.0 {
        score += 1;
    }
    if bucket.narrative_heat < -1.0 {
        score -= 1;
    }
    if bucket.risk_polarity < -0.1 {
        score -= 2;
    }
    if bucket.event_distribution.risk_mass() > 0.3 {
        score -= 2;
    }
    u8::from(score > 0)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn standardize_stats(rows: &[TrainRow]) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len() as f64;
    let dim = FEATURE_COUNT;
    let mut means = vec![0.0; dim];
    for row in rows {
        for (m, x) in means.iter_mut().zip(row.features.iter()) {
            *m += x;
        }
    }
    for m in means.iter_mut() {
        *m /= n;
    }
    let mut stds = vec![0.0; dim];
    for row in rows {
        for ((s, x), m) in stds.iter_mut().zip(row.features.iter()).zip(means.iter()) {
            *s += (x - m).powi(2);
        }
    }
    for s in stds.iter_mut() {
        *s = (*s / n).sqrt();
        // Constant columns pass through unscaled.
        if *s < 1e-9 {
            *s = 1.0;
        }
    }
    (means, stds)
}

fn standardized(features: &[f64], means: &[f64], stds: &[f64]) -> Vec<f64> {
    features
        .iter()
        .zip(means.iter())
        .zip(stds.iter())
        .map(|((x, m), s)| (x - m) / s)
        .collect()
}

fn score_standardized(params: &LogisticParams, features: &[f64]) -> f64 {
    let z: f64 = standardized(features, &params.feature_means, &params.feature_stds)
        .iter()
        .zip(params.weights.iter())
        .map(|(x, w)| x * w)
        .sum::<f64>()
        + params.intercept;
    sigmoid(z)
}

fn fit(train_x: &[Vec<f64>], train_y: &[u8]) -> (Vec<f64>, f64) {
    let n = train_x.len() as f64;
    let dim = train_x.first().map(Vec::len).unwrap_or(0);
    let mut weights = vec![0.0; dim];
    let mut intercept = 0.0;
    for _ in 0..EPOCHS {
        let mut grad_w = vec![0.0; dim];
        let mut grad_b = 0.0;
        for (x, &y) in train_x.iter().zip(train_y.iter()) {
            let z: f64 = x.iter().zip(weights.iter()).map(|(xi, wi)| xi * wi).sum::<f64>()
                + intercept;
            let err = sigmoid(z) - f64::from(y);
            for (g, xi) in grad_w.iter_mut().zip(x.iter()) {
                *g += err * xi;
            }
            grad_b += err;
        }
        for (w, g) in weights.iter_mut().zip(grad_w.iter()) {
            *w -= LEARNING_RATE * (g / n + L2 * *w);
        }
        intercept -= LEARNING_RATE * grad_b / n;
    }
    (weights, intercept)
}

fn evaluate(scores: &[f64], labels: &[u8], train_samples: usize) -> EvalMetrics {
    let n = scores.len() as f64;
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut fn_ = 0.0;
    let mut correct = 0.0;
    for (score, &label) in scores.iter().zip(labels.iter()) {
        let predicted = u8::from(*score >= 0.5);
        if predicted == label {
            correct += 1.0;
        }
        match (predicted, label) {
            (1, 1) => tp += 1.0,
            (1, 0) => fp += 1.0,
            (0, 1) => fn_ += 1.0,
            _ => {}
        }
    }
    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    EvalMetrics {
        accuracy: if n > 0.0 { correct / n } else { 0.0 },
        precision,
        recall,
        f1,
        roc_auc: roc_auc(scores, labels),
        train_samples,
        test_samples: scores.len(),
    }
}

/// Rank-based AUC. A single-class holdout reads as 0.5, not a divide-by-zero.
pub(crate) fn roc_auc(scores: &[f64], labels: &[u8]) -> f64 {
    let positives: Vec<f64> = scores
        .iter()
        .zip(labels.iter())
        .filter(|(_, &l)| l == 1)
        .map(|(s, _)| *s)
        .collect();
    let negatives: Vec<f64> = scores
        .iter()
        .zip(labels.iter())
        .filter(|(_, &l)| l == 0)
        .map(|(s, _)| *s)
        .collect();
    if positives.is_empty() || negatives.is_empty() {
        return 0.5;
    }
    let mut favorable = 0.0;
    for p in &positives {
        for q in &negatives {
            if p > q {
                favorable += 1.0;
            } else if (p - q).abs() < 1e-12 {
                favorable += 0.5;
            }
        }
    }
    favorable / (positives.len() as f64 * negatives.len() as f64)
}
