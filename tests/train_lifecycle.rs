// tests/train_lifecycle.rs
// Model lifecycle through the public surface: insufficient data, the
// synthetic bootstrap, activation flips and the predict path switching
// from rules to the trained model.

use std::sync::Arc;

use chrono::{Duration, Utc};
use narrapulse::aggregate::{aggregate, bucket_start};
use narrapulse::predict::PredictionEngine;
use narrapulse::store::MemoryStore;
use narrapulse::types::{Bucket, EventDistribution, EventKind, Label};
use narrapulse::{Store, TrainOutcome};

fn hot_bucket(ts: chrono::DateTime<Utc>) -> Bucket {
    let mut bucket = aggregate("SOL", ts, &[]);
    bucket.narrative_heat = 2.0;
    bucket.positive_heat = 2.0;
    bucket.consensus = 0.8;
    bucket.risk_polarity = 0.4;
    bucket.event_distribution = EventDistribution::single(EventKind::Listing);
    bucket.top_event = Some(EventKind::Listing);
    bucket.article_count = 4;
    bucket
}

fn cold_bucket(ts: chrono::DateTime<Utc>) -> Bucket {
    let mut bucket = aggregate("SOL", ts, &[]);
    bucket.narrative_heat = -2.0;
    bucket.negative_heat = -2.0;
    bucket.consensus = 0.7;
    bucket.risk_polarity = -0.5;
    bucket.event_distribution = EventDistribution::single(EventKind::Hack);
    bucket.top_event = Some(EventKind::Hack);
    bucket.article_count = 4;
    bucket
}

async fn seed_alternating(store: &MemoryStore, count: usize) -> Vec<Bucket> {
    let base = bucket_start(Utc::now()) - Duration::minutes(10 * count as i64);
    let mut out = Vec::new();
    for i in 0..count {
        let ts = base + Duration::minutes(10 * i as i64);
        let bucket = if i % 2 == 0 {
            hot_bucket(ts)
        } else {
            cold_bucket(ts)
        };
        store.upsert_bucket(bucket.clone()).await.unwrap();
        out.push(bucket);
    }
    out
}

#[tokio::test]
async fn no_labels_reports_insufficient_samples() {
    let store = Arc::new(MemoryStore::new());
    let engine = PredictionEngine::new(Arc::clone(&store) as Arc<dyn Store>);

    match engine.train_from_labels().await.unwrap() {
        TrainOutcome::InsufficientSamples {
            available,
            required,
        } => {
            assert_eq!(available, 0);
            assert!(required > 0);
        }
        TrainOutcome::Trained(_) => panic!("trained with no labels"),
    }
}

#[tokio::test]
async fn bootstrap_trains_a_synthetic_model_that_predict_uses() {
    let store = Arc::new(MemoryStore::new());
    seed_alternating(&store, 60).await;

    let engine =
        PredictionEngine::new(Arc::clone(&store) as Arc<dyn Store>).with_min_samples(40);
    let outcome = engine.bootstrap_synthetic(&["SOL".to_string()], 48).await.unwrap();

    let record = match outcome {
        TrainOutcome::Trained(record) => record,
        TrainOutcome::InsufficientSamples { .. } => panic!("expected a trained model"),
    };
    assert!(record.synthetic);
    assert!(record.is_active);
    assert!(record.version.starts_with("logistic_"));

    let active = store.active_model().await.unwrap().unwrap();
    assert_eq!(active.version, record.version);

    // Predictions now route through the fitted model.
    let prediction = engine
        .predict(&hot_bucket(bucket_start(Utc::now())))
        .await;
    assert_eq!(prediction.model_version, Some(record.version));
    assert!(prediction.probability_up > 0.5);
}

#[tokio::test]
async fn retraining_keeps_exactly_one_active_model() {
    let store = Arc::new(MemoryStore::new());
    seed_alternating(&store, 60).await;
    let engine =
        PredictionEngine::new(Arc::clone(&store) as Arc<dyn Store>).with_min_samples(40);

    engine.bootstrap_synthetic(&["SOL".to_string()], 48).await.unwrap();
    // Version ids have second granularity.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    engine.bootstrap_synthetic(&["SOL".to_string()], 48).await.unwrap();

    let models = store.models().await.unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models.iter().filter(|m| m.is_active).count(), 1);
    let active = store.active_model().await.unwrap().unwrap();
    assert_eq!(active.version, models.last().unwrap().version);
}

#[tokio::test]
async fn auto_train_prefers_real_labels_once_enough_exist() {
    let store = Arc::new(MemoryStore::new());
    let buckets = seed_alternating(&store, 24).await;
    for bucket in &buckets {
        let positive = bucket.narrative_heat > 0.0;
        store
            .insert_label(Label {
                token: "SOL".to_string(),
                bucket_ts: bucket.bucket_ts,
                forward_return_60m: if positive { 0.02 } else { -0.01 },
                label_binary: u8::from(positive),
            })
            .await
            .unwrap();
    }

    let engine =
        PredictionEngine::new(Arc::clone(&store) as Arc<dyn Store>).with_min_samples(10);
    let outcome = engine.auto_train(&["SOL".to_string()], 48).await.unwrap();

    let record = match outcome {
        TrainOutcome::Trained(record) => record,
        TrainOutcome::InsufficientSamples { .. } => panic!("expected real-label training"),
    };
    assert!(!record.synthetic);
}
