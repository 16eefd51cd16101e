//! Bucket-to-feature-vector mapping. The name list and its order are part of
//! the model artifact contract; records persist it so a scored bucket can be
//! checked against the shape a model was trained on.

use crate::types::{Bucket, EventKind};

pub const FEATURE_COUNT: usize = 18;

/// Canonical feature order. The nine event masses follow [`EventKind::ALL`].
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "narrative_heat",
    "positive_heat",
    "negative_heat",
    "hype_velocity",
    "consensus",
    "risk_polarity",
    "event_listing",
    "event_partnership",
    "event_hack",
    "event_depeg",
    "event_regulatory",
    "event_funding",
    "event_tech",
    "event_market_note",
    "event_op_ed",
    "liquidity_usd_log",
    "trades_count_change",
    "spread_estimate",
];

/// Map a bucket onto the canonical vector. Missing market enrichment reads
/// as 0.0; liquidity is log-compressed with a floor of one dollar.
pub fn feature_vector(bucket: &Bucket) -> [f64; FEATURE_COUNT] {
    let mut v = [0.0; FEATURE_COUNT];
    v[0] = bucket.narrative_heat;
    v[1] = bucket.positive_heat;
    v[2] = bucket.negative_heat;
    v[3] = bucket.hype_velocity;
    v[4] = bucket.consensus;
    v[5] = bucket.risk_polarity;
    for (i, kind) in EventKind::ALL.iter().enumerate() {
        v[6 + i] = bucket.event_distribution.get(*kind);
    }
    v[15] = bucket
        .liquidity_usd
        .map(|liq| (1.0 + liq.max(1.0)).ln())
        .unwrap_or(0.0);
    v[16] = bucket.trades_count_change.unwrap_or(0.0);
    v[17] = bucket.spread_estimate.unwrap_or(0.0);
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventDistribution;
    use chrono::Utc;

    fn bucket() -> Bucket {
        Bucket {
            token: "BTC".to_string(),
            bucket_ts: Utc::now(),
            narrative_heat: 1.5,
            positive_heat: 2.0,
            negative_heat: -0.5,
            hype_velocity: 0.25,
            consensus: 0.8,
            risk_polarity: 0.4,
            event_distribution: EventDistribution::single(EventKind::Listing),
            top_event: Some(EventKind::Listing),
            article_count: 3,
            avg_source_trust: 1.0,
            avg_novelty: 0.9,
            liquidity_usd: Some(1_000_000.0),
            trades_count_change: Some(0.12),
            spread_estimate: None,
        }
    }

    #[test]
    fn names_and_vector_stay_in_lockstep() {
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
        assert_eq!(FEATURE_NAMES[6], "event_listing");
        assert_eq!(FEATURE_NAMES[14], "event_op_ed");
        let v = feature_vector(&bucket());
        assert_eq!(v.len(), FEATURE_COUNT);
        assert_eq!(v[0], 1.5);
        assert_eq!(v[6], 1.0);
        assert_eq!(v[7], 0.0);
    }

    #[test]
    fn market_fields_default_to_zero_and_liquidity_is_logged() {
        let mut b = bucket();
        b.liquidity_usd = None;
        b.trades_count_change = None;
        let v = feature_vector(&b);
        assert_eq!(v[15], 0.0);
        assert_eq!(v[16], 0.0);
        assert_eq!(v[17], 0.0);

        b.liquidity_usd = Some(1_000_000.0);
        let v = feature_vector(&b);
        assert!((v[15] - (1_000_001.0f64).ln()).abs() < 1e-9);

        // Sub-dollar liquidity is floored, not logged negative.
        b.liquidity_usd = Some(0.25);
        let v = feature_vector(&b);
        assert!((v[15] - 2.0f64.ln()).abs() < 1e-9);
    }
}
