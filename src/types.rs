//! # Domain Types
//! Shared records flowing through the pipeline: raw wire articles, extracted
//! per-article features, aggregated narrative buckets, realized-return labels
//! and trained-model registry entries.
//!
//! The event taxonomy is a closed set of nine kinds; distributions over it are
//! kept in a fixed-order array so feature vectors stay deterministic.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// The nine article event kinds. Order is part of the feature-vector contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Listing,
    Partnership,
    Hack,
    Depeg,
    Regulatory,
    Funding,
    Tech,
    MarketNote,
    OpEd,
}

impl EventKind {
    /// All kinds in canonical order.
    pub const ALL: [EventKind; 9] = [
        EventKind::Listing,
        EventKind::Partnership,
        EventKind::Hack,
        EventKind::Depeg,
        EventKind::Regulatory,
        EventKind::Funding,
        EventKind::Tech,
        EventKind::MarketNote,
        EventKind::OpEd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Listing => "listing",
            EventKind::Partnership => "partnership",
            EventKind::Hack => "hack",
            EventKind::Depeg => "depeg",
            EventKind::Regulatory => "regulatory",
            EventKind::Funding => "funding",
            EventKind::Tech => "tech",
            EventKind::MarketNote => "market-note",
            EventKind::OpEd => "op-ed",
        }
    }

    /// Parse a wire name; unknown names yield `None` (tolerant decoding).
    pub fn parse(s: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Kinds that pull risk polarity down.
    pub fn is_risk(&self) -> bool {
        matches!(self, EventKind::Hack | EventKind::Depeg | EventKind::Regulatory)
    }

    /// Kinds that pull risk polarity up.
    pub fn is_positive(&self) -> bool {
        matches!(
            self,
            EventKind::Listing | EventKind::Partnership | EventKind::Funding | EventKind::Tech
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability mass (or weighted mass) over the nine event kinds.
///
/// Serialized as a JSON object keyed by kind name. Decoding is tolerant:
/// unknown keys are dropped, missing kinds read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EventDistribution([f64; 9]);

impl EventDistribution {
    pub fn zero() -> Self {
        Self([0.0; 9])
    }

    /// All mass on a single kind.
    pub fn single(kind: EventKind) -> Self {
        let mut d = Self::zero();
        d.set(kind, 1.0);
        d
    }

    pub fn get(&self, kind: EventKind) -> f64 {
        self.0[kind as usize]
    }

    pub fn set(&mut self, kind: EventKind, mass: f64) {
        self.0[kind as usize] = mass;
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|m| *m == 0.0)
    }

    /// Rescale so the masses sum to 1.0. An all-zero distribution stays zero.
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        if total <= 0.0 {
            return Self::zero();
        }
        let mut out = *self;
        for m in out.0.iter_mut() {
            *m /= total;
        }
        out
    }

    /// Kind with the largest mass (first in canonical order wins ties),
    /// or `None` when the distribution is all-zero.
    pub fn top(&self) -> Option<(EventKind, f64)> {
        if self.is_zero() {
            return None;
        }
        let mut best = (EventKind::Listing, f64::MIN);
        for kind in EventKind::ALL {
            let m = self.get(kind);
            if m > best.1 {
                best = (kind, m);
            }
        }
        Some(best)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventKind, f64)> + '_ {
        EventKind::ALL.into_iter().map(|k| (k, self.get(k)))
    }

    /// Combined mass of hack/depeg/regulatory.
    pub fn risk_mass(&self) -> f64 {
        self.iter().filter(|(k, _)| k.is_risk()).map(|(_, m)| m).sum()
    }

    /// Combined mass of listing/partnership/funding/tech.
    pub fn positive_mass(&self) -> f64 {
        self.iter().filter(|(k, _)| k.is_positive()).map(|(_, m)| m).sum()
    }
}

impl Serialize for EventDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(EventKind::ALL.len()))?;
        for (kind, mass) in self.iter() {
            map.serialize_entry(kind.as_str(), &mass)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EventDistribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: HashMap<String, serde_json::Value> = HashMap::deserialize(deserializer)?;
        let mut dist = EventDistribution::zero();
        for (key, value) in raw {
            let Some(kind) = EventKind::parse(&key) else {
                continue; // unknown kind on the wire
            };
            let mass = value
                .as_f64()
                .ok_or_else(|| D::Error::custom(format!("non-numeric mass for `{key}`")))?;
            dist.set(kind, mass);
        }
        Ok(dist)
    }
}

/// An article as delivered by the search/scrape gateway, before any scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArticle {
    pub token: String,
    pub url: String,
    pub site_name: String,
    pub title: String,
    /// Publish time as the upstream sent it; may be absent or garbled.
    #[serde(default)]
    pub published_at: Option<String>,
    pub clean_content: String,
    #[serde(default)]
    pub word_count: usize,
}

/// Per-article scores produced by the feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleFeatures {
    pub event_probs: EventDistribution,
    /// Token-scoped sentiment in [-1, 1].
    pub sentiment_score: f64,
    /// Source trust in [0.5, 1.2].
    pub source_trust: f64,
    /// Freshness decay in [0.01, 1.0].
    pub recency_decay: f64,
    /// Binary first-seen novelty (0.5 for too-short content).
    pub novelty_score: f64,
    /// 1.1 with on-chain proof signals, else 1.0.
    pub proof_bonus: f64,
    /// trust * recency * novelty * proof.
    pub final_weight: f64,
}

impl ArticleFeatures {
    /// Degraded defaults when an article is unusable end to end.
    pub fn degraded() -> Self {
        Self {
            event_probs: EventDistribution::zero(),
            sentiment_score: 0.0,
            source_trust: 0.5,
            recency_decay: 0.1,
            novelty_score: 1.0,
            proof_bonus: 1.0,
            final_weight: 0.05,
        }
    }
}

/// A scored article as persisted. URL is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub token: String,
    pub url: String,
    pub site_name: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub clean_content: String,
    pub word_count: usize,
    #[serde(flatten)]
    pub features: ArticleFeatures,
    /// Assigned during aggregation.
    pub bucket_ts: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Aggregated narrative state for one token over one 10-minute window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub token: String,
    pub bucket_ts: DateTime<Utc>,
    pub narrative_heat: f64,
    pub positive_heat: f64,
    pub negative_heat: f64,
    pub hype_velocity: f64,
    pub consensus: f64,
    pub risk_polarity: f64,
    pub event_distribution: EventDistribution,
    /// `None` for an empty bucket (displayed as "unknown").
    pub top_event: Option<EventKind>,
    pub article_count: usize,
    pub avg_source_trust: f64,
    pub avg_novelty: f64,
    /// On-chain enrichments; absent when the market provider had nothing.
    #[serde(default)]
    pub liquidity_usd: Option<f64>,
    #[serde(default)]
    pub trades_count_change: Option<f64>,
    #[serde(default)]
    pub spread_estimate: Option<f64>,
}

impl Bucket {
    pub fn top_event_name(&self) -> &'static str {
        self.top_event.map(|k| k.as_str()).unwrap_or("unknown")
    }
}

/// Realized-return label for one (token, bucket) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub token: String,
    pub bucket_ts: DateTime<Utc>,
    /// Forward return over 60 minutes, as a decimal (0.01 = +1%).
    pub forward_return_60m: f64,
    /// 1 iff the forward return cleared +0.5%.
    pub label_binary: u8,
}

/// Registry entry for a trained model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Sortable version id, e.g. `logistic_20250824_101500`.
    pub version: String,
    pub kind: String,
    pub feature_names: Vec<String>,
    pub params: LogisticParams,
    pub metrics: EvalMetrics,
    /// True when the model was fit on heuristic pseudo-labels.
    pub synthetic: bool,
    pub is_active: bool,
    pub trained_at: DateTime<Utc>,
}

/// Fitted coefficients of a logistic artifact, with the feature
/// standardization baked in at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticParams {
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
}

/// Holdout evaluation of a trained model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
    pub train_samples: usize,
    pub test_samples: usize,
}

/// Prediction confidence tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        };
        f.write_str(s)
    }
}

/// Output of the prediction engine for one bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub token: String,
    pub bucket_ts: DateTime<Utc>,
    /// Probability the token moves up over the next hour, in [0.1, 0.9].
    pub probability_up: f64,
    pub confidence: Confidence,
    /// `None` when the rule-based default produced the number.
    pub model_version: Option<String>,
    /// Normalized driver weights, largest first.
    pub attribution: Vec<(String, f64)>,
}

impl Prediction {
    pub fn top_driver(&self) -> Option<&(String, f64)> {
        self.attribution.first()
    }
}

/// Round to 3 decimals, the precision every aggregate is reported at.
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_stable() {
        let names: Vec<&str> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            [
                "listing",
                "partnership",
                "hack",
                "depeg",
                "regulatory",
                "funding",
                "tech",
                "market-note",
                "op-ed"
            ]
        );
    }

    #[test]
    fn parse_roundtrips_every_kind() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("airdrop"), None);
    }

    #[test]
    fn distribution_decode_drops_unknown_keys() {
        let json = r#"{"listing": 0.7, "airdrop": 0.2, "hack": 0.3}"#;
        let d: EventDistribution = serde_json::from_str(json).unwrap();
        assert!((d.get(EventKind::Listing) - 0.7).abs() < 1e-12);
        assert!((d.get(EventKind::Hack) - 0.3).abs() < 1e-12);
        assert_eq!(d.get(EventKind::Depeg), 0.0);
    }

    #[test]
    fn normalized_sums_to_one_or_stays_zero() {
        let mut d = EventDistribution::zero();
        d.set(EventKind::Listing, 2.0);
        d.set(EventKind::Hack, 2.0);
        assert!((d.normalized().sum() - 1.0).abs() < 1e-9);
        assert!(EventDistribution::zero().normalized().is_zero());
    }

    #[test]
    fn top_prefers_largest_mass() {
        let mut d = EventDistribution::zero();
        d.set(EventKind::Regulatory, 0.6);
        d.set(EventKind::Listing, 0.4);
        assert_eq!(d.top().map(|(k, _)| k), Some(EventKind::Regulatory));
        assert_eq!(EventDistribution::zero().top(), None);
    }

    #[test]
    fn risk_and_positive_masses() {
        let mut d = EventDistribution::zero();
        d.set(EventKind::Hack, 0.2);
        d.set(EventKind::Regulatory, 0.1);
        d.set(EventKind::Listing, 0.5);
        d.set(EventKind::OpEd, 0.2);
        assert!((d.risk_mass() - 0.3).abs() < 1e-12);
        assert!((d.positive_mass() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn round3_matches_reporting_precision() {
        assert_eq!(round3(0.4799999), 0.48);
        assert_eq!(round3(-1.23456), -1.235);
    }
}
