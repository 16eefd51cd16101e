//! # Thesis composition
//! Renders a bucket and its prediction into reader-facing reasoning,
//! guardrails and supporting evidence. Pure string assembly over already
//! computed numbers; hard caps keep the output scannable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strsim::normalized_levenshtein;

use crate::extract::sentiment::prefix_chars;
use crate::types::{round3, Article, Bucket, Confidence, EventKind, Prediction};

pub const MAX_REASONING: usize = 6;
pub const MAX_GUARDRAILS: usize = 4;
pub const MAX_EVIDENCE: usize = 8;

/// Titles at or above this normalized Levenshtein similarity count as the
/// same story told twice.
const NEAR_DUP_SIMILARITY: f64 = 0.85;
const TITLE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Direction {
    pub fn from_probability(p: f64) -> Self {
        if p > 0.6 {
            Direction::Bullish
        } else if p < 0.4 {
            Direction::Bearish
        } else {
            Direction::Neutral
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Bullish => "BULLISH",
            Direction::Bearish => "BEARISH",
            Direction::Neutral => "NEUTRAL",
        };
        f.write_str(s)
    }
}

/// One supporting article, heaviest first in the thesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub title: String,
    pub source: String,
    pub url: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thesis {
    pub token: String,
    pub direction: Direction,
    pub probability_up: f64,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guardrails: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EvidenceItem>,
    pub generated_at: DateTime<Utc>,
}

pub struct ThesisComposer;

impl ThesisComposer {
    /// Build the full thesis for one bucket. `articles` are the bucket's
    /// members; order does not matter, evidence re-sorts by weight.
    pub fn compose(bucket: &Bucket, prediction: &Prediction, articles: &[Article]) -> Thesis {
        Thesis {
            token: bucket.token.clone(),
            direction: Direction::from_probability(prediction.probability_up),
            probability_up: prediction.probability_up,
            confidence: prediction.confidence,
            reasoning: reasoning(bucket, prediction),
            guardrails: guardrails(bucket),
            evidence: evidence(articles),
            generated_at: Utc::now(),
        }
    }
}

fn reasoning(bucket: &Bucket, prediction: &Prediction) -> Vec<String> {
    let mut out = Vec::new();
    let heat = bucket.narrative_heat;
    if heat.abs() > 2.0 {
        out.push(format!(
            "Strong narrative heat at {:+.2} across {} article(s)",
            heat, bucket.article_count
        ));
    } else if heat.abs() > 1.0 {
        out.push(format!("Moderate narrative heat at {:+.2}", heat));
    } else {
        out.push(format!("Quiet narrative, heat {:+.2}", heat));
    }

    if bucket.consensus > 0.7 {
        out.push(format!(
            "High consensus: {:.0}% of weighted coverage points at the {} theme",
            bucket.consensus * 100.0,
            bucket.top_event_name()
        ));
    } else if bucket.consensus > 0.5 {
        out.push(format!(
            "Majority consensus ({:.0}%) around the {} theme",
            bucket.consensus * 100.0,
            bucket.top_event_name()
        ));
    }

    if bucket.hype_velocity > 0.2 {
        out.push(format!(
            "Hype accelerating: heat up {:.0}% versus the previous window",
            bucket.hype_velocity * 100.0
        ));
    } else if bucket.hype_velocity < -0.2 {
        out.push(format!(
            "Hype cooling: heat down {:.0}% versus the previous window",
            bucket.hype_velocity.abs() * 100.0
        ));
    }

    let dist = &bucket.event_distribution;
    let listing = dist.get(EventKind::Listing);
    let partnership = dist.get(EventKind::Partnership);
    if listing.max(partnership) > 0.6 {
        let kind = if listing >= partnership { "listing" } else { "partnership" };
        out.push(format!("Coverage dominated by {kind} news"));
    }
    let hack = dist.get(EventKind::Hack);
    let regulatory = dist.get(EventKind::Regulatory);
    if hack.max(regulatory) > 0.4 {
        let kind = if hack >= regulatory { "hack" } else { "regulatory" };
        out.push(format!(
            "Risk theme present: {kind} coverage at {:.0}%",
            hack.max(regulatory) * 100.0
        ));
    }

    if let Some(liquidity) = bucket.liquidity_usd {
        if liquidity > 1_000_000.0 {
            out.push(format!(
                "Deep liquidity (${:.1}M) supports execution",
                liquidity / 1_000_000.0
            ));
        } else if liquidity > 100_000.0 {
            out.push(format!("Adequate liquidity (${:.0}K)", liquidity / 1_000.0));
        }
    }

    if let Some((driver, share)) = prediction.top_driver() {
        out.push(format!(
            "Primary driver: {} ({:.0}% of attribution)",
            driver,
            share * 100.0
        ));
    }

    out.truncate(MAX_REASONING);
    out
}

fn guardrails(bucket: &Bucket) -> Vec<String> {
    let mut out = Vec::new();
    if bucket.consensus < 0.4 {
        out.push(format!(
            "Narrative is fragmented (consensus {:.0}%), signals may conflict",
            bucket.consensus * 100.0
        ));
    }
    if bucket.risk_polarity < -0.1 {
        out.push(format!(
            "Net risk polarity is negative ({:+.2})",
            bucket.risk_polarity
        ));
    }
    if bucket.narrative_heat.abs() > 3.0 {
        out.push(format!(
            "Extreme heat ({:+.2}) often precedes mean reversion",
            bucket.narrative_heat
        ));
    }
    if bucket.top_event.map(|k| k.is_risk()).unwrap_or(false) {
        out.push(format!(
            "Top theme is {}, a risk event kind",
            bucket.top_event_name()
        ));
    }
    out.push("Re-evaluate within 2 hours; narrative windows decay quickly".to_string());
    out.push("Hard stop at -15% from entry".to_string());
    out.truncate(MAX_GUARDRAILS);
    out
}

fn evidence(articles: &[Article]) -> Vec<EvidenceItem> {
    let mut sorted: Vec<&Article> = articles.iter().collect();
    sorted.sort_by(|a, b| {
        b.features
            .final_weight
            .partial_cmp(&a.features.final_weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept_titles: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for article in sorted {
        let lowered = article.title.to_lowercase();
        let duplicate = kept_titles
            .iter()
            .any(|seen| normalized_levenshtein(seen, &lowered) >= NEAR_DUP_SIMILARITY);
        if duplicate {
            continue;
        }
        kept_titles.push(lowered);
        out.push(EvidenceItem {
            title: prefix_chars(&article.title, TITLE_CHARS).to_string(),
            source: article.site_name.clone(),
            url: article.url.clone(),
            weight: round3(article.features.final_weight),
        });
        if out.len() == MAX_EVIDENCE {
            break;
        }
    }
    out
}
