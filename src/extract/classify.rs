//! # Event Classification Fallbacks
//! Pure pieces of the event-classification chain: wire-response
//! normalization, the keyword-count rule classifier, and the last-ditch
//! single-keyword default. The remote classifier call and the cache sit in
//! the extractor; everything here is deterministic.

use std::time::Duration;

use crate::extract::novelty::sha256_hex;
use crate::extract::sentiment::prefix_chars;
use crate::types::{EventDistribution, EventKind};

/// TTL for cached classifications (remote or rule-based).
pub const EVENT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Keyword cues per event kind, matched as substrings of the lowercased text.
const KEYWORD_RULES: [(EventKind, &[&str]); 9] = [
    (
        EventKind::Listing,
        &["listing", "listed", "trading pair", "exchange", "available on"],
    ),
    (
        EventKind::Partnership,
        &["partnership", "partner", "collaboration", "integrate", "alliance"],
    ),
    (
        EventKind::Hack,
        &["hack", "exploit", "breach", "attack", "stolen", "drained"],
    ),
    (
        EventKind::Depeg,
        &["depeg", "peg", "stable", "unstable", "depegged"],
    ),
    (
        EventKind::Regulatory,
        &["regulation", "regulatory", "sec", "government", "legal", "compliance"],
    ),
    (
        EventKind::Funding,
        &["funding", "investment", "raised", "round", "capital", "investor"],
    ),
    (
        EventKind::Tech,
        &["update", "upgrade", "launch", "release", "technical", "development"],
    ),
    (
        EventKind::MarketNote,
        &["price", "trading", "market", "analysis", "chart", "technical analysis"],
    ),
    (
        EventKind::OpEd,
        &["opinion", "editorial", "commentary", "think", "believe", "analysis"],
    ),
];

/// Clean up a classifier wire response: negative or non-finite masses drop to
/// zero, the rest renormalizes to 1.0. All-zero collapses to `market-note`.
/// (Unknown kinds were already dropped and missing kinds zero-filled during
/// decoding.)
pub fn normalize_distribution(raw: EventDistribution) -> EventDistribution {
    let mut cleaned = EventDistribution::zero();
    for (kind, mass) in raw.iter() {
        if mass.is_finite() && mass > 0.0 {
            cleaned.set(kind, mass);
        }
    }
    if cleaned.is_zero() {
        return EventDistribution::single(EventKind::MarketNote);
    }
    cleaned.normalized()
}

/// Keyword-count classifier: per-kind substring occurrence counts over
/// title + content, normalized. `None` when nothing matches at all.
pub fn keyword_distribution(title: &str, content: &str) -> Option<EventDistribution> {
    let text = format!("{} {}", title, content).to_ascii_lowercase();
    let mut dist = EventDistribution::zero();
    for (kind, keywords) in KEYWORD_RULES {
        let count: usize = keywords.iter().map(|kw| text.matches(kw).count()).sum();
        dist.set(kind, count as f64);
    }
    if dist.is_zero() {
        None
    } else {
        Some(dist.normalized())
    }
}

/// Last-ditch heuristic: the first cue group with any hit takes all the mass.
/// Ordered so the most common article shapes win before rarer ones.
pub fn single_keyword_default(title: &str, content: &str) -> EventDistribution {
    let text = format!("{} {}", title, content).to_ascii_lowercase();
    let tiers: [(EventKind, &[&str]); 4] = [
        (EventKind::MarketNote, &["price", "trading", "chart", "analysis", "market"]),
        (EventKind::Hack, &["hack", "exploit", "breach", "stolen"]),
        (EventKind::Partnership, &["partnership", "partner", "collaboration"]),
        (EventKind::Listing, &["listing", "exchange", "trading pair"]),
    ];
    for (kind, cues) in tiers {
        if cues.iter().any(|c| text.contains(c)) {
            return EventDistribution::single(kind);
        }
    }
    EventDistribution::single(EventKind::MarketNote)
}

/// Full offline chain: keyword counts, then the single-keyword default.
/// Total — always yields a distribution summing to 1.0.
pub fn rule_based_classification(title: &str, content: &str) -> EventDistribution {
    keyword_distribution(title, content)
        .unwrap_or_else(|| single_keyword_default(title, content))
}

/// Cache key for one article's classification: hash of the leading title and
/// content slices, so trivial tail edits still hit the cache.
pub fn classification_cache_key(title: &str, content: &str) -> String {
    let basis = format!("{} {}", prefix_chars(title, 100), prefix_chars(content, 500));
    sha256_hex(&basis)
}
