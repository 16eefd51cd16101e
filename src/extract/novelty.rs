//! # Novelty
//! Binary first-seen scoring over a SHA-256 content hash, held for the
//! process lifetime: a hash we have not seen scores 1.0, a repeat scores 0.0.
//! Content too short to fingerprint reliably gets a neutral 0.5.

use std::collections::HashSet;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// Content shorter than this cannot be fingerprinted reliably.
const MIN_CONTENT_CHARS: usize = 100;
const SHORT_CONTENT_SCORE: f64 = 0.5;

/// Process-lifetime dedup set. One tracker per extractor; two extractors
/// never share novelty state.
#[derive(Debug, Default)]
pub struct NoveltyTracker {
    seen: Mutex<HashSet<[u8; 32]>>,
}

impl NoveltyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score one article's content.
    pub fn score(&self, content: &str) -> f64 {
        let trimmed = content.trim();
        if trimmed.chars().count() < MIN_CONTENT_CHARS {
            return SHORT_CONTENT_SCORE;
        }
        let digest = sha256_bytes(trimmed);
        let mut seen = self.seen.lock().expect("novelty set mutex poisoned");
        if seen.insert(digest) {
            1.0
        } else {
            0.0
        }
    }

    /// Number of distinct fingerprints seen so far. Diagnostic only.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().expect("novelty set mutex poisoned").len()
    }
}

fn sha256_bytes(s: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hasher.finalize().into()
}

/// Hex SHA-256, used as the classifier fallback-cache key.
pub(crate) fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
