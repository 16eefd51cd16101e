//! # Source Trust
//!
//! Configurable mapping from publisher domains to trust multipliers in
//! `[0.5, 1.2]`. Exchanges outrank tier-1 crypto press, which outranks
//! mainstream finance, blogs and social platforms.
//!
//! - Loads from a TOML file (domains + default), falling back to the
//!   built-in seed.
//! - Case-insensitive lookup over a normalized hostname with a substring
//!   fallback, so "CoinDesk" and "coindesk.com/markets" both resolve.

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

const TRUST_MIN: f64 = 0.5;
const TRUST_MAX: f64 = 1.2;

/// Trust table, loaded from TOML or seeded in code.
#[derive(Debug, Clone, Deserialize)]
pub struct TrustTable {
    /// Trust applied when no domain matches.
    #[serde(default = "default_trust")]
    pub default_trust: f64,
    /// Explicit trust per domain.
    #[serde(default)]
    pub domains: HashMap<String, f64>,
}

fn default_trust() -> f64 {
    0.6
}

impl TrustTable {
    /// Load from a TOML file, falling back to `default_seed()` on any error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => toml::from_str(&s).unwrap_or_else(|_| Self::default_seed()),
            Err(_) => Self::default_seed(),
        }
    }

    /// Resolve trust for a publisher.
    ///
    /// Steps:
    /// 1. Normalize `site_name` (fall back to the URL host when empty).
    /// 2. Exact domain match.
    /// 3. Substring fallback ("coindesk.com/markets" → "coindesk.com").
    /// 4. Default.
    pub fn trust_for(&self, site_name: &str, url: &str) -> f64 {
        let mut host = normalize_host(site_name);
        if host.is_empty() {
            host = normalize_host(&host_of(url));
        }

        if let Some(&t) = self.domains.get(&host) {
            return clamp_trust(t);
        }

        for (domain, &t) in &self.domains {
            if host.contains(domain.as_str()) {
                return clamp_trust(t);
            }
        }

        clamp_trust(self.default_trust)
    }

    /// Built-in seed covering the sources the pipeline most often sees.
    pub(crate) fn default_seed() -> Self {
        let mut domains = HashMap::new();
        for (d, t) in [
            // Exchanges: announcements straight from the venue.
            ("coinbase.com", 1.2),
            ("binance.com", 1.2),
            ("kraken.com", 1.2),
            // Tier-1 crypto press.
            ("coindesk.com", 1.1),
            ("cointelegraph.com", 1.1),
            ("decrypt.co", 1.1),
            ("theblock.co", 1.1),
            // Mainstream finance.
            ("reuters.com", 1.0),
            ("bloomberg.com", 1.0),
            ("wsj.com", 1.0),
            ("ft.com", 1.0),
            // Long-form blogs.
            ("medium.com", 0.8),
            ("substack.com", 0.8),
            // Social.
            ("reddit.com", 0.7),
            ("twitter.com", 0.7),
            ("x.com", 0.7),
        ] {
            domains.insert(d.to_string(), t);
        }
        Self {
            default_trust: 0.6,
            domains,
        }
    }
}

impl Default for TrustTable {
    fn default() -> Self {
        Self::default_seed()
    }
}

/// Lowercase, strip scheme and leading `www.`, trim path junk.
fn normalize_host(s: &str) -> String {
    let mut out = s.trim().to_ascii_lowercase();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = out.strip_prefix(prefix) {
            out = rest.to_string();
        }
    }
    if let Some(rest) = out.strip_prefix("www.") {
        out = rest.to_string();
    }
    out
}

/// Host portion of a URL, without a parser dependency.
fn host_of(url: &str) -> String {
    let stripped = url
        .trim()
        .strip_prefix("https://")
        .or_else(|| url.trim().strip_prefix("http://"))
        .unwrap_or(url.trim());
    stripped.split('/').next().unwrap_or("").to_string()
}

fn clamp_trust(t: f64) -> f64 {
    t.clamp(TRUST_MIN, TRUST_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TrustTable {
        TrustTable::default_seed()
    }

    #[test]
    fn exchange_domains_score_highest() {
        let t = table();
        assert!((t.trust_for("coinbase.com", "") - 1.2).abs() < 1e-9);
        assert!((t.trust_for("Binance.com", "") - 1.2).abs() < 1e-9);
    }

    #[test]
    fn url_host_used_when_site_name_empty() {
        let t = table();
        let got = t.trust_for("", "https://www.coindesk.com/markets/2025/btc");
        assert!((got - 1.1).abs() < 1e-9);
    }

    #[test]
    fn substring_fallback_matches_subpages() {
        let t = table();
        assert!((t.trust_for("decrypt.co/news", "") - 1.1).abs() < 1e-9);
    }

    #[test]
    fn unknown_source_gets_default() {
        let t = table();
        assert!((t.trust_for("randomcryptoblog.io", "") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn configured_values_are_clamped_to_range() {
        let mut t = table();
        t.domains.insert("hype.example".into(), 9.0);
        t.domains.insert("junk.example".into(), 0.0);
        assert!((t.trust_for("hype.example", "") - 1.2).abs() < 1e-9);
        assert!((t.trust_for("junk.example", "") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn toml_parse_error_falls_back_to_seed() {
        let t = TrustTable::load_from_file("/definitely/not/there.toml");
        assert!((t.default_trust - 0.6).abs() < 1e-9);
        assert!(!t.domains.is_empty());
    }
}
