//! # Engine configuration
//!
//! Env-first settings for the analysis loop. Every knob has a usable
//! default; unset or unparseable values fall back with a warning instead
//! of failing startup. The source-trust table is the one file-backed
//! piece, resolved env path first, then `config/trust_table.toml`, then
//! the built-in seed.

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use tracing::warn;

use crate::extract::{TrustTable, DEFAULT_TAU_HOURS};
use crate::scheduler::SchedulerCfg;

const ENV_TOKENS: &str = "TOKENS";
const ENV_INTERVAL: &str = "ANALYSIS_INTERVAL_SECS";
const ENV_HOURS_BACK: &str = "ANALYSIS_HOURS_BACK";
const ENV_MAX_ARTICLES: &str = "MAX_ARTICLES_PER_TICK";
const ENV_MAINTENANCE: &str = "MAINTENANCE_EVERY_TICKS";
const ENV_TAU: &str = "RECENCY_TAU_HOURS";
const ENV_TRUST_PATH: &str = "TRUST_TABLE_PATH";

const DEFAULT_TRUST_PATH: &str = "config/trust_table.toml";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Token symbols the scheduler walks, uppercased.
    pub tokens: Vec<String>,
    pub interval_secs: u64,
    pub hours_back: i64,
    pub max_articles: usize,
    pub maintenance_every: u32,
    /// Recency decay constant handed to the extractor.
    pub tau_hours: f64,
    /// Optional TOML override for the source-trust table.
    pub trust_table_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tokens: vec!["SOL".to_string(), "ETH".to_string()],
            interval_secs: 600,
            hours_back: 24,
            max_articles: 12,
            maintenance_every: 6,
            tau_hours: DEFAULT_TAU_HOURS,
            trust_table_path: None,
        }
    }
}

impl EngineConfig {
    /// Read every setting from the environment, keeping the default for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tokens: match env::var(ENV_TOKENS) {
                Ok(raw) => {
                    let parsed = parse_token_list(&raw);
                    if parsed.is_empty() {
                        warn!(raw, "empty token list in env, using defaults");
                        defaults.tokens
                    } else {
                        parsed
                    }
                }
                Err(_) => defaults.tokens,
            },
            interval_secs: env_parse(ENV_INTERVAL, defaults.interval_secs),
            hours_back: env_parse(ENV_HOURS_BACK, defaults.hours_back),
            max_articles: env_parse(ENV_MAX_ARTICLES, defaults.max_articles),
            maintenance_every: env_parse(ENV_MAINTENANCE, defaults.maintenance_every),
            tau_hours: env_parse(ENV_TAU, defaults.tau_hours),
            trust_table_path: env::var(ENV_TRUST_PATH)
                .ok()
                .filter(|p| !p.trim().is_empty()),
        }
    }

    /// Trust table from the configured path, the default path, or the
    /// built-in seed when neither file parses.
    pub fn trust_table(&self) -> TrustTable {
        let path = self
            .trust_table_path
            .as_deref()
            .unwrap_or(DEFAULT_TRUST_PATH);
        TrustTable::load_from_file(path)
    }

    pub fn scheduler_cfg(&self) -> SchedulerCfg {
        SchedulerCfg {
            interval_secs: self.interval_secs,
            tokens: self.tokens.clone(),
            hours_back: self.hours_back,
            max_articles: self.max_articles,
            maintenance_every: self.maintenance_every,
        }
    }
}

/// Comma-separated symbols, trimmed, uppercased, empties dropped.
fn parse_token_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn env_parse<T: FromStr + Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, raw = %raw, default = %default, "unparseable env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
