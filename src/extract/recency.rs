//! # Recency Decay
//! Exponential freshness decay over publish age: `exp(-age_hours / tau)`,
//! clamped to `[0.01, 1.0]`. Articles without a publish time count as fresh;
//! a publish time we cannot parse gets a fixed moderate value instead of
//! poisoning the weight product.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

/// Half-life style time constant, in hours.
pub const DEFAULT_TAU_HOURS: f64 = 12.0;

const DECAY_FLOOR: f64 = 0.01;
/// Applied when a publish time is present but unparseable.
const UNPARSEABLE_DECAY: f64 = 0.8;

/// Decay for an article published at `published_at` (upstream string form),
/// evaluated at `now`.
pub fn recency_decay(published_at: Option<&str>, now: DateTime<Utc>, tau_hours: f64) -> f64 {
    let raw = match published_at {
        None => return 1.0,
        Some(s) if s.trim().is_empty() => return 1.0,
        Some(s) => s,
    };
    match parse_publish_time(raw) {
        Some(ts) => decay_from_instant(ts, now, tau_hours),
        None => UNPARSEABLE_DECAY,
    }
}

/// Decay from an already-parsed publish time.
pub fn decay_from_instant(published: DateTime<Utc>, now: DateTime<Utc>, tau_hours: f64) -> f64 {
    let age_hours = (now - published).num_seconds() as f64 / 3600.0;
    let tau = if tau_hours > 0.0 { tau_hours } else { DEFAULT_TAU_HOURS };
    (-age_hours / tau).exp().clamp(DECAY_FLOOR, 1.0)
}

/// Parse the publish-time formats upstreams actually send: RFC 3339,
/// RFC 2822, naive `YYYY-MM-DDTHH:MM:SS` (assumed UTC) and bare dates.
pub fn parse_publish_time(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(odt) = OffsetDateTime::parse(s, &Rfc2822) {
        return DateTime::<Utc>::from_timestamp(odt.unix_timestamp(), 0);
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }

    None
}
