//! # Narrative aggregation
//! Folds scored articles into fixed 10-minute buckets per token. The bucket
//! math is a pure function over article features; the store-backed methods
//! group, backfill bucket assignments, chain hype velocity off the previous
//! bucket and upsert. Re-running over unchanged articles yields identical
//! buckets.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use metrics::{counter, gauge};
use tracing::debug;

use crate::store::Store;
use crate::types::{round3, Article, Bucket, EventDistribution};

/// Floor a timestamp to the start of its 10-minute window.
pub fn bucket_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let floored = ts.minute() - ts.minute() % 10;
    ts.date_naive()
        .and_hms_opt(ts.hour(), floored, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(ts)
}

/// Relative heat change against the previous bucket. First bucket of a token
/// reports 0.0; the divisor never drops below 1.0 so quiet tokens cannot
/// explode the ratio.
pub fn hype_velocity(heat: f64, prev_heat: Option<f64>) -> f64 {
    match prev_heat {
        Some(prev) => round3((heat - prev) / prev.abs().max(1.0)),
        None => 0.0,
    }
}

/// Pure bucket aggregation. `hype_velocity` is left at 0.0 here; the caller
/// fills it in once the previous bucket is known. Market enrichment fields
/// stay `None`.
pub fn aggregate(token: &str, bucket_ts: DateTime<Utc>, articles: &[Article]) -> Bucket {
    let mut bucket = Bucket {
        token: token.to_string(),
        bucket_ts,
        narrative_heat: 0.0,
        positive_heat: 0.0,
        negative_heat: 0.0,
        hype_velocity: 0.0,
        consensus: 0.0,
        risk_polarity: 0.0,
        event_distribution: EventDistribution::zero(),
        top_event: None,
        article_count: 0,
        avg_source_trust: 0.5,
        avg_novelty: 0.5,
        liquidity_usd: None,
        trades_count_change: None,
        spread_estimate: None,
    };
    if articles.is_empty() {
        return bucket;
    }

    let n = articles.len() as f64;
    let mut heat = 0.0;
    let mut positive = 0.0;
    let mut negative = 0.0;
    let mut weight_sum = 0.0;
    let mut trust_sum = 0.0;
    let mut novelty_sum = 0.0;
    let mut dist = EventDistribution::zero();

    for article in articles {
        let f = &article.features;
        let contribution = f.sentiment_score * f.final_weight;
        heat += contribution;
        if f.sentiment_score > 0.0 {
            positive += contribution;
        } else if f.sentiment_score < 0.0 {
            negative += contribution;
        }
        weight_sum += f.final_weight;
        trust_sum += f.source_trust;
        novelty_sum += f.novelty_score;
        for (kind, p) in f.event_probs.iter() {
            dist.set(kind, dist.get(kind) + p * f.final_weight);
        }
    }

    if weight_sum > 0.0 {
        let accumulated = dist;
        for (kind, mass) in accumulated.iter() {
            dist.set(kind, mass / weight_sum);
        }
    }

    let top = dist.top();
    bucket.narrative_heat = round3(heat);
    bucket.positive_heat = round3(positive);
    bucket.negative_heat = round3(negative);
    bucket.consensus = round3(top.map(|(_, mass)| mass).unwrap_or(0.0));
    bucket.top_event = top.map(|(kind, _)| kind);
    bucket.risk_polarity = round3(
        (dist.positive_mass() - dist.risk_mass()) * (weight_sum / n).min(1.0),
    );
    bucket.event_distribution = dist;
    bucket.article_count = articles.len();
    bucket.avg_source_trust = round3(trust_sum / n);
    bucket.avg_novelty = round3(novelty_sum / n);
    bucket
}

/// Store-backed bucket builder.
pub struct NarrativeAggregator {
    store: Arc<dyn Store>,
}

impl NarrativeAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Rebuild every bucket touched by articles from the last `hours_back`
    /// hours. Articles are grouped by their 10-minute window, each article's
    /// `bucket_ts` is backfilled, and each bucket's velocity chains off the
    /// bucket immediately before it. Returns the buckets oldest first.
    pub async fn process_token_articles(
        &self,
        token: &str,
        hours_back: i64,
    ) -> Result<Vec<Bucket>> {
        let since = Utc::now() - Duration::hours(hours_back);
        let articles = self.store.articles_for_token_since(token, since).await?;

        let mut groups: std::collections::BTreeMap<DateTime<Utc>, Vec<Article>> =
            std::collections::BTreeMap::new();
        for article in articles {
            let ts = article.published_at.unwrap_or(article.created_at);
            groups.entry(bucket_start(ts)).or_default().push(article);
        }

        let mut out = Vec::with_capacity(groups.len());
        for (window, members) in groups {
            for article in &members {
                if article.bucket_ts != Some(window) {
                    self.store.assign_bucket_ts(&article.url, window).await?;
                }
            }
            let prev_heat = self
                .store
                .bucket_before(token, window)
                .await?
                .map(|b| b.narrative_heat);
            let mut bucket = aggregate(token, window, &members);
            bucket.hype_velocity = hype_velocity(bucket.narrative_heat, prev_heat);
            debug!(
                token,
                bucket_ts = %window,
                articles = bucket.article_count,
                heat = bucket.narrative_heat,
                velocity = bucket.hype_velocity,
                "aggregated bucket"
            );
            self.store.upsert_bucket(bucket.clone()).await?;
            out.push(bucket);
        }

        counter!("aggregate_buckets_total", "token" => token.to_string())
            .increment(out.len() as u64);
        if let Some(last) = out.last() {
            gauge!("narrative_heat", "token" => token.to_string()).set(last.narrative_heat);
        }
        Ok(out)
    }

    pub async fn latest_bucket(&self, token: &str) -> Result<Option<Bucket>> {
        self.store.latest_bucket(token).await
    }

    pub async fn buckets_for(&self, token: &str, hours_back: i64) -> Result<Vec<Bucket>> {
        let since = Utc::now() - Duration::hours(hours_back);
        self.store.buckets_for_token_since(token, since).await
    }

    pub async fn upsert_bucket(&self, bucket: Bucket) -> Result<()> {
        self.store.upsert_bucket(bucket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{ArticleFeatures, EventKind};
    use chrono::TimeZone;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 24, h, m, s).unwrap()
    }

    fn scored_article(
        url: &str,
        published: DateTime<Utc>,
        sentiment: f64,
        weight: f64,
        top: EventKind,
    ) -> Article {
        Article {
            token: "BTC".to_string(),
            url: url.to_string(),
            site_name: "coindesk.com".to_string(),
            title: format!("article {url}"),
            published_at: Some(published),
            clean_content: "body".to_string(),
            word_count: 1,
            features: ArticleFeatures {
                event_probs: EventDistribution::single(top),
                sentiment_score: sentiment,
                source_trust: 1.0,
                recency_decay: 1.0,
                novelty_score: 1.0,
                proof_bonus: 1.0,
                final_weight: weight,
            },
            bucket_ts: None,
            created_at: published,
        }
    }

    #[test]
    fn bucket_start_floors_to_ten_minutes() {
        assert_eq!(bucket_start(ts(10, 7, 33)), ts(10, 0, 0));
        assert_eq!(bucket_start(ts(10, 10, 0)), ts(10, 10, 0));
        assert_eq!(bucket_start(ts(10, 19, 59)), ts(10, 10, 0));
        assert_eq!(bucket_start(ts(10, 20, 1)), ts(10, 20, 0));
    }

    #[test]
    fn single_article_heat_is_sentiment_times_weight() {
        let articles = vec![scored_article("u1", ts(10, 3, 0), 0.6, 0.8, EventKind::Listing)];
        let bucket = aggregate("BTC", ts(10, 0, 0), &articles);
        assert!((bucket.narrative_heat - 0.48).abs() < 1e-9);
        assert!((bucket.positive_heat - 0.48).abs() < 1e-9);
        assert_eq!(bucket.negative_heat, 0.0);
        assert_eq!(bucket.top_event, Some(EventKind::Listing));
        assert!((bucket.consensus - 1.0).abs() < 1e-9);
        // Listing is a positive kind, no risk mass, mean weight 0.8.
        assert!((bucket.risk_polarity - 0.8).abs() < 1e-9);
        assert_eq!(bucket.article_count, 1);
    }

    #[test]
    fn empty_bucket_gets_neutral_defaults() {
        let bucket = aggregate("BTC", ts(10, 0, 0), &[]);
        assert_eq!(bucket.narrative_heat, 0.0);
        assert_eq!(bucket.article_count, 0);
        assert_eq!(bucket.top_event, None);
        assert_eq!(bucket.avg_source_trust, 0.5);
        assert_eq!(bucket.avg_novelty, 0.5);
        assert!(bucket.event_distribution.is_zero());
    }

    #[test]
    fn distribution_is_weight_weighted_mean() {
        let articles = vec![
            scored_article("u1", ts(10, 1, 0), 0.0, 1.0, EventKind::Listing),
            scored_article("u2", ts(10, 2, 0), 0.0, 3.0, EventKind::Hack),
        ];
        let bucket = aggregate("BTC", ts(10, 0, 0), &articles);
        assert!((bucket.event_distribution.get(EventKind::Listing) - 0.25).abs() < 1e-9);
        assert!((bucket.event_distribution.get(EventKind::Hack) - 0.75).abs() < 1e-9);
        assert_eq!(bucket.top_event, Some(EventKind::Hack));
    }

    #[test]
    fn velocity_is_zero_for_first_bucket_then_relative() {
        assert_eq!(hype_velocity(0.48, None), 0.0);
        // Small previous heat clamps the divisor at 1.0.
        assert!((hype_velocity(0.9, Some(0.48)) - 0.42).abs() < 1e-9);
        assert!((hype_velocity(1.0, Some(4.0)) - (-0.75)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn process_token_articles_buckets_backfills_and_chains_velocity() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let first = bucket_start(now) - Duration::minutes(20);
        let second = first + Duration::minutes(10);
        store
            .insert_article(scored_article("u1", first + Duration::minutes(3), 0.5, 1.0, EventKind::Listing))
            .await
            .unwrap();
        store
            .insert_article(scored_article("u2", second + Duration::minutes(7), 1.0, 2.0, EventKind::Listing))
            .await
            .unwrap();

        let agg = NarrativeAggregator::new(store.clone());
        let buckets = agg.process_token_articles("BTC", 24).await.unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].bucket_ts, first);
        assert_eq!(buckets[0].hype_velocity, 0.0);
        assert!((buckets[0].narrative_heat - 0.5).abs() < 1e-9);
        assert!((buckets[1].narrative_heat - 2.0).abs() < 1e-9);
        // (2.0 - 0.5) / max(0.5, 1.0)
        assert!((buckets[1].hype_velocity - 1.5).abs() < 1e-9);

        let assigned = store.articles_for_bucket("BTC", first).await.unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].url, "u1");
    }

    #[tokio::test]
    async fn reprocessing_unchanged_articles_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let base = bucket_start(Utc::now()) - Duration::minutes(10);
        store
            .insert_article(scored_article("u1", base + Duration::minutes(2), 0.4, 0.9, EventKind::Partnership))
            .await
            .unwrap();
        store
            .insert_article(scored_article("u2", base + Duration::minutes(8), -0.2, 1.1, EventKind::Hack))
            .await
            .unwrap();

        let agg = NarrativeAggregator::new(store);
        let first = agg.process_token_articles("BTC", 24).await.unwrap();
        let second = agg.process_token_articles("BTC", 24).await.unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.narrative_heat, b.narrative_heat);
            assert_eq!(a.hype_velocity, b.hype_velocity);
            assert_eq!(a.consensus, b.consensus);
            assert_eq!(a.risk_polarity, b.risk_polarity);
            assert_eq!(a.event_distribution, b.event_distribution);
        }
    }
}
