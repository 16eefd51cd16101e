//! # Analysis pipeline
//!
//! End-to-end orchestration for one token: search the news gateway, scrape
//! and extract candidate articles, fold them into 10-minute buckets, then
//! score the freshest bucket and compose a readable thesis. Every upstream
//! call runs through the shared resilience registry, and failures degrade
//! stage by stage instead of aborting the pass: a failed search serves
//! cached hits, a failed scrape skips that article, a failed market lookup
//! leaves the bucket unenriched.
//!
//! Label backfill lives here too. Once a bucket's 60-minute horizon has
//! closed, the realized forward return is fetched and stored as a binary
//! outcome, which is what the trainer later joins against.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::NarrativeAggregator;
use crate::extract::recency::parse_publish_time;
use crate::extract::FeatureExtractor;
use crate::predict::{PredictionEngine, TrainOutcome};
use crate::providers::{MarketDataProvider, MarketSnapshot, NewsProvider, SearchHit};
use crate::resilience::{
    service, CacheInspect, CallError, FallbackCache, ResilienceContext, RetryPolicy,
};
use crate::store::Store;
use crate::thesis::{Thesis, ThesisComposer};
use crate::types::{Article, Bucket, Label, Prediction, RawArticle};

const SEARCH_CACHE_TTL: Duration = Duration::from_secs(1800);
const SCRAPE_CACHE_TTL: Duration = Duration::from_secs(3600);
const SNAPSHOT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Horizon a bucket must age past before its outcome label is fetched.
const LABEL_HORIZON_MIN: i64 = 60;
/// Extra minutes past the horizon so the closing candle exists upstream.
const LABEL_MATURITY_SLACK_MIN: i64 = 10;
/// Forward return a bucket must clear, as a decimal, to label positive.
const LABEL_RETURN_THRESHOLD: f64 = 0.005;

/// Query templates fanned out per token on every ingest pass.
fn search_queries(token: &str) -> [String; 4] {
    [
        format!("{} token news", token),
        format!("{} cryptocurrency latest", token),
        format!("{} twitter trends", token),
        format!("{} market analysis", token),
    ]
}

/// Outcome counts for one ingest pass over one token.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub token: String,
    /// Deduplicated candidate URLs the search fan-out produced.
    pub fetched: usize,
    /// Articles scraped, extracted and stored this pass.
    pub processed: usize,
    /// Candidates already in the store.
    pub skipped: usize,
    /// Candidates lost to scrape or store failures.
    pub failed: usize,
    /// Buckets rebuilt by the aggregation sweep afterwards.
    pub buckets: usize,
}

/// Full read-side answer for one token: the freshest bucket, its score and
/// the composed thesis.
#[derive(Debug, Clone, Serialize)]
pub struct TokenAnalysis {
    pub bucket: Bucket,
    pub prediction: Prediction,
    pub thesis: Thesis,
}

pub struct AnalysisPipeline {
    resilience: Arc<ResilienceContext>,
    store: Arc<dyn Store>,
    news: Arc<dyn NewsProvider>,
    market: Arc<dyn MarketDataProvider>,
    extractor: FeatureExtractor,
    aggregator: NarrativeAggregator,
    engine: PredictionEngine,
    search_retry: RetryPolicy,
    scrape_retry: RetryPolicy,
    market_retry: RetryPolicy,
    search_cache: Arc<FallbackCache<Vec<SearchHit>>>,
    scrape_cache: Arc<FallbackCache<RawArticle>>,
    snapshot_cache: Arc<FallbackCache<MarketSnapshot>>,
}

impl AnalysisPipeline {
    pub fn new(
        resilience: Arc<ResilienceContext>,
        store: Arc<dyn Store>,
        news: Arc<dyn NewsProvider>,
        market: Arc<dyn MarketDataProvider>,
        extractor: FeatureExtractor,
    ) -> Self {
        let search_cache = Arc::new(FallbackCache::new());
        let scrape_cache = Arc::new(FallbackCache::new());
        let snapshot_cache = Arc::new(FallbackCache::new());
        resilience.register_cache(
            service::NEWS_SEARCH,
            Arc::clone(&search_cache) as Arc<dyn CacheInspect>,
        );
        resilience.register_cache(
            service::NEWS_SCRAPE,
            Arc::clone(&scrape_cache) as Arc<dyn CacheInspect>,
        );
        resilience.register_cache(
            service::MARKET_DATA,
            Arc::clone(&snapshot_cache) as Arc<dyn CacheInspect>,
        );

        Self {
            aggregator: NarrativeAggregator::new(Arc::clone(&store)),
            engine: PredictionEngine::new(Arc::clone(&store)),
            search_retry: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(5)),
            scrape_retry: RetryPolicy::new(2, Duration::from_secs(2), Duration::from_secs(15)),
            market_retry: RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(3)),
            resilience,
            store,
            news,
            market,
            extractor,
            search_cache,
            scrape_cache,
            snapshot_cache,
        }
    }

    pub fn with_search_retry(mut self, policy: RetryPolicy) -> Self {
        self.search_retry = policy;
        self
    }

    pub fn with_scrape_retry(mut self, policy: RetryPolicy) -> Self {
        self.scrape_retry = policy;
        self
    }

    pub fn with_market_retry(mut self, policy: RetryPolicy) -> Self {
        self.market_retry = policy;
        self
    }

    /// Fan out the query templates, scrape what is new, extract features and
    /// rebuild the token's recent buckets. Individual article failures are
    /// counted, never fatal; only a store-level aggregation error propagates.
    pub async fn ingest_token(
        &self,
        token: &str,
        hours_back: i64,
        max_articles: usize,
    ) -> Result<IngestReport> {
        let started = std::time::Instant::now();
        let mut report = IngestReport {
            token: token.to_string(),
            ..IngestReport::default()
        };

        let queries = search_queries(token);
        let per_query = (max_articles / queries.len()).max(1);
        let mut seen = HashSet::new();
        let mut candidates: Vec<String> = Vec::new();
        for query in &queries {
            let hits = self.guarded_search(token, query).await;
            for hit in hits.into_iter().take(per_query) {
                if hit.url.is_empty() || !seen.insert(hit.url.clone()) {
                    continue;
                }
                candidates.push(hit.url);
            }
        }
        candidates.truncate(max_articles);
        report.fetched = candidates.len();

        for url in &candidates {
            if self.store.has_article(url).await? {
                report.skipped += 1;
                continue;
            }
            let raw = match self.guarded_scrape(token, url).await {
                Some(raw) => raw,
                None => {
                    report.failed += 1;
                    continue;
                }
            };
            let features = self.extractor.extract(&raw, token).await;
            let published_at = raw.published_at.as_deref().and_then(parse_publish_time);
            let article = Article {
                token: token.to_string(),
                url: raw.url,
                site_name: raw.site_name,
                title: raw.title,
                published_at,
                clean_content: raw.clean_content,
                word_count: raw.word_count,
                features,
                bucket_ts: None,
                created_at: Utc::now(),
            };
            match self.store.insert_article(article).await {
                Ok(true) => report.processed += 1,
                // The scrape resolved to a URL we already hold.
                Ok(false) => report.skipped += 1,
                Err(error) => {
                    warn!(url, error = %error, "failed to store article");
                    report.failed += 1;
                }
            }
        }

        let rebuilt = self
            .aggregator
            .process_token_articles(token, hours_back)
            .await?;
        report.buckets = rebuilt.len();

        for (outcome, count) in [
            ("processed", report.processed),
            ("skipped", report.skipped),
            ("failed", report.failed),
        ] {
            counter!(
                "ingest_articles_total",
                "token" => report.token.clone(),
                "outcome" => outcome,
            )
            .increment(count as u64);
        }
        histogram!("ingest_pass_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            token,
            fetched = report.fetched,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            buckets = report.buckets,
            "ingest pass complete"
        );
        Ok(report)
    }

    /// Score the freshest bucket for `token`. Enriches it with a live market
    /// snapshot first when one is reachable, then predicts and composes the
    /// thesis from the bucket's own articles. `None` when no bucket exists
    /// yet.
    pub async fn analyze_token(&self, token: &str) -> Result<Option<TokenAnalysis>> {
        let Some(mut bucket) = self.store.latest_bucket(token).await? else {
            debug!(token, "no buckets yet, nothing to analyze");
            return Ok(None);
        };

        if let Some(snapshot) = self.guarded_snapshot(token).await {
            bucket.liquidity_usd = snapshot.liquidity_usd.or(bucket.liquidity_usd);
            bucket.trades_count_change = snapshot
                .trades_count_change
                .or(bucket.trades_count_change);
            bucket.spread_estimate = snapshot.spread_estimate.or(bucket.spread_estimate);
            self.store.upsert_bucket(bucket.clone()).await?;
        }

        let prediction = self.engine.predict(&bucket).await;
        let articles = self
            .store
            .articles_for_bucket(token, bucket.bucket_ts)
            .await?;
        let thesis = ThesisComposer::compose(&bucket, &prediction, &articles);
        info!(
            token,
            probability = prediction.probability_up,
            direction = %thesis.direction,
            "analysis complete"
        );
        Ok(Some(TokenAnalysis {
            bucket,
            prediction,
            thesis,
        }))
    }

    /// Record outcome labels for every matured, still-unlabeled bucket in
    /// the window. A bucket is matured once its 60-minute horizon plus candle
    /// slack has passed. Market failures skip the bucket and leave it for the
    /// next sweep.
    pub async fn backfill_labels(&self, token: &str, hours_back: i64) -> Result<usize> {
        let now = Utc::now();
        let since = now - ChronoDuration::hours(hours_back);
        let buckets = self.store.buckets_for_token_since(token, since).await?;
        let labeled: HashSet<_> = self
            .store
            .labels_for_token(token)
            .await?
            .into_iter()
            .map(|label| label.bucket_ts)
            .collect();

        let mut recorded = 0usize;
        for bucket in buckets {
            let matured_at = bucket.bucket_ts
                + ChronoDuration::minutes(LABEL_HORIZON_MIN + LABEL_MATURITY_SLACK_MIN);
            if matured_at > now || labeled.contains(&bucket.bucket_ts) {
                continue;
            }

            let forward = match self.guarded_forward_return(token, &bucket).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    debug!(token, bucket_ts = %bucket.bucket_ts, "no candles covering the horizon");
                    continue;
                }
                Err(error) => {
                    warn!(token, bucket_ts = %bucket.bucket_ts, error = %error, "forward return unavailable");
                    continue;
                }
            };

            let label = Label {
                token: token.to_string(),
                bucket_ts: bucket.bucket_ts,
                forward_return_60m: forward,
                label_binary: u8::from(forward > LABEL_RETURN_THRESHOLD),
            };
            if self.store.insert_label(label).await? {
                recorded += 1;
            }
        }

        counter!("labels_recorded_total", "token" => token.to_string())
            .increment(recorded as u64);
        if recorded > 0 {
            info!(token, recorded, "labels backfilled");
        }
        Ok(recorded)
    }

    /// Retrain from whatever supervision exists. Real labels once enough
    /// have accumulated, the synthetic bootstrap before that.
    pub async fn auto_train(&self, tokens: &[String], hours_back: i64) -> Result<TrainOutcome> {
        self.engine.auto_train(tokens, hours_back).await
    }

    async fn guarded_search(&self, token: &str, query: &str) -> Vec<SearchHit> {
        self.resilience
            .limiter(service::NEWS_SEARCH)
            .acquire(1.0)
            .await;
        let breaker = self.resilience.breaker(service::NEWS_SEARCH);
        let result = self
            .search_retry
            .run(Some(&breaker), || self.news.search(query))
            .await;
        match result {
            Ok(hits) => {
                self.search_cache
                    .set(query, hits.clone(), SEARCH_CACHE_TTL);
                hits
            }
            Err(error) => match self.search_cache.get(query) {
                Some(hits) => {
                    info!(token, query, "serving cached search results");
                    counter!("search_cache_served_total").increment(1);
                    hits
                }
                None => {
                    warn!(token, query, error = %error, "search unavailable, skipping query");
                    Vec::new()
                }
            },
        }
    }

    async fn guarded_scrape(&self, token: &str, url: &str) -> Option<RawArticle> {
        self.resilience
            .limiter(service::NEWS_SCRAPE)
            .acquire(1.0)
            .await;
        let breaker = self.resilience.breaker(service::NEWS_SCRAPE);
        let result = self
            .scrape_retry
            .run_with_fallback(
                Some(&breaker),
                || async move {
                    let raw = self.news.scrape(token, url).await?;
                    self.scrape_cache.set(url, raw.clone(), SCRAPE_CACHE_TTL);
                    Ok(raw)
                },
                || async move {
                    self.scrape_cache
                        .get(url)
                        .ok_or_else(|| CallError::transient("article not in fallback cache"))
                },
            )
            .await;
        match result {
            Ok(raw) => Some(raw),
            Err(error) => {
                warn!(token, url, error = %error, "scrape failed, dropping candidate");
                None
            }
        }
    }

    async fn guarded_snapshot(&self, token: &str) -> Option<MarketSnapshot> {
        self.resilience
            .limiter(service::MARKET_DATA)
            .acquire(1.0)
            .await;
        let breaker = self.resilience.breaker(service::MARKET_DATA);
        let result = self
            .market_retry
            .run_with_fallback(
                Some(&breaker),
                || async move {
                    let snapshot = self.market.snapshot(token).await?;
                    self.snapshot_cache
                        .set(token, snapshot, SNAPSHOT_CACHE_TTL);
                    Ok(snapshot)
                },
                || async move {
                    self.snapshot_cache
                        .get(token)
                        .ok_or_else(|| CallError::transient("no cached market snapshot"))
                },
            )
            .await;
        match result {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                warn!(token, error = %error, "market snapshot unavailable");
                None
            }
        }
    }

    async fn guarded_forward_return(
        &self,
        token: &str,
        bucket: &Bucket,
    ) -> Result<Option<f64>, CallError> {
        self.resilience
            .limiter(service::MARKET_DATA)
            .acquire(1.0)
            .await;
        let breaker = self.resilience.breaker(service::MARKET_DATA);
        self.market_retry
            .run(Some(&breaker), || {
                self.market
                    .forward_return(token, bucket.bucket_ts, LABEL_HORIZON_MIN)
            })
            .await
    }
}
