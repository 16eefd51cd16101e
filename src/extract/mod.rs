//! # Feature Extractor
//! Turns one raw article into scored [`ArticleFeatures`]. The remote event
//! classifier runs behind the resilience stack (rate limit → retry →
//! breaker); everything after that is deterministic scoring. Extraction is a
//! total function: every step has a defined default, so one bad article can
//! never take the ingestion loop down.

pub mod classify;
pub mod novelty;
pub mod proof;
pub mod recency;
pub mod sentiment;
pub mod trust;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, warn};

use crate::providers::classifier::EventClassifier;
use crate::resilience::{service, FallbackCache, ResilienceContext, RetryPolicy};
use crate::types::{ArticleFeatures, EventDistribution, RawArticle};

pub use classify::EVENT_CACHE_TTL;
pub use novelty::NoveltyTracker;
pub use recency::DEFAULT_TAU_HOURS;
pub use trust::TrustTable;

/// Per-article feature extraction with a resilient classifier path.
pub struct FeatureExtractor {
    classifier: Arc<dyn EventClassifier>,
    resilience: Arc<ResilienceContext>,
    event_cache: Arc<FallbackCache<EventDistribution>>,
    retry: RetryPolicy,
    trust: TrustTable,
    novelty: NoveltyTracker,
    tau_hours: f64,
}

impl FeatureExtractor {
    pub fn new(classifier: Arc<dyn EventClassifier>, resilience: Arc<ResilienceContext>) -> Self {
        let event_cache: Arc<FallbackCache<EventDistribution>> = Arc::new(FallbackCache::new());
        resilience.register_cache("classifier_events", Arc::clone(&event_cache) as _);
        Self {
            classifier,
            resilience,
            event_cache,
            retry: RetryPolicy::new(2, Duration::from_secs(2), Duration::from_secs(8)),
            trust: TrustTable::default_seed(),
            novelty: NoveltyTracker::new(),
            tau_hours: DEFAULT_TAU_HOURS,
        }
    }

    pub fn with_trust_table(mut self, trust: TrustTable) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_tau_hours(mut self, tau_hours: f64) -> Self {
        self.tau_hours = tau_hours;
        self
    }

    /// Test hook: tighten the classifier retry schedule.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Extract all features for `raw` in the context of `token`. Never fails.
    pub async fn extract(&self, raw: &RawArticle, token: &str) -> ArticleFeatures {
        counter!("extract_articles_total").increment(1);

        if raw.title.trim().is_empty() && raw.clean_content.trim().is_empty() {
            warn!(url = %raw.url, "article has no usable text, serving degraded features");
            counter!("extract_degraded_total").increment(1);
            return ArticleFeatures::degraded();
        }

        let event_probs = self.classify_events(&raw.title, &raw.clean_content).await;
        let sentiment_score =
            sentiment::article_sentiment(&raw.title, &raw.clean_content, token);
        let source_trust = self.trust.trust_for(&raw.site_name, &raw.url);
        let recency_decay =
            recency::recency_decay(raw.published_at.as_deref(), Utc::now(), self.tau_hours);
        let novelty_score = self.novelty.score(&raw.clean_content);
        let proof_bonus = proof::proof_bonus(&raw.clean_content, &raw.url);
        let final_weight = source_trust * recency_decay * novelty_score * proof_bonus;

        debug!(
            url = %raw.url,
            sentiment = sentiment_score,
            weight = final_weight,
            "features extracted"
        );

        ArticleFeatures {
            event_probs,
            sentiment_score,
            source_trust,
            recency_decay,
            novelty_score,
            proof_bonus,
            final_weight,
        }
    }

    /// Classifier chain: guarded remote call, then cached result, then
    /// keyword rules. Total.
    async fn classify_events(&self, title: &str, content: &str) -> EventDistribution {
        let key = classify::classification_cache_key(title, content);

        self.resilience.limiter(service::CLASSIFIER).acquire(1.0).await;
        let breaker = self.resilience.breaker(service::CLASSIFIER);
        let outcome = self
            .retry
            .run(Some(&breaker), || self.classifier.classify(title, content))
            .await;

        match outcome {
            Ok(raw) => {
                let dist = classify::normalize_distribution(raw);
                self.event_cache.set(&key, dist, EVENT_CACHE_TTL);
                counter!("classifier_calls_total", "outcome" => "ok").increment(1);
                dist
            }
            Err(err) => {
                warn!(error = %err, "classifier unavailable, walking fallback chain");
                counter!("classifier_calls_total", "outcome" => "error").increment(1);

                if let Some(cached) = self.event_cache.get(&key) {
                    counter!("classifier_fallback_total", "stage" => "cache").increment(1);
                    return cached;
                }

                let dist = classify::rule_based_classification(title, content);
                self.event_cache.set(&key, dist, EVENT_CACHE_TTL);
                counter!("classifier_fallback_total", "stage" => "rules").increment(1);
                dist
            }
        }
    }

    /// Snapshot of the classifier fallback cache (status surface).
    pub fn event_cache(&self) -> &FallbackCache<EventDistribution> {
        &self.event_cache
    }
}
