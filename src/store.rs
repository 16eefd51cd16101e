//! # Store
//! Persistence seam for articles, buckets, labels and model records. The
//! pipeline only talks to the [`Store`] trait; the in-memory implementation
//! below is the reference backend and what every test runs against.
//! Relational backends live behind the same trait in embedding services.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Article, Bucket, Label, ModelRecord};

/// Persistence contract. Duplicate-key inserts are not errors: they report
/// `false` so callers can treat "already processed" as a skip.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert unless an article with the same URL exists.
    async fn insert_article(&self, article: Article) -> Result<bool>;
    async fn has_article(&self, url: &str) -> Result<bool>;
    /// Articles for `token` published (or, lacking a publish time, created)
    /// at/after `since`, oldest first.
    async fn articles_for_token_since(&self, token: &str, since: DateTime<Utc>)
        -> Result<Vec<Article>>;
    /// Backfill the bucket assignment of one article.
    async fn assign_bucket_ts(&self, url: &str, bucket_ts: DateTime<Utc>) -> Result<()>;
    /// Articles already assigned to one bucket, heaviest first.
    async fn articles_for_bucket(&self, token: &str, bucket_ts: DateTime<Utc>)
        -> Result<Vec<Article>>;

    /// Insert or overwrite by (token, bucket_ts).
    async fn upsert_bucket(&self, bucket: Bucket) -> Result<()>;
    /// Exact lookup by (token, bucket_ts).
    async fn bucket_at(&self, token: &str, bucket_ts: DateTime<Utc>) -> Result<Option<Bucket>>;
    /// Latest bucket strictly before `ts` for `token`.
    async fn bucket_before(&self, token: &str, ts: DateTime<Utc>) -> Result<Option<Bucket>>;
    async fn latest_bucket(&self, token: &str) -> Result<Option<Bucket>>;
    /// Buckets at/after `since`, oldest first.
    async fn buckets_for_token_since(&self, token: &str, since: DateTime<Utc>)
        -> Result<Vec<Bucket>>;

    /// Insert unless a label for (token, bucket_ts) exists.
    async fn insert_label(&self, label: Label) -> Result<bool>;
    async fn labels_for_token(&self, token: &str) -> Result<Vec<Label>>;
    async fn all_labels(&self) -> Result<Vec<Label>>;

    /// Persist a model record as the active one; prior records deactivate.
    async fn save_model(&self, record: ModelRecord) -> Result<()>;
    async fn active_model(&self) -> Result<Option<ModelRecord>>;
    async fn models(&self) -> Result<Vec<ModelRecord>>;
}

#[derive(Default)]
struct MemoryInner {
    /// Keyed by URL.
    articles: HashMap<String, Article>,
    /// Keyed by (token, bucket_ts).
    buckets: HashMap<(String, DateTime<Utc>), Bucket>,
    /// Keyed by (token, bucket_ts).
    labels: HashMap<(String, DateTime<Utc>), Label>,
    models: Vec<ModelRecord>,
}

/// In-memory reference backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn article_order_key(a: &Article) -> DateTime<Utc> {
    a.published_at.unwrap_or(a.created_at)
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_article(&self, article: Article) -> Result<bool> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if inner.articles.contains_key(&article.url) {
            return Ok(false);
        }
        inner.articles.insert(article.url.clone(), article);
        Ok(true)
    }

    async fn has_article(&self, url: &str) -> Result<bool> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.articles.contains_key(url))
    }

    async fn articles_for_token_since(
        &self,
        token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<Article> = inner
            .articles
            .values()
            .filter(|a| a.token == token && article_order_key(a) >= since)
            .cloned()
            .collect();
        out.sort_by_key(article_order_key);
        Ok(out)
    }

    async fn assign_bucket_ts(&self, url: &str, bucket_ts: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if let Some(a) = inner.articles.get_mut(url) {
            a.bucket_ts = Some(bucket_ts);
        }
        Ok(())
    }

    async fn articles_for_bucket(
        &self,
        token: &str,
        bucket_ts: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<Article> = inner
            .articles
            .values()
            .filter(|a| a.token == token && a.bucket_ts == Some(bucket_ts))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.features
                .final_weight
                .partial_cmp(&a.features.final_weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(out)
    }

    async fn upsert_bucket(&self, bucket: Bucket) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner
            .buckets
            .insert((bucket.token.clone(), bucket.bucket_ts), bucket);
        Ok(())
    }

    async fn bucket_at(&self, token: &str, bucket_ts: DateTime<Utc>) -> Result<Option<Bucket>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.buckets.get(&(token.to_string(), bucket_ts)).cloned())
    }

    async fn bucket_before(&self, token: &str, ts: DateTime<Utc>) -> Result<Option<Bucket>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .buckets
            .values()
            .filter(|b| b.token == token && b.bucket_ts < ts)
            .max_by_key(|b| b.bucket_ts)
            .cloned())
    }

    async fn latest_bucket(&self, token: &str) -> Result<Option<Bucket>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .buckets
            .values()
            .filter(|b| b.token == token)
            .max_by_key(|b| b.bucket_ts)
            .cloned())
    }

    async fn buckets_for_token_since(
        &self,
        token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Bucket>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<Bucket> = inner
            .buckets
            .values()
            .filter(|b| b.token == token && b.bucket_ts >= since)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.bucket_ts);
        Ok(out)
    }

    async fn insert_label(&self, label: Label) -> Result<bool> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let key = (label.token.clone(), label.bucket_ts);
        if inner.labels.contains_key(&key) {
            return Ok(false);
        }
        inner.labels.insert(key, label);
        Ok(true)
    }

    async fn labels_for_token(&self, token: &str) -> Result<Vec<Label>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<Label> = inner
            .labels
            .values()
            .filter(|l| l.token == token)
            .cloned()
            .collect();
        out.sort_by_key(|l| l.bucket_ts);
        Ok(out)
    }

    async fn all_labels(&self) -> Result<Vec<Label>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<Label> = inner.labels.values().cloned().collect();
        out.sort_by_key(|l| l.bucket_ts);
        Ok(out)
    }

    async fn save_model(&self, record: ModelRecord) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        for m in inner.models.iter_mut() {
            m.is_active = false;
        }
        inner.models.push(record);
        Ok(())
    }

    async fn active_model(&self) -> Result<Option<ModelRecord>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.models.iter().rev().find(|m| m.is_active).cloned())
    }

    async fn models(&self) -> Result<Vec<ModelRecord>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut out = inner.models.clone();
        out.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(out)
    }
}
