//! # News gateway
//! Search-and-scrape client against the MCP-style news gateway: `POST /search`
//! with a query, `POST /scrape` with a URL. Transport only; rate limiting,
//! breakers, retries and stale-result fallback wrap these calls at the
//! pipeline layer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::resilience::CallError;
use crate::types::RawArticle;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Scrapes return large payloads and run much slower than search.
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(90);

const DEFAULT_GATEWAY_URL: &str = "https://scraper.agentchain.trade";

/// One search result from the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub content: String,
}

#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CallError>;
    /// Fetch and clean one article; the token it was searched for is attached
    /// to the result.
    async fn scrape(&self, token: &str, url: &str) -> Result<RawArticle, CallError>;
}

pub struct HttpNewsGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNewsGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env() -> Self {
        let base_url =
            std::env::var("NEWS_GATEWAY_URL").unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string());
        Self::new(base_url)
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Scrape payload, of which we keep a fraction. Field set mirrors the
/// gateway's response; everything is optional on the wire.
#[derive(Default, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    site_name: Option<String>,
    #[serde(default)]
    clean_content: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    word_count: Option<usize>,
}

#[async_trait]
impl NewsProvider for HttpNewsGateway {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CallError> {
        #[derive(Serialize)]
        struct SearchRequest<'a> {
            query: &'a str,
        }

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .timeout(SEARCH_TIMEOUT)
            .json(&SearchRequest { query })
            .send()
            .await
            .map_err(|e| CallError::transient(format!("news search request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(CallError::transient(format!(
                "news search returned {}",
                response.status()
            )));
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| CallError::malformed(format!("news search body: {e}")))?;
        Ok(body.results)
    }

    async fn scrape(&self, token: &str, url: &str) -> Result<RawArticle, CallError> {
        #[derive(Serialize)]
        struct ScrapeRequest<'a> {
            url: &'a str,
        }

        let response = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .timeout(SCRAPE_TIMEOUT)
            .json(&ScrapeRequest { url })
            .send()
            .await
            .map_err(|e| CallError::transient(format!("news scrape request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(CallError::transient(format!(
                "news scrape returned {}",
                response.status()
            )));
        }
        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| CallError::malformed(format!("news scrape body: {e}")))?;
        article_from_scrape(token, url, body)
    }
}

/// Fold a scrape payload into a [`RawArticle`]. Content may arrive under
/// `clean_content` or `content`; an article with neither is unusable.
fn article_from_scrape(
    token: &str,
    requested_url: &str,
    body: ScrapeResponse,
) -> Result<RawArticle, CallError> {
    let content = body
        .clean_content
        .or(body.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(CallError::malformed(format!(
            "scrape of {requested_url} returned no usable content"
        )));
    }
    let title = html_escape::decode_html_entities(body.title.as_deref().unwrap_or_default())
        .trim()
        .to_string();
    let word_count = body
        .word_count
        .unwrap_or_else(|| content.split_whitespace().count());
    Ok(RawArticle {
        token: token.to_string(),
        url: body.url.unwrap_or_else(|| requested_url.to_string()),
        site_name: body.site_name.unwrap_or_default(),
        title,
        published_at: body.published_at,
        clean_content: content,
        word_count,
    })
}

/// Canned provider for tests and offline runs.
pub struct MockNewsProvider {
    articles: Vec<RawArticle>,
    fail: bool,
}

impl MockNewsProvider {
    pub fn with_articles(articles: Vec<RawArticle>) -> Self {
        Self {
            articles,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            articles: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl NewsProvider for MockNewsProvider {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, CallError> {
        if self.fail {
            return Err(CallError::transient("mock news search down"));
        }
        Ok(self
            .articles
            .iter()
            .map(|a| SearchHit {
                title: a.title.clone(),
                url: a.url.clone(),
                score: 1.0,
                engine: "mock".to_string(),
                content: String::new(),
            })
            .collect())
    }

    async fn scrape(&self, token: &str, url: &str) -> Result<RawArticle, CallError> {
        if self.fail {
            return Err(CallError::transient("mock news scrape down"));
        }
        self.articles
            .iter()
            .find(|a| a.url == url)
            .map(|a| {
                let mut out = a.clone();
                out.token = token.to_string();
                out
            })
            .ok_or_else(|| CallError::transient(format!("mock has no article for {url}")))
    }
}
