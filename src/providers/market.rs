//! # Market data
//! GeckoTerminal-style client: pool discovery by token symbol, then price,
//! liquidity and volume off the most liquid pool, and minute candles for
//! realized forward returns. Numeric fields arrive as strings on this wire.
//! Transport only; resilience wraps these calls at the pipeline layer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::resilience::CallError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MARKET_API_URL: &str = "https://api.geckoterminal.com/api/v2";

/// Spot market state for one token, as far as the upstream knows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    /// Relative change in trade count; the public pool API does not carry it.
    pub trades_count_change: Option<f64>,
    pub spread_estimate: Option<f64>,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn snapshot(&self, token: &str) -> Result<MarketSnapshot, CallError>;
    /// Realized return as a decimal over `minutes` starting at `start`;
    /// `Ok(None)` when candles do not cover the window.
    async fn forward_return(
        &self,
        token: &str,
        start: DateTime<Utc>,
        minutes: i64,
    ) -> Result<Option<f64>, CallError>;
}

pub struct HttpMarketProvider {
    client: reqwest::Client,
    base_url: String,
    /// token symbol -> (network, pool address), filled by discovery.
    pools: Mutex<HashMap<String, (String, String)>>,
}

impl HttpMarketProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        let base_url = std::env::var("MARKET_API_URL")
            .unwrap_or_else(|_| DEFAULT_MARKET_API_URL.to_string());
        Self::new(base_url)
    }

    /// (network, address) from the discovery cache, searching on a miss.
    async fn cached_pool(&self, token: &str) -> Result<(String, String), CallError> {
        let key = token.to_uppercase();
        let known = {
            let pools = self.pools.lock().expect("market pool map mutex poisoned");
            pools.get(&key).cloned()
        };
        if let Some((network, address)) = known {
            return Ok((network, address));
        }
        let (network, address, _attrs) = self.discover_pool(token).await?;
        Ok((network, address))
    }

    /// Search for the most liquid pool matching a token symbol. Always hits
    /// the wire so pool attributes are current; the (network, address) pair
    /// is remembered for candle lookups.
    async fn discover_pool(&self, token: &str) -> Result<(String, String, PoolAttrs), CallError> {
        let key = token.to_uppercase();
        let response = self
            .client
            .get(format!("{}/search/pools", self.base_url))
            .query(&[("query", token), ("page", "1")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| CallError::transient(format!("pool search request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(CallError::transient(format!(
                "pool search returned {}",
                response.status()
            )));
        }
        let body: PoolSearchResponse = response
            .json()
            .await
            .map_err(|e| CallError::malformed(format!("pool search body: {e}")))?;

        let best = body
            .data
            .into_iter()
            .max_by(|a, b| {
                let la = parse_number(a.attributes.reserve_in_usd.as_deref()).unwrap_or(0.0);
                let lb = parse_number(b.attributes.reserve_in_usd.as_deref()).unwrap_or(0.0);
                la.partial_cmp(&lb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or_else(|| CallError::malformed(format!("no pools found for {token}")))?;

        // Pool ids are "{network}_{address}".
        let network = best
            .id
            .split('_')
            .next()
            .unwrap_or_default()
            .to_string();
        let address = best.attributes.address.clone().unwrap_or_default();
        if network.is_empty() || address.is_empty() {
            return Err(CallError::malformed(format!(
                "pool entry for {token} lacks network or address"
            )));
        }
        debug!(token, network, address, "discovered pool");
        self.pools
            .lock()
            .expect("market pool map mutex poisoned")
            .insert(key, (network.clone(), address.clone()));
        Ok((network, address, best.attributes))
    }

    async fn minute_closes(
        &self,
        network: &str,
        address: &str,
        before: i64,
        limit: usize,
    ) -> Result<Vec<(i64, f64)>, CallError> {
        let response = self
            .client
            .get(format!(
                "{}/networks/{network}/pools/{address}/ohlcv/minute",
                self.base_url
            ))
            .query(&[
                ("limit", limit.min(1000).to_string()),
                ("before_timestamp", before.to_string()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| CallError::transient(format!("ohlcv request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(CallError::transient(format!(
                "ohlcv returned {}",
                response.status()
            )));
        }
        let body: OhlcvResponse = response
            .json()
            .await
            .map_err(|e| CallError::malformed(format!("ohlcv body: {e}")))?;
        Ok(body
            .data
            .attributes
            .ohlcv_list
            .into_iter()
            .map(|(ts, _o, _h, _l, close, _v)| (ts, close))
            .collect())
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketProvider {
    async fn snapshot(&self, token: &str) -> Result<MarketSnapshot, CallError> {
        let (_network, _address, attrs) = self.discover_pool(token).await?;
        Ok(MarketSnapshot {
            price_usd: parse_number(attrs.base_token_price_usd.as_deref()),
            liquidity_usd: parse_number(attrs.reserve_in_usd.as_deref()),
            volume_24h_usd: attrs
                .volume_usd
                .as_ref()
                .and_then(|v| parse_number(v.h24.as_deref())),
            trades_count_change: None,
            spread_estimate: None,
        })
    }

    async fn forward_return(
        &self,
        token: &str,
        start: DateTime<Utc>,
        minutes: i64,
    ) -> Result<Option<f64>, CallError> {
        let (network, address) = self.cached_pool(token).await?;
        let start_ts = start.timestamp();
        let end_ts = start_ts + minutes * 60;
        // A little slack past the window so both endpoints have a candle.
        let candles = self
            .minute_closes(&network, &address, end_ts + 300, (minutes + 30) as usize)
            .await?;
        Ok(return_between(&candles, start_ts, end_ts))
    }
}

/// Decimal return between the last closes at/before each endpoint. `None`
/// when either endpoint has no candle or the base close is not positive.
fn return_between(candles: &[(i64, f64)], start_ts: i64, end_ts: i64) -> Option<f64> {
    let close_at = |target: i64| {
        candles
            .iter()
            .filter(|(ts, _)| *ts <= target)
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, close)| *close)
    };
    let start_close = close_at(start_ts)?;
    let end_close = close_at(end_ts)?;
    if start_close <= 0.0 {
        return None;
    }
    Some((end_close - start_close) / start_close)
}

/// The pool API quotes numbers as JSON strings.
fn parse_number(s: Option<&str>) -> Option<f64> {
    s.and_then(|v| v.parse::<f64>().ok())
}

#[derive(Deserialize)]
struct PoolSearchResponse {
    #[serde(default)]
    data: Vec<PoolEntry>,
}

#[derive(Deserialize)]
struct PoolEntry {
    #[serde(default)]
    id: String,
    attributes: PoolAttrs,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PoolAttrs {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    base_token_price_usd: Option<String>,
    #[serde(default)]
    reserve_in_usd: Option<String>,
    #[serde(default)]
    volume_usd: Option<VolumeUsd>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct VolumeUsd {
    #[serde(default)]
    h24: Option<String>,
}

#[derive(Deserialize)]
struct OhlcvResponse {
    data: OhlcvData,
}

#[derive(Deserialize)]
struct OhlcvData {
    attributes: OhlcvAttrs,
}

#[derive(Deserialize)]
struct OhlcvAttrs {
    #[serde(default)]
    ohlcv_list: Vec<(i64, f64, f64, f64, f64, Option<f64>)>,
}

/// Canned provider for tests and offline runs.
#[derive(Default)]
pub struct MockMarketProvider {
    snapshot: MarketSnapshot,
    returns: HashMap<String, f64>,
    fail: bool,
}

impl MockMarketProvider {
    pub fn with_snapshot(snapshot: MarketSnapshot) -> Self {
        Self {
            snapshot,
            ..Self::default()
        }
    }

    pub fn with_return(mut self, token: &str, decimal_return: f64) -> Self {
        self.returns.insert(token.to_uppercase(), decimal_return);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketProvider {
    async fn snapshot(&self, _token: &str) -> Result<MarketSnapshot, CallError> {
        if self.fail {
            return Err(CallError::transient("mock market data down"));
        }
        Ok(self.snapshot)
    }

    async fn forward_return(
        &self,
        token: &str,
        _start: DateTime<Utc>,
        _minutes: i64,
    ) -> Result<Option<f64>, CallError> {
        if self.fail {
            return Err(CallError::transient("mock market data down"));
        }
        Ok(self.returns.get(&token.to_uppercase()).copied())
    }
}
