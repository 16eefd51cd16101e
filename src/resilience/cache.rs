//! # Fallback Cache
//! TTL key-value store of last-known-good payloads, used to serve stale data
//! when an upstream is down. Eviction is lazy: expired entries are removed
//! when a read touches them (or when `stats` walks the table).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires: Instant,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Per-entry view for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    /// Newest first.
    pub entries: Vec<CacheEntryInfo>,
}

/// Thread-safe TTL cache. One instance per concern; values stay typed.
#[derive(Debug)]
pub struct FallbackCache<V> {
    inner: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> Default for FallbackCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FallbackCache<V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Utc::now();
        let entry = Entry {
            value,
            expires: Instant::now() + ttl,
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        };
        let mut map = self.inner.lock().expect("fallback cache mutex poisoned");
        map.insert(key.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("fallback cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut map = self.inner.lock().expect("fallback cache mutex poisoned");
        let n = map.len();
        map.clear();
        n
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let map = self.inner.lock().expect("fallback cache mutex poisoned");
        let mut entries: Vec<CacheEntryInfo> = map
            .iter()
            .map(|(key, e)| CacheEntryInfo {
                key: key.clone(),
                created_at: e.created_at,
                expires_at: e.expires_at,
                expired: now > e.expires,
            })
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        CacheStats {
            size: entries.len(),
            entries,
        }
    }
}

impl<V: Clone> FallbackCache<V> {
    /// Fetch a live entry. An expired entry is removed and reads as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut map = self.inner.lock().expect("fallback cache mutex poisoned");
        match map.get(key) {
            Some(e) if Instant::now() <= e.expires => Some(e.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }
}
