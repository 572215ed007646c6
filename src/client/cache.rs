//! Response Cache
//!
//! In-memory TTL cache for upstream payloads, so repeated lookups of the
//! same channel do not burn quota.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache key prefixes
pub const PREFIX_CHANNEL: &str = "channel";
pub const PREFIX_VIDEOS: &str = "videos";
pub const PREFIX_ANALYSIS: &str = "analysis";

/// Build a namespaced cache key
pub fn cache_key(prefix: &str, id: &str) -> String {
    format!("{}:{}", prefix, id)
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Thread-safe TTL cache of JSON values
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

/// Counts reported by [`ResponseCache::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResponseCache {
    /// Create a cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Fresh value for `key`. Expired entries are evicted on read.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let fresh = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };

        if fresh.is_none() {
            entries.remove(key);
        }
        fresh
    }

    /// Store with the default TTL
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().insert(key.into(), entry);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.lock().remove(key).map(|e| e.value)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop every expired entry, returning how many went
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.lock();
        let expired = entries.values().filter(|e| e.expires_at <= now).count();

        CacheStats {
            total: entries.len(),
            active: entries.len() - expired,
            expired,
        }
    }
}
