use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{CacheBackend, CacheError, CacheStats};

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process LRU map with a TTL checked on read. At capacity the least
/// recently used entry makes room for the new one.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Option<Duration>,
    capacity: Option<NonZeroUsize>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// `ttl` of zero disables expiry; `max_entries` of zero disables the cap.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries);
        let entries = match capacity {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            entries: Mutex::new(entries),
            ttl: (!ttl.is_zero()).then_some(ttl),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let live = entries
            .get(key)
            .map(|e| (!e.expired(now)).then(|| e.value.clone()));
        let found = match live {
            Some(Some(value)) => Some(value),
            Some(None) => {
                debug!(%key, "dropping expired cache entry");
                entries.pop(key);
                None
            }
            None => None,
        };
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn set(&self, key: &str, value: Value) {
        let now = Instant::now();
        let entry = Entry {
            value,
            expires_at: self.ttl.map(|ttl| now + ttl),
        };
        let displaced = self.entries.lock().push(key.to_string(), entry);
        if let Some((evicted, _)) = displaced.filter(|(k, _)| k != key) {
            debug!(key = %evicted, "evicted least recently used cache entry");
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.entries.lock().clear();
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = Instant::now();
        let entries = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| !e.expired(now))
            .count();
        Ok(CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            max_entries: self.capacity.map(NonZeroUsize::get),
        })
    }
}

/// Caching disabled: every lookup misses and nothing is stored.
#[derive(Default)]
pub struct NullCache {
    misses: AtomicU64,
}

impl CacheBackend for NullCache {
    fn name(&self) -> &'static str {
        "null"
    }

    fn get(&self, _key: &str) -> Option<Value> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, _key: &str, _value: Value) {}

    fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        })
    }
}
