pub mod flight;
pub mod key;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use flight::InFlight;
pub use key::KeyParams;
pub use memory::{MemoryCache, NullCache};

/// Failure reported by a cache backend. `MemoryCache` and `NullCache` never
/// produce one; the variant exists for backends that talk to an external
/// store, and `/cache-info` and `/cache-clear` answer it with a 500.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Backend-reported statistics for `/cache-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
}

/// Keyed response store with a backend-defined default TTL. Entries are
/// replaced whole, never patched.
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Option<Value>;

    /// Store with the backend's default TTL.
    fn set(&self, key: &str, value: Value);

    /// Drop every entry regardless of key. Infallible for the in-process
    /// backends.
    fn clear(&self) -> Result<(), CacheError>;

    /// Infallible for the in-process backends.
    fn stats(&self) -> Result<CacheStats, CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CacheType {
    /// In-process map with TTL.
    Simple,
    /// Never stores anything.
    Null,
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheType::Simple => write!(f, "simple"),
            CacheType::Null => write!(f, "null"),
        }
    }
}

/// Build the configured backend. A zero `ttl` means entries never expire.
pub fn build(kind: CacheType, ttl: Duration, max_entries: usize) -> Arc<dyn CacheBackend> {
    match kind {
        CacheType::Simple => Arc::new(MemoryCache::new(ttl, max_entries)),
        CacheType::Null => Arc::new(NullCache::default()),
    }
}
