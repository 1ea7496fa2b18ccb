//! hal-cache - two-tier cache for hardware instrument data
//!
//! A bounded in-memory tier with pluggable eviction (LRU, LFU, TTL, FIFO)
//! sits in front of an optional directory-backed tier that survives restarts.
//! The [`CacheManager`] ties both together and adds deterministic keys for
//! instrument configurations, measurements and calibration data.
//!
//! ```no_run
//! use hal_cache::{CacheConfig, CacheManager, EvictionStrategy};
//! use serde_json::json;
//!
//! # fn main() -> hal_cache::Result<()> {
//! let config = CacheConfig::memory_only(1000, EvictionStrategy::Lru)
//!     .with_durable("./data/cache", 100 * 1024 * 1024);
//! let cache = CacheManager::new(&config)?;
//!
//! cache.cache_instrument_config("dmm-34461", json!({"range": "auto", "nplc": 10}));
//! assert!(cache.get_instrument_config("dmm-34461").is_some());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;

pub use cache::{
    CacheEntry, CacheManager, CacheManagerStats, EvictionPolicy, EvictionStrategy, MemoryCache,
    MemoryCacheStats, OptimizationReport, PersistentCache, PersistentCacheStats,
};
pub use config::{CacheConfig, DurableTierConfig, Environment, MemoryTierConfig, TtlDefaults};
pub use error::{Error, Result};
