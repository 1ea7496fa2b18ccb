//! Two-tier cache for instrument configuration, measurements and calibration
//!
//! - [`MemoryCache`]: bounded, policy-driven eviction
//! - [`PersistentCache`]: one file per key, byte budget with hysteresis
//! - [`CacheManager`]: reads through both tiers and promotes durable hits

mod arena;
pub mod entry;
pub mod eviction;
pub mod keys;
pub mod manager;
pub mod memory;
pub mod persistent;
pub mod record;

pub use arena::{EntryArena, SlotId, SlotView};
pub use entry::CacheEntry;
pub use eviction::{EvictionPolicy, EvictionStrategy, FifoPolicy, LfuPolicy, LruPolicy, TtlPolicy};
pub use manager::{CacheManager, CacheManagerStats, CachedItemCounts, OptimizationReport};
pub use memory::{MemoryCache, MemoryCacheStats};
pub use persistent::{PersistentCache, PersistentCacheStats};
