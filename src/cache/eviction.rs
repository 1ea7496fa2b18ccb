//! Eviction strategies for the bounded tier
//!
//! A policy only picks a victim; the tier owns removal and the counters. New
//! policies plug in through [`EvictionPolicy`] without touching the tier.

use super::arena::{EntryArena, SlotId, SlotView};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Picks the entry to drop when a full tier receives a new key.
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Return the slot to evict, or `None` if the arena is empty.
    fn select_victim(&self, arena: &EntryArena, now: DateTime<Utc>) -> Option<SlotId>;

    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Built-in eviction strategies, selectable by name in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least Recently Used
    #[default]
    Lru,
    /// Least Frequently Used
    Lfu,
    /// Expired entries first, then oldest
    Ttl,
    /// First In, First Out
    Fifo,
}

impl EvictionStrategy {
    pub const ALL: [EvictionStrategy; 4] = [Self::Lru, Self::Lfu, Self::Ttl, Self::Fifo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Ttl => "ttl",
            Self::Fifo => "fifo",
        }
    }

    pub fn policy(&self) -> Box<dyn EvictionPolicy> {
        match self {
            Self::Lru => Box::new(LruPolicy),
            Self::Lfu => Box::new(LfuPolicy),
            Self::Ttl => Box::new(TtlPolicy),
            Self::Fifo => Box::new(FifoPolicy),
        }
    }
}

impl fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "ttl" => Ok(Self::Ttl),
            "fifo" => Ok(Self::Fifo),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown eviction strategy '{}' (expected one of: lru, lfu, ttl, fifo)",
                other
            ))),
        }
    }
}

/// Evicts the least recently read or written entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn select_victim(&self, arena: &EntryArena, _now: DateTime<Utc>) -> Option<SlotId> {
        arena.least_recent()
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}

/// Evicts the entry with the fewest reads. Ties go to the oldest
/// `created_at`, then to the earliest insertion.
#[derive(Debug, Clone, Copy, Default)]
pub struct LfuPolicy;

impl EvictionPolicy for LfuPolicy {
    fn select_victim(&self, arena: &EntryArena, _now: DateTime<Utc>) -> Option<SlotId> {
        arena
            .iter()
            .min_by_key(|view| (view.entry.access_count, view.entry.created_at, view.sequence))
            .map(|view| view.id)
    }

    fn name(&self) -> &'static str {
        "lfu"
    }
}

/// Evicts an already-expired entry when one exists, otherwise the oldest.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtlPolicy;

impl EvictionPolicy for TtlPolicy {
    fn select_victim(&self, arena: &EntryArena, now: DateTime<Utc>) -> Option<SlotId> {
        arena
            .iter()
            .filter(|view| view.entry.is_expired_at(now))
            .min_by_key(creation_order)
            .or_else(|| arena.iter().min_by_key(creation_order))
            .map(|view| view.id)
    }

    fn name(&self) -> &'static str {
        "ttl"
    }
}

/// Evicts the oldest entry by creation time; reads are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoPolicy;

impl EvictionPolicy for FifoPolicy {
    fn select_victim(&self, arena: &EntryArena, _now: DateTime<Utc>) -> Option<SlotId> {
        arena.iter().min_by_key(creation_order).map(|view| view.id)
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}

fn creation_order(view: &SlotView<'_>) -> (DateTime<Utc>, u64) {
    (view.entry.created_at, view.sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheEntry;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::time::Duration;

    fn victim_key(policy: &dyn EvictionPolicy, arena: &EntryArena, now: DateTime<Utc>) -> String {
        let id = policy.select_victim(arena, now).expect("victim");
        arena.entry(id).expect("entry").key.clone()
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("LRU".parse::<EvictionStrategy>().unwrap(), EvictionStrategy::Lru);
        assert_eq!(" fifo ".parse::<EvictionStrategy>().unwrap(), EvictionStrategy::Fifo);
        assert!(matches!(
            "random".parse::<EvictionStrategy>(),
            Err(Error::InvalidConfiguration(_))
        ));

        for strategy in EvictionStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<EvictionStrategy>().unwrap(), strategy);
            assert_eq!(strategy.policy().name(), strategy.as_str());
        }
    }

    #[test]
    fn test_empty_arena_has_no_victim() {
        let arena = EntryArena::default();
        for strategy in EvictionStrategy::ALL {
            assert!(strategy.policy().select_victim(&arena, Utc::now()).is_none());
        }
    }

    #[test]
    fn test_lfu_breaks_ties_by_creation_then_insertion() {
        let t0 = Utc::now();
        let mut arena = EntryArena::default();
        arena.insert(CacheEntry::new_at("late", json!(1), None, t0 + ChronoDuration::seconds(5)));
        arena.insert(CacheEntry::new_at("early", json!(2), None, t0));
        arena.insert(CacheEntry::new_at("early-twin", json!(3), None, t0));

        assert_eq!(victim_key(&LfuPolicy, &arena, t0), "early");

        let id = arena.slot_id("early").unwrap();
        arena.entry_mut(id).unwrap().touch_at(t0);
        assert_eq!(victim_key(&LfuPolicy, &arena, t0), "early-twin");
    }

    #[test]
    fn test_ttl_prefers_expired_entries() {
        let t0 = Utc::now();
        let mut arena = EntryArena::default();
        arena.insert(CacheEntry::new_at("oldest", json!(1), None, t0));
        arena.insert(CacheEntry::new_at(
            "short-lived",
            json!(2),
            Some(Duration::from_secs(1)),
            t0 + ChronoDuration::seconds(10),
        ));

        let now = t0 + ChronoDuration::seconds(20);
        assert_eq!(victim_key(&TtlPolicy, &arena, now), "short-lived");

        let before_expiry = t0 + ChronoDuration::seconds(10);
        assert_eq!(victim_key(&TtlPolicy, &arena, before_expiry), "oldest");
    }

    #[test]
    fn test_fifo_ignores_access() {
        let t0 = Utc::now();
        let mut arena = EntryArena::default();
        let first = arena.insert(CacheEntry::new_at("first", json!(1), None, t0));
        arena.insert(CacheEntry::new_at("second", json!(2), None, t0 + ChronoDuration::seconds(1)));
        arena.entry_mut(first).unwrap().touch_at(t0);
        arena.mark_recent(first);

        assert_eq!(victim_key(&FifoPolicy, &arena, t0), "first");
        assert_eq!(victim_key(&LruPolicy, &arena, t0), "second");
    }
}
