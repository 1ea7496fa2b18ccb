//! Bounded in-memory tier
//!
//! A capacity-limited map of entries guarded by a single mutex. Lookups,
//! writes, deletes and the eviction a write may trigger each happen under one
//! lock acquisition, so callers never observe the tier over capacity.

use super::arena::EntryArena;
use super::entry::CacheEntry;
use super::eviction::{EvictionPolicy, EvictionStrategy};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Snapshot of bounded tier counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryCacheStats {
    pub strategy: String,
    pub max_size: usize,
    pub current_size: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate_percent: f64,
    pub eviction_count: u64,
    /// Entries past their TTL that no read or sweep has removed yet
    pub expired_entries: usize,
}

#[derive(Debug)]
struct MemoryState {
    arena: EntryArena,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
}

pub struct MemoryCache {
    max_size: usize,
    policy: Box<dyn EvictionPolicy>,
    state: Mutex<MemoryState>,
}

impl MemoryCache {
    pub fn new(max_size: usize, strategy: EvictionStrategy) -> Result<Self> {
        Self::with_policy(max_size, strategy.policy())
    }

    /// Build a tier around a caller-supplied eviction policy.
    pub fn with_policy(max_size: usize, policy: Box<dyn EvictionPolicy>) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::invalid_config("memory.max_size", "> 0"));
        }

        Ok(Self {
            max_size,
            policy,
            state: Mutex::new(MemoryState {
                arena: EntryArena::with_capacity(max_size),
                hit_count: 0,
                miss_count: 0,
                eviction_count: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn strategy(&self) -> &'static str {
        self.policy.name()
    }

    pub fn len(&self) -> usize {
        self.state.lock().arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().arena.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Look up a key, recording the read. Returns a copy of the entry with
    /// its access tracking already updated.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        let mut state = self.state.lock();

        let id = match state.arena.slot_id(key) {
            Some(id) => id,
            None => {
                state.miss_count += 1;
                return None;
            }
        };

        let expired = state
            .arena
            .entry(id)
            .map_or(true, |entry| entry.is_expired_at(now));
        if expired {
            state.arena.remove(id);
            state.miss_count += 1;
            debug!(key, "expired entry dropped on read");
            return None;
        }

        let entry = state.arena.entry_mut(id).map(|entry| {
            entry.touch_at(now);
            entry.clone()
        });
        state.arena.mark_recent(id);
        state.hit_count += 1;
        entry
    }

    /// Inspect an entry without counting a read or changing its recency.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let state = self.state.lock();
        let id = state.arena.slot_id(key)?;
        state.arena.entry(id).cloned()
    }

    /// True when the key is stored and not yet expired.
    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).map_or(false, |entry| !entry.is_expired())
    }

    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        self.set_entry(CacheEntry::new(key, value, ttl));
    }

    /// Store a pre-built entry, evicting one victim first when full.
    pub fn set_entry(&self, entry: CacheEntry) {
        let now = Utc::now();
        let mut state = self.state.lock();

        state.arena.remove_key(&entry.key);
        if state.arena.len() >= self.max_size {
            self.evict_one(&mut state, now);
        }

        debug!(key = %entry.key, ttl = ?entry.ttl, "cached entry");
        state.arena.insert(entry);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().arena.remove_key(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let count = state.arena.len();
        state.arena.clear();
        info!(count, "cleared memory cache entries");
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock();

        let expired: Vec<_> = state
            .arena
            .iter()
            .filter(|view| view.entry.is_expired_at(now))
            .map(|view| view.id)
            .collect();

        for id in &expired {
            state.arena.remove(*id);
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "cleaned up expired memory entries");
        }
        expired.len()
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().arena.keys_by_recency()
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let now = Utc::now();
        let state = self.state.lock();
        let total = state.hit_count + state.miss_count;
        let hit_rate_percent = if total == 0 {
            0.0
        } else {
            state.hit_count as f64 / total as f64 * 100.0
        };

        MemoryCacheStats {
            strategy: self.policy.name().to_string(),
            max_size: self.max_size,
            current_size: state.arena.len(),
            hit_count: state.hit_count,
            miss_count: state.miss_count,
            hit_rate_percent,
            eviction_count: state.eviction_count,
            expired_entries: state
                .arena
                .iter()
                .filter(|view| view.entry.is_expired_at(now))
                .count(),
        }
    }

    fn evict_one(&self, state: &mut MemoryState, now: DateTime<Utc>) {
        // A policy that declines on a non-empty arena falls back to LRU so the
        // capacity bound still holds.
        let victim = self
            .policy
            .select_victim(&state.arena, now)
            .or_else(|| state.arena.least_recent());

        if let Some(evicted) = victim.and_then(|id| state.arena.remove(id)) {
            state.eviction_count += 1;
            debug!(key = %evicted.key, policy = self.policy.name(), "evicted entry");
        }
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("max_size", &self.max_size)
            .field("policy", &self.policy.name())
            .field("len", &self.len())
            .finish()
    }
}
