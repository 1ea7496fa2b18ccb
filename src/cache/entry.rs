//! Cache entry with access tracking and optional time-to-live

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// A cached value plus the bookkeeping both tiers need to expire and evict it.
///
/// Everything except `accessed_at` and `access_count` is fixed at creation.
/// Those two fields change only through [`CacheEntry::touch`], which the owning
/// tier calls once per successful read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default, with = "humantime_serde")]
    pub ttl: Option<Duration>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Value, ttl: Option<Duration>) -> Self {
        Self::new_at(key, value, ttl, Utc::now())
    }

    /// Create an entry as if it had been written at `now`.
    pub fn new_at(
        key: impl Into<String>,
        value: Value,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            ttl,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Strict comparison: an entry whose age equals its TTL is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => self.age_at(now) > ttl,
        }
    }

    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    /// Age relative to `now`; a clock that moved backwards yields zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn touch(&mut self) {
        self.touch_at(Utc::now());
    }

    pub fn touch_at(&mut self, now: DateTime<Utc>) {
        self.accessed_at = now;
        self.access_count += 1;
    }
}
