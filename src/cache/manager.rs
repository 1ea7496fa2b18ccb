//! Two-tier cache manager
//!
//! Reads go to the bounded memory tier first, then to the durable tier; a
//! durable hit is promoted into memory. Writes always land in memory and are
//! persisted only when asked to and a durable tier is configured.

use super::entry::CacheEntry;
use super::keys::{calibration_key, config_key, measurement_key};
use super::memory::{MemoryCache, MemoryCacheStats};
use super::persistent::{PersistentCache, PersistentCacheStats};
use crate::config::{CacheConfig, TtlDefaults};
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

const HIT_RATE_TARGET_PERCENT: f64 = 70.0;
const EVICTION_TO_HIT_RATIO_LIMIT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Config,
    Measurement,
    Calibration,
}

impl ItemKind {
    fn as_str(self) -> &'static str {
        match self {
            ItemKind::Config => "config",
            ItemKind::Measurement => "measurement",
            ItemKind::Calibration => "calibration",
        }
    }

    /// Measurements stay in memory; configs and calibrations persist.
    fn persists(self) -> bool {
        self != ItemKind::Measurement
    }
}

/// Latest cache key per domain identifier: `instrument_id` for configs and
/// calibrations, `instrument_id:measurement_type` for measurements.
#[derive(Debug, Default)]
struct DomainIndex {
    instrument_configs: HashMap<String, String>,
    measurements: HashMap<String, String>,
    calibrations: HashMap<String, String>,
}

impl DomainIndex {
    fn map_for(&mut self, kind: ItemKind) -> &mut HashMap<String, String> {
        match kind {
            ItemKind::Config => &mut self.instrument_configs,
            ItemKind::Measurement => &mut self.measurements,
            ItemKind::Calibration => &mut self.calibrations,
        }
    }

    fn forget(&mut self, key: &str) {
        self.instrument_configs.retain(|_, cached| cached != key);
        self.measurements.retain(|_, cached| cached != key);
        self.calibrations.retain(|_, cached| cached != key);
    }

    fn clear(&mut self) {
        self.instrument_configs.clear();
        self.measurements.clear();
        self.calibrations.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CachedItemCounts {
    pub instrument_configs: usize,
    pub measurements: usize,
    pub calibrations: usize,
}

/// Combined statistics across both tiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheManagerStats {
    pub memory: MemoryCacheStats,
    pub persistent: Option<PersistentCacheStats>,
    pub cached_items: CachedItemCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub expired_cleaned: BTreeMap<&'static str, usize>,
    pub recommendations: Vec<String>,
}

/// Orchestrates the memory and durable tiers. Share it behind an `Arc`.
#[derive(Debug)]
pub struct CacheManager {
    memory: MemoryCache,
    persistent: Option<PersistentCache>,
    ttl: TtlDefaults,
    index: RwLock<DomainIndex>,
}

impl CacheManager {
    /// Build both tiers from configuration.
    ///
    /// Invalid values are fatal. A durable directory that cannot be created
    /// leaves the manager running memory-only.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        config.validate()?;

        let memory = MemoryCache::new(config.memory.max_size, config.memory.strategy)?;

        let persistent = match &config.durable {
            Some(durable) => {
                match PersistentCache::new(&durable.directory, durable.max_size_bytes) {
                    Ok(cache) => Some(cache),
                    Err(Error::Io(e)) => {
                        warn!(
                            dir = %durable.directory.display(),
                            error = %e,
                            "durable tier unavailable, running memory-only"
                        );
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };

        info!(
            max_size = config.memory.max_size,
            strategy = %config.memory.strategy,
            durable = persistent.is_some(),
            "cache manager initialized"
        );

        Ok(Self {
            memory,
            persistent,
            ttl: config.ttl.clone(),
            index: RwLock::new(DomainIndex::default()),
        })
    }

    pub fn memory_only(max_size: usize) -> Result<Self> {
        Self::new(&CacheConfig::memory_only(max_size, Default::default()))
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn persistent(&self) -> Option<&PersistentCache> {
        self.persistent.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }

        let entry = self.persistent.as_ref()?.get_entry(key)?;
        debug!(key, "promoting durable hit into memory");
        let value = entry.value.clone();
        self.memory.set_entry(CacheEntry {
            access_count: 0,
            accessed_at: Utc::now(),
            ..entry
        });
        Some(value)
    }

    /// Store a value in memory, and in the durable tier when `persist` is set
    /// and one is configured.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>, persist: bool) {
        self.store(CacheEntry::new(key, value, ttl), persist);
    }

    /// Remove a key from both tiers. True when either tier held it.
    pub fn delete(&self, key: &str) -> bool {
        let in_memory = self.memory.delete(key);
        let on_disk = self
            .persistent
            .as_ref()
            .map_or(false, |cache| cache.delete(key));
        self.index.write().forget(key);
        in_memory || on_disk
    }

    /// Empty both tiers. Returns the number of durable records removed.
    pub fn clear(&self) -> usize {
        self.memory.clear();
        let removed = self.persistent.as_ref().map_or(0, PersistentCache::clear);
        self.index.write().clear();
        info!(durable_removed = removed, "cleared all cache tiers");
        removed
    }

    pub fn cache_instrument_config(&self, instrument_id: &str, config: Value) {
        self.cache_instrument_config_with_ttl(instrument_id, config, self.ttl.config);
    }

    pub fn cache_instrument_config_with_ttl(
        &self,
        instrument_id: &str,
        config: Value,
        ttl: Option<Duration>,
    ) {
        let key = config_key(instrument_id);
        self.store_item(
            ItemKind::Config,
            instrument_id,
            instrument_id.to_string(),
            key,
            config,
            ttl,
        );
    }

    pub fn get_instrument_config(&self, instrument_id: &str) -> Option<Value> {
        self.get(&config_key(instrument_id))
    }

    /// Cache a measurement result. Measurements stay in memory only.
    pub fn cache_measurement(
        &self,
        instrument_id: &str,
        measurement_type: &str,
        parameters: &Map<String, Value>,
        result: Value,
    ) {
        self.cache_measurement_with_ttl(
            instrument_id,
            measurement_type,
            parameters,
            result,
            self.ttl.measurement,
        );
    }

    pub fn cache_measurement_with_ttl(
        &self,
        instrument_id: &str,
        measurement_type: &str,
        parameters: &Map<String, Value>,
        result: Value,
        ttl: Option<Duration>,
    ) {
        let key = measurement_key(instrument_id, measurement_type, parameters);
        let value = json!({
            "result": result,
            "parameters": parameters,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let signature = format!("{}:{}", instrument_id, measurement_type);
        self.store_item(ItemKind::Measurement, instrument_id, signature, key, value, ttl);
    }

    pub fn get_cached_measurement(
        &self,
        instrument_id: &str,
        measurement_type: &str,
        parameters: &Map<String, Value>,
    ) -> Option<Value> {
        let key = measurement_key(instrument_id, measurement_type, parameters);
        self.get(&key)?.get("result").cloned()
    }

    pub fn cache_calibration_data(&self, instrument_id: &str, calibration: Value) {
        self.cache_calibration_data_with_ttl(instrument_id, calibration, self.ttl.calibration);
    }

    pub fn cache_calibration_data_with_ttl(
        &self,
        instrument_id: &str,
        calibration: Value,
        ttl: Option<Duration>,
    ) {
        let key = calibration_key(instrument_id);
        self.store_item(
            ItemKind::Calibration,
            instrument_id,
            instrument_id.to_string(),
            key,
            calibration,
            ttl,
        );
    }

    pub fn get_calibration_data(&self, instrument_id: &str) -> Option<Value> {
        self.get(&calibration_key(instrument_id))
    }

    /// Sweep expired entries from every tier.
    pub fn cleanup_expired(&self) -> BTreeMap<&'static str, usize> {
        let mut cleaned = BTreeMap::new();
        cleaned.insert("memory", self.memory.cleanup_expired());
        if let Some(persistent) = &self.persistent {
            cleaned.insert("persistent", persistent.cleanup_expired());
        }
        cleaned
    }

    pub fn stats(&self) -> CacheManagerStats {
        let cached_items = {
            let index = self.index.read();
            CachedItemCounts {
                instrument_configs: index.instrument_configs.len(),
                measurements: index.measurements.len(),
                calibrations: index.calibrations.len(),
            }
        };

        CacheManagerStats {
            memory: self.memory.stats(),
            persistent: self.persistent.as_ref().map(PersistentCache::stats),
            cached_items,
        }
    }

    /// Clean up expired entries and suggest tuning based on memory tier
    /// counters.
    pub fn optimize(&self) -> OptimizationReport {
        let expired_cleaned = self.cleanup_expired();
        let stats = self.memory.stats();
        let mut recommendations = Vec::new();

        let requests = stats.hit_count + stats.miss_count;
        if requests > 0 && stats.hit_rate_percent < HIT_RATE_TARGET_PERCENT {
            recommendations.push(format!(
                "Memory hit rate is {:.1}%; consider increasing memory.max_size (currently {})",
                stats.hit_rate_percent, stats.max_size
            ));
        }

        if stats.eviction_count as f64 > stats.hit_count as f64 * EVICTION_TO_HIT_RATIO_LIMIT {
            recommendations.push(format!(
                "{} evictions against {} hits; capacity or TTLs do not match the working set",
                stats.eviction_count, stats.hit_count
            ));
        }

        info!(
            cleaned = ?expired_cleaned,
            recommendations = recommendations.len(),
            "cache optimization finished"
        );

        OptimizationReport {
            expired_cleaned,
            recommendations,
        }
    }

    fn store(&self, entry: CacheEntry, persist: bool) {
        if persist {
            if let Some(persistent) = &self.persistent {
                persistent.set_entry(&entry);
            }
        }
        self.memory.set_entry(entry);
    }

    fn store_item(
        &self,
        kind: ItemKind,
        instrument_id: &str,
        signature: String,
        key: String,
        value: Value,
        ttl: Option<Duration>,
    ) {
        let entry = CacheEntry::new(key.as_str(), value, ttl)
            .with_metadata("kind", kind.as_str())
            .with_metadata("instrument_id", instrument_id);
        self.store(entry, kind.persists());
        self.index.write().map_for(kind).insert(signature, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionStrategy;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn create_test_manager(max_size: usize) -> (CacheManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::memory_only(max_size, EvictionStrategy::Lru)
            .with_durable(temp_dir.path().join("store"), 1024 * 1024);
        (CacheManager::new(&config).unwrap(), temp_dir)
    }

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        assert!(matches!(
            CacheManager::memory_only(0),
            Err(Error::InvalidConfiguration(_))
        ));

        let temp_dir = TempDir::new().unwrap();
        let config =
            CacheConfig::memory_only(4, EvictionStrategy::Lru).with_durable(temp_dir.path(), 0);
        assert!(CacheManager::new(&config).is_err());
    }

    #[test]
    fn test_unusable_directory_degrades_to_memory_only() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let config = CacheConfig::memory_only(4, EvictionStrategy::Lru)
            .with_durable(blocker.join("nested"), 1024);
        let manager = CacheManager::new(&config).unwrap();
        assert!(manager.persistent().is_none());

        manager.set("k", json!(1), None, true);
        assert_eq!(manager.get("k"), Some(json!(1)));
    }

    #[test]
    fn test_promotion_from_durable_tier() {
        let (manager, _dir) = create_test_manager(8);
        manager.set("k", json!({"v": 1}), None, true);

        manager.memory().clear();
        assert!(!manager.memory().contains("k"));

        assert_eq!(manager.get("k"), Some(json!({"v": 1})));
        assert!(manager.memory().contains("k"));
    }

    #[test]
    fn test_promotion_keeps_creation_time_and_ttl() {
        let (manager, _dir) = create_test_manager(8);
        manager.set("k", json!("v"), Some(Duration::from_secs(600)), true);
        let original = manager.persistent().unwrap().peek("k").unwrap();

        manager.memory().clear();
        manager.get("k").unwrap();

        let promoted = manager.memory().peek("k").unwrap();
        assert_eq!(promoted.created_at, original.created_at);
        assert_eq!(promoted.ttl, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_unpersisted_write_stays_in_memory() {
        let (manager, _dir) = create_test_manager(8);
        manager.set("k", json!(1), None, false);

        assert!(manager.memory().contains("k"));
        assert!(!manager.persistent().unwrap().contains("k"));
    }

    #[test]
    fn test_memory_only_ignores_persist() {
        let manager = CacheManager::memory_only(4).unwrap();
        manager.set("k", json!(1), None, true);
        assert_eq!(manager.get("k"), Some(json!(1)));
        assert!(manager.stats().persistent.is_none());
    }

    #[test]
    fn test_delete_and_clear_cover_both_tiers() {
        let (manager, _dir) = create_test_manager(8);
        manager.set("a", json!(1), None, true);
        manager.set("b", json!(2), None, true);

        assert!(manager.delete("a"));
        assert!(!manager.delete("a"));
        assert_eq!(manager.get("a"), None);

        assert_eq!(manager.clear(), 1);
        assert_eq!(manager.get("b"), None);
        assert_eq!(manager.stats().persistent.unwrap().file_count, 0);
    }

    #[test]
    fn test_instrument_config_helpers() {
        let (manager, _dir) = create_test_manager(8);
        manager.cache_instrument_config("dmm-1", json!({"range": "auto"}));

        assert_eq!(manager.get_instrument_config("dmm-1"), Some(json!({"range": "auto"})));

        let stored = manager.persistent().unwrap().peek("config:dmm-1").unwrap();
        assert_eq!(stored.ttl, Some(Duration::from_secs(3600)));
        assert_eq!(stored.metadata["kind"], json!("config"));
        assert_eq!(stored.metadata["instrument_id"], json!("dmm-1"));
    }

    #[test]
    fn test_measurement_helpers() {
        let (manager, _dir) = create_test_manager(8);
        let parameters = params(json!({"range": 10, "nplc": 1}));
        manager.cache_measurement("dmm-1", "dc_voltage", &parameters, json!(1.2345));

        let reordered = params(json!({"nplc": 1, "range": 10}));
        assert_eq!(
            manager.get_cached_measurement("dmm-1", "dc_voltage", &reordered),
            Some(json!(1.2345))
        );
        assert_eq!(
            manager.get_cached_measurement("dmm-1", "dc_voltage", &params(json!({"range": 100}))),
            None
        );

        let key = measurement_key("dmm-1", "dc_voltage", &parameters);
        let stored = manager.memory().peek(&key).unwrap();
        assert_eq!(stored.value["parameters"], json!({"range": 10, "nplc": 1}));
        assert!(stored.value["timestamp"].is_string());
        assert_eq!(stored.ttl, Some(Duration::from_secs(300)));
        assert!(!manager.persistent().unwrap().contains(&key));
    }

    #[test]
    fn test_calibration_helpers_with_ttl_override() {
        let (manager, _dir) = create_test_manager(8);
        manager.cache_calibration_data_with_ttl("scope-1", json!({"offset": 0.01}), None);

        assert_eq!(manager.get_calibration_data("scope-1"), Some(json!({"offset": 0.01})));
        let stored = manager.persistent().unwrap().peek("calibration:scope-1").unwrap();
        assert_eq!(stored.ttl, None);
    }

    #[test]
    fn test_stats_count_domain_items() {
        let (manager, _dir) = create_test_manager(8);
        manager.cache_instrument_config("a", json!({}));
        manager.cache_instrument_config("a", json!({"x": 1}));
        manager.cache_calibration_data("a", json!({}));
        manager.cache_measurement("a", "v", &Map::new(), json!(1));
        manager.cache_measurement("a", "i", &Map::new(), json!(2));

        let stats = manager.stats();
        assert_eq!(
            stats.cached_items,
            CachedItemCounts {
                instrument_configs: 1,
                measurements: 2,
                calibrations: 1,
            }
        );

        manager.delete(&config_key("a"));
        assert_eq!(manager.stats().cached_items.instrument_configs, 0);
    }

    #[test]
    fn test_measurement_count_tracks_signatures_not_parameter_sets() {
        let manager = CacheManager::memory_only(4).unwrap();

        for range in 0..1000 {
            let parameters = params(json!({ "range": range }));
            manager.cache_measurement("dmm-1", "dc_voltage", &parameters, json!(range));
        }
        manager.cache_measurement("dmm-1", "ac_voltage", &Map::new(), json!(0.5));
        manager.cache_measurement("dmm-2", "dc_voltage", &Map::new(), json!(0.7));

        assert_eq!(manager.memory().len(), 4);
        assert_eq!(manager.stats().cached_items.measurements, 3);

        let latest = measurement_key("dmm-1", "dc_voltage", &params(json!({"range": 999})));
        manager.delete(&latest);
        assert_eq!(manager.stats().cached_items.measurements, 2);

        manager.clear();
        assert_eq!(manager.stats().cached_items.measurements, 0);
    }

    #[test]
    fn test_cleanup_expired_reports_per_tier() {
        let (manager, _dir) = create_test_manager(8);
        let memory_only = CacheManager::memory_only(2).unwrap();

        let tiers: Vec<_> = manager.cleanup_expired().into_keys().collect();
        assert_eq!(tiers, vec!["memory", "persistent"]);

        let tiers: Vec<_> = memory_only.cleanup_expired().into_keys().collect();
        assert_eq!(tiers, vec!["memory"]);
    }

    #[test]
    fn test_optimize_recommendations() {
        let manager = CacheManager::memory_only(2).unwrap();

        let report = manager.optimize();
        assert!(report.recommendations.is_empty());

        for key in ["a", "b", "c", "d"] {
            manager.set(key, json!(key), None, false);
        }
        for _ in 0..3 {
            manager.get("missing");
        }

        let report = manager.optimize();
        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(report.expired_cleaned["memory"], 0);
    }

    #[test]
    fn test_concurrent_access() {
        let (manager, _dir) = create_test_manager(16);
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    for i in 0..50 {
                        let key = format!("t{}-{}", t, i % 10);
                        manager.set(&key, json!(i), None, i % 2 == 0);
                        manager.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(manager.memory().len() <= 16);
    }
}
