//! Durable directory-backed tier
//!
//! One file per entry, named by the SHA-256 of its key, holding a versioned
//! JSON record (see [`super::record`]). The tier is an optimization only:
//! every filesystem or decoding failure is logged and turned into a miss or a
//! no-op. Corrupted files are deleted on sight so they cannot fail twice.

use super::entry::CacheEntry;
use super::record;
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

pub const CACHE_FILE_EXTENSION: &str = "cache";

/// Cleanup brings usage down to this fraction of the budget.
const CLEANUP_TARGET_NUMERATOR: u64 = 4;
const CLEANUP_TARGET_DENOMINATOR: u64 = 5;

/// Snapshot of durable tier counters and disk usage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistentCacheStats {
    pub cache_dir: PathBuf,
    pub max_size_bytes: u64,
    pub current_size_bytes: u64,
    pub file_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate_percent: f64,
    /// Files removed by oversize cleanup since construction
    pub cleanup_count: u64,
}

#[derive(Debug, Default)]
struct PersistentState {
    hit_count: u64,
    miss_count: u64,
    cleanup_count: u64,
}

#[derive(Debug)]
struct CacheFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

#[derive(Debug)]
pub struct PersistentCache {
    cache_dir: PathBuf,
    max_size_bytes: u64,
    /// Serializes file operations and guards the counters.
    state: Mutex<PersistentState>,
}

impl PersistentCache {
    pub fn new(cache_dir: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self> {
        if max_size_bytes == 0 {
            return Err(Error::invalid_config("durable.max_size_bytes", "> 0"));
        }

        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        debug!(dir = %cache_dir.display(), max_size_bytes, "opened persistent cache");

        Ok(Self {
            cache_dir,
            max_size_bytes,
            state: Mutex::new(PersistentState::default()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// File backing `key`: `<hex(sha256(key))>.cache` under the cache dir.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir
            .join(format!("{}.{}", hex::encode(digest), CACHE_FILE_EXTENSION))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Read an entry, record the access and write the updated access
    /// metadata back. The write-back is best-effort.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        let path = self.entry_path(key);
        let mut state = self.state.lock();

        let mut entry = match self.load(&path, key) {
            Some(entry) => entry,
            None => {
                state.miss_count += 1;
                return None;
            }
        };

        if entry.is_expired_at(now) {
            debug!(key, "expired persistent entry removed on read");
            remove_quietly(&path);
            state.miss_count += 1;
            return None;
        }

        entry.touch_at(now);
        if let Err(e) = self.write_file(&path, &entry) {
            warn!(key, error = %e, "failed to write back access metadata");
        }

        state.hit_count += 1;
        Some(entry)
    }

    /// Inspect an entry without recording a read. Corrupted or expired files
    /// are reported as absent but left in place.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let _guard = self.state.lock();
        let bytes = fs::read(&path).ok()?;
        record::decode(&bytes)
            .ok()
            .filter(|entry| entry.key == key && !entry.is_expired())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        self.set_entry(&CacheEntry::new(key, value, ttl));
    }

    /// Persist an entry, then enforce the size budget.
    pub fn set_entry(&self, entry: &CacheEntry) {
        let path = self.entry_path(&entry.key);
        let mut state = self.state.lock();

        match self.write_file(&path, entry) {
            Ok(()) => {
                debug!(key = %entry.key, "persisted cache entry");
                let removed = self.cleanup_if_oversized();
                state.cleanup_count += removed as u64;
            }
            Err(e) => log_downgraded(&entry.key, &e, "persist cache entry"),
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let path = self.entry_path(key);
        let _guard = self.state.lock();

        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(key, error = %e, "failed to delete persistent entry");
                false
            }
        }
    }

    /// Remove every cache file and return how many were deleted.
    pub fn clear(&self) -> usize {
        let _guard = self.state.lock();
        let count = self
            .cache_files()
            .into_iter()
            .filter(|file| remove_quietly(&file.path))
            .count();
        info!(count, "cleared persistent cache entries");
        count
    }

    /// Remove expired and corrupted files; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let _guard = self.state.lock();
        let mut removed = 0;

        for file in self.cache_files() {
            let stale = match fs::read(&file.path) {
                Ok(bytes) => match record::decode(&bytes) {
                    Ok(entry) => entry.is_expired_at(now),
                    Err(e) => {
                        debug!(path = %file.path.display(), error = %e, "corrupt cache file");
                        true
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => false,
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "unreadable cache file");
                    false
                }
            };

            if stale && remove_quietly(&file.path) {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(count = removed, "cleaned up expired/corrupted persistent entries");
        }
        removed
    }

    /// Total bytes used by cache files.
    pub fn current_size_bytes(&self) -> u64 {
        let _guard = self.state.lock();
        self.cache_files().iter().map(|file| file.size).sum()
    }

    pub fn stats(&self) -> PersistentCacheStats {
        let state = self.state.lock();
        let files = self.cache_files();
        let total = state.hit_count + state.miss_count;
        let hit_rate_percent = if total == 0 {
            0.0
        } else {
            state.hit_count as f64 / total as f64 * 100.0
        };

        PersistentCacheStats {
            cache_dir: self.cache_dir.clone(),
            max_size_bytes: self.max_size_bytes,
            current_size_bytes: files.iter().map(|file| file.size).sum(),
            file_count: files.len(),
            hit_count: state.hit_count,
            miss_count: state.miss_count,
            hit_rate_percent,
            cleanup_count: state.cleanup_count,
        }
    }

    /// Load and validate the record at `path`. Corrupted files are deleted.
    fn load(&self, path: &Path, key: &str) -> Option<CacheEntry> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(key, error = %e, "failed to read persistent entry");
                return None;
            }
        };

        match record::decode(&bytes) {
            Ok(entry) if entry.key == key => Some(entry),
            Ok(entry) => {
                // Distinct keys sharing a digest; keep the other key's file.
                warn!(key, stored = %entry.key, "cache file belongs to a different key");
                None
            }
            Err(e) => {
                log_downgraded(key, &e, "load cache entry, removing file");
                remove_quietly(path);
                None
            }
        }
    }

    /// Write through a temp file in the cache dir and rename into place, so
    /// readers never see a partial record.
    fn write_file(&self, path: &Path, entry: &CacheEntry) -> Result<()> {
        let bytes = record::encode(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.cache_dir)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Once usage exceeds the budget, delete least-recently-modified files
    /// until usage is at or below 80% of it. Caller holds the state lock.
    fn cleanup_if_oversized(&self) -> usize {
        let mut files = self.cache_files();
        let mut total: u64 = files.iter().map(|file| file.size).sum();
        if total <= self.max_size_bytes {
            return 0;
        }

        let target = self.max_size_bytes * CLEANUP_TARGET_NUMERATOR / CLEANUP_TARGET_DENOMINATOR;
        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let mut removed = 0;
        for file in files {
            if total <= target {
                break;
            }
            if remove_quietly(&file.path) {
                total = total.saturating_sub(file.size);
                removed += 1;
            }
        }

        if removed > 0 {
            info!(
                count = removed,
                remaining_bytes = total,
                "cleaned up cache files to maintain size limit"
            );
        }
        removed
    }

    fn cache_files(&self) -> Vec<CacheFile> {
        let dir = match fs::read_dir(&self.cache_dir) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(
                    dir = %self.cache_dir.display(),
                    error = %e,
                    "failed to list cache directory"
                );
                return Vec::new();
            }
        };

        dir.filter_map(|item| item.ok())
            .map(|item| item.path())
            .filter(|path| {
                path.extension()
                    .map_or(false, |ext| ext == CACHE_FILE_EXTENSION)
            })
            .filter_map(|path| {
                let meta = fs::metadata(&path).ok()?;
                if !meta.is_file() {
                    return None;
                }
                Some(CacheFile {
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    path,
                })
            })
            .collect()
    }
}

/// Delete a file, logging anything other than "already gone". Returns true
/// when this call removed it.
/// Recoverable failures are warnings; anything else is an error.
fn log_downgraded(key: &str, error: &Error, action: &str) {
    if error.category().is_soft() {
        warn!(key, error = %error, "failed to {}", action);
    } else {
        error!(key, error = %error, "failed to {}", action);
    }
}

fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove cache file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_cache(max_size_bytes: u64) -> (PersistentCache, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache = PersistentCache::new(temp_dir.path(), max_size_bytes).expect("cache");
        (cache, temp_dir)
    }

    #[test]
    fn test_zero_budget_rejected() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            PersistentCache::new(temp_dir.path(), 0),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested").join("cache");
        let cache = PersistentCache::new(&nested, 1024).unwrap();
        cache.set("k", json!(1), None);
        assert!(nested.is_dir());
        assert!(cache.entry_path("k").exists());
    }

    #[test]
    fn test_file_name_is_sha256_of_key() {
        let (cache, temp_dir) = create_test_cache(1 << 20);
        let path = cache.entry_path("abc");
        assert_eq!(
            path,
            temp_dir.path().join(
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad.cache"
            )
        );
    }

    #[test]
    fn test_round_trip_and_access_write_back() {
        let (cache, _temp_dir) = create_test_cache(1 << 20);
        cache.set("calibration:scope-2", json!({"offset": -0.003}), None);

        assert_eq!(cache.get("calibration:scope-2"), Some(json!({"offset": -0.003})));
        assert_eq!(cache.get("calibration:scope-2"), Some(json!({"offset": -0.003})));

        let stored = cache.peek("calibration:scope-2").unwrap();
        assert_eq!(stored.access_count, 2);

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.file_count, 1);
    }

    #[test]
    fn test_missing_key_is_miss() {
        let (cache, _temp_dir) = create_test_cache(1 << 20);
        assert_eq!(cache.get("nope"), None);
        assert_eq!(cache.stats().miss_count, 1);
    }

    #[test]
    fn test_corrupted_file_is_miss_and_removed() {
        let (cache, _temp_dir) = create_test_cache(1 << 20);
        let path = cache.entry_path("broken");
        fs::write(&path, b"not a cache record").unwrap();

        assert_eq!(cache.get("broken"), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let (cache, _temp_dir) = create_test_cache(1 << 20);
        let entry = CacheEntry::new_at(
            "old",
            json!(1),
            Some(Duration::from_secs(1)),
            Utc::now() - chrono::Duration::seconds(10),
        );
        cache.set_entry(&entry);
        let path = cache.entry_path("old");
        assert!(path.exists());

        assert_eq!(cache.get("old"), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_foreign_key_in_file_is_left_alone() {
        let (cache, _temp_dir) = create_test_cache(1 << 20);
        let foreign = CacheEntry::new("someone-else", json!(1), None);
        let path = cache.entry_path("mine");
        fs::write(&path, record::encode(&foreign).unwrap()).unwrap();

        assert_eq!(cache.get("mine"), None);
        assert!(path.exists());
    }

    #[test]
    fn test_delete_and_clear() {
        let (cache, temp_dir) = create_test_cache(1 << 20);
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), None);
        fs::write(temp_dir.path().join("notes.txt"), b"unrelated").unwrap();

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.stats().file_count, 0);
        assert!(temp_dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_cleanup_expired_removes_expired_and_corrupt() {
        let (cache, _temp_dir) = create_test_cache(1 << 20);
        let past = Utc::now() - chrono::Duration::seconds(120);
        let stale = CacheEntry::new_at("stale", json!(1), Some(Duration::from_secs(60)), past);
        cache.set_entry(&stale);
        cache.set("fresh", json!(2), Some(Duration::from_secs(3600)));
        cache.set("forever", json!(3), None);
        fs::write(cache.entry_path("junk"), b"\x00\x01\x02").unwrap();

        assert_eq!(cache.cleanup_expired(), 2);
        assert!(cache.contains("fresh"));
        assert!(cache.contains("forever"));
        assert_eq!(cache.stats().file_count, 2);
    }

    #[test]
    fn test_oversize_cleanup_applies_hysteresis() {
        let payload = "x".repeat(200);
        let (cache, _temp_dir) = create_test_cache(4_000);

        let mut cleaned = false;
        for i in 0..60 {
            cache.set(&format!("measurement:{}", i), json!(payload), None);
            let stats = cache.stats();
            assert!(
                stats.current_size_bytes <= 4_000,
                "usage {} above budget after write {}",
                stats.current_size_bytes,
                i
            );
            if stats.cleanup_count > 0 && !cleaned {
                cleaned = true;
                assert!(stats.current_size_bytes <= 3_200);
            }
        }

        assert!(cleaned, "cleanup never triggered");
    }

    fn backdate(path: &Path, secs: u64) {
        if !path.exists() {
            return;
        }
        let when = SystemTime::now() - Duration::from_secs(secs);
        fs::File::options()
            .write(true)
            .open(path)
            .and_then(|f| f.set_modified(when))
            .unwrap();
    }

    #[test]
    fn test_oversize_cleanup_removes_oldest_first() {
        let (cache, _temp_dir) = create_test_cache(1_000);

        cache.set("old", json!("a".repeat(300)), None);
        backdate(&cache.entry_path("old"), 3 * 3600);
        cache.set("newer", json!("b".repeat(300)), None);
        backdate(&cache.entry_path("newer"), 2 * 3600);
        cache.set("newest", json!("c".repeat(300)), None);
        backdate(&cache.entry_path("newest"), 3600);
        cache.set("overflow", json!("d".repeat(300)), None);

        assert!(!cache.entry_path("old").exists());
        assert!(cache.entry_path("overflow").exists());
        assert!(cache.current_size_bytes() <= 1_000);
    }

    #[test]
    fn test_directory_removed_after_open_degrades_to_misses() {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join("store");
        let cache = PersistentCache::new(&cache_dir, 1 << 20).unwrap();
        cache.set("a", json!(1), None);

        fs::remove_dir_all(&cache_dir).unwrap();

        cache.set("b", json!(2), None);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
        assert!(!cache.delete("a"));
        assert_eq!(cache.cleanup_expired(), 0);
        assert_eq!(cache.clear(), 0);

        let stats = cache.stats();
        assert_eq!(stats.file_count, 0);
        assert_eq!(stats.miss_count, 2);
    }

    #[test]
    fn test_unreadable_entry_is_a_miss() {
        let (cache, _temp_dir) = create_test_cache(1 << 20);
        fs::create_dir(cache.entry_path("k")).unwrap();

        assert_eq!(cache.get("k"), None);
        assert!(!cache.delete("k"));
        assert!(cache.entry_path("k").is_dir());
    }
}
