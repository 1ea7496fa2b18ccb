//! On-disk record format for the durable tier
//!
//! Each file holds one JSON document:
//!
//! ```text
//! { "format": "hal-cache/entry", "version": 1, "entry": { key, value, created_at,
//!   accessed_at, access_count, ttl, metadata } }
//! ```
//!
//! Timestamps are RFC 3339 and the TTL is a humantime string (`"5m"`), so any
//! process or language with a JSON parser can read the store. Readers reject
//! unknown formats and versions newer than [`RECORD_VERSION`].

use super::entry::CacheEntry;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RECORD_FORMAT: &str = "hal-cache/entry";
pub const RECORD_VERSION: u32 = 1;

#[derive(Serialize)]
struct RecordOut<'a> {
    format: &'static str,
    version: u32,
    entry: &'a CacheEntry,
}

#[derive(Deserialize)]
struct RecordIn {
    format: String,
    version: u32,
    entry: Value,
}

pub fn encode(entry: &CacheEntry) -> Result<Vec<u8>> {
    let record = RecordOut {
        format: RECORD_FORMAT,
        version: RECORD_VERSION,
        entry,
    };
    Ok(serde_json::to_vec(&record)?)
}

pub fn decode(bytes: &[u8]) -> Result<CacheEntry> {
    let record: RecordIn = serde_json::from_slice(bytes)
        .map_err(|e| Error::CorruptRecord(format!("unreadable envelope: {}", e)))?;

    if record.format != RECORD_FORMAT {
        return Err(Error::CorruptRecord(format!(
            "unexpected record format '{}'",
            record.format
        )));
    }
    if record.version != RECORD_VERSION {
        return Err(Error::UnsupportedVersion(record.version));
    }

    serde_json::from_value(record.entry)
        .map_err(|e| Error::CorruptRecord(format!("invalid entry body: {}", e)))
}
