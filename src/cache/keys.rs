//! Deterministic cache keys for instrument data
//!
//! Identical domain parameters always produce the same key, regardless of the
//! order the caller assembled them in.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const CONFIG_PREFIX: &str = "config";
pub const MEASUREMENT_PREFIX: &str = "measurement";
pub const CALIBRATION_PREFIX: &str = "calibration";

/// Hex digits of the parameter digest kept in measurement keys.
const PARAMETER_HASH_LEN: usize = 16;

pub fn config_key(instrument_id: &str) -> String {
    format!("{}:{}", CONFIG_PREFIX, instrument_id)
}

pub fn calibration_key(instrument_id: &str) -> String {
    format!("{}:{}", CALIBRATION_PREFIX, instrument_id)
}

pub fn measurement_key(
    instrument_id: &str,
    measurement_type: &str,
    parameters: &Map<String, Value>,
) -> String {
    format!(
        "{}:{}:{}:{}",
        MEASUREMENT_PREFIX,
        instrument_id,
        measurement_type,
        parameter_hash(parameters)
    )
}

/// Truncated SHA-256 of the parameters as canonical JSON with sorted keys.
pub fn parameter_hash(parameters: &Map<String, Value>) -> String {
    let digest = Sha256::digest(canonical_json(parameters).as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(PARAMETER_HASH_LEN);
    hash
}

fn canonical_json(parameters: &Map<String, Value>) -> String {
    let sorted: BTreeMap<&str, &Value> = parameters
        .iter()
        .map(|(key, value)| (key.as_str(), value))
        .collect();

    let fields: Vec<String> = sorted
        .into_iter()
        .map(|(key, value)| format!("{}:{}", Value::from(key), canonical_value(value)))
        .collect();
    format!("{{{}}}", fields.join(","))
}

fn canonical_value(value: &Value) -> String {
    match value {
        Value::Object(map) => canonical_json(map),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_value).collect();
            format!("[{}]", items.join(","))
        }
        scalar => scalar.to_string(),
    }
}
