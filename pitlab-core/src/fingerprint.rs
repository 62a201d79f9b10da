//! Content fingerprints — deterministic identification of cached computations.
//!
//! - `DatasetHash`: structure + content of an `AssetPanel` (dates, asset ids, values).
//! - `ConfigHash`: canonical JSON of a computation config.
//! - `CacheKey`: dataset + config + requested date range, folded into one fingerprint.
//!
//! All hashes are BLAKE3 hex digests, stable across builds and platforms.

use crate::data::panel::AssetPanel;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash over the shape, axes and values of a panel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl DatasetHash {
    /// Hash a panel. Every NaN hashes to the same canonical bit pattern, so two
    /// panels with missing cells in the same places always agree.
    pub fn of_panel(panel: &AssetPanel) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"pitlab-panel-v1");
        hasher.update(&(panel.n_rows() as u64).to_le_bytes());
        hasher.update(&(panel.n_assets() as u64).to_le_bytes());
        for date in panel.dates() {
            hasher.update(&date.num_days_from_ce().to_le_bytes());
        }
        for asset in panel.assets() {
            hasher.update(&(asset.len() as u64).to_le_bytes());
            hasher.update(asset.as_bytes());
        }
        for i in 0..panel.n_rows() {
            for v in panel.row(i) {
                let bits = if v.is_nan() { f64::NAN.to_bits() } else { v.to_bits() };
                hasher.update(&bits.to_le_bytes());
            }
        }
        Self(hasher.finalize().to_hex().to_string())
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash of a serialized computation config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHash(pub String);

impl ConfigHash {
    /// Canonical serialization: struct fields serialize in declaration order and
    /// maps should be `BTreeMap`, so the JSON is deterministic.
    pub fn of<C: Serialize + ?Sized>(config: &C) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_vec(config)?;
        Ok(Self::from_bytes(&json))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Complete identity of a cached computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub data_hash: DatasetHash,
    pub config_hash: ConfigHash,
    pub range: String,
    fingerprint: String,
}

impl CacheKey {
    pub fn new(data_hash: DatasetHash, config_hash: ConfigHash, range: impl Into<String>) -> Self {
        let range = range.into();
        let fingerprint = combine(&data_hash, &config_hash, &range);
        Self {
            data_hash,
            config_hash,
            range,
            fingerprint,
        }
    }

    /// Fingerprint the current inputs of a computation.
    pub fn for_inputs<C: Serialize + ?Sized>(
        panel: &AssetPanel,
        config: &C,
        range: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            DatasetHash::of_panel(panel),
            ConfigHash::of(config)?,
            range,
        ))
    }

    /// Combined hex digest; also the storage file stem.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// True when the stored fingerprint still matches the components it claims to cover.
    pub fn is_consistent(&self) -> bool {
        combine(&self.data_hash, &self.config_hash, &self.range) == self.fingerprint
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Canonical label for an inclusive date range, used as the range component of a key.
pub fn date_range_label(start: NaiveDate, end: NaiveDate) -> String {
    format!("{start}..={end}")
}

fn combine(data: &DatasetHash, config: &ConfigHash, range: &str) -> String {
    let canonical = serde_json::json!({
        "config_hash": &config.0,
        "data_hash": &data.0,
        "range": range,
    });
    blake3::hash(canonical.to_string().as_bytes())
        .to_hex()
        .to_string()
}
