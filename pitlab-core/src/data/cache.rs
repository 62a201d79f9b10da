//! Content-addressable cache for factor values and eligibility masks.
//!
//! Layout:
//! - `{root}/meta/{fingerprint}.json` — metadata record (key, creation time, payload digest)
//! - `{root}/payload/{fingerprint}.json` — serialized payload
//!
//! Features:
//! - Atomic writes (write to a unique temp file, rename into place)
//! - Payload first, metadata last: a metadata record is the commit marker
//! - Every read re-checks the fingerprint, the TTL and the payload digest
//! - Unreadable or corrupt entries are misses, never errors
//! - Write failures are logged and swallowed
//!
//! Several handles (threads or processes) may share one root. Keys are derived
//! from content, so two writers of the same fingerprint write the same payload
//! and the last rename wins.

use crate::fingerprint::CacheKey;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

const META_DIR: &str = "meta";
const PAYLOAD_DIR: &str = "payload";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metadata record stored beside each payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub key: CacheKey,
    pub created_at: DateTime<Utc>,
    /// BLAKE3 hex digest of the payload file contents.
    pub payload_hash: String,
    pub payload_bytes: u64,
}

/// Counter snapshot for introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub write_failures: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

/// Why a lookup missed. Only used for diagnostics.
#[derive(Debug, Error)]
enum MissReason {
    #[error("no entry")]
    NotFound,
    #[error("unreadable {what}: {detail}")]
    Unreadable { what: &'static str, detail: String },
    #[error("stored fingerprint does not match current inputs")]
    FingerprintMismatch,
    #[error("entry expired (age {age_secs}s)")]
    Expired { age_secs: i64 },
    #[error("payload digest mismatch")]
    DigestMismatch,
}

#[derive(Debug, Error)]
enum CacheWriteError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Content-addressable on-disk cache.
#[derive(Debug)]
pub struct FactorValueCache {
    root: PathBuf,
    max_age: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    write_failures: AtomicU64,
}

impl FactorValueCache {
    /// Open a cache rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_age: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// Entries older than `max_age` are treated as misses.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_max_age_days(self, days: u32) -> Self {
        self.with_max_age(Duration::days(i64::from(days)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Look up a payload. Returns `None` on any kind of miss.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.get_at(key, Utc::now())
    }

    /// Look up a payload, evaluating the TTL against an explicit clock.
    pub fn get_at<T: DeserializeOwned>(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<T> {
        match self.lookup(key, now) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %key, "cache hit");
                Some(value)
            }
            Err(reason) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %key, reason = %reason, "cache miss");
                None
            }
        }
    }

    /// Store a payload. Failures are logged and swallowed.
    pub fn put<T: Serialize>(&self, key: &CacheKey, payload: &T) {
        self.put_at(key, payload, Utc::now());
    }

    /// Store a payload with an explicit creation timestamp.
    pub fn put_at<T: Serialize>(&self, key: &CacheKey, payload: &T, created_at: DateTime<Utc>) {
        match self.store(key, payload, created_at) {
            Ok(()) => {
                self.puts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    fingerprint = %key,
                    root = %self.root.display(),
                    error = %e,
                    "cache write failed; continuing without caching"
                );
            }
        }
    }

    /// Return the cached payload, or compute, store and return it.
    pub fn get_or_compute<T, E, F>(&self, key: &CacheKey, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = compute()?;
        self.put(key, &value);
        Ok(value)
    }

    /// Drop one entry. Missing files are ignored.
    pub fn invalidate(&self, key: &CacheKey) {
        let _ = fs::remove_file(self.meta_path(key.fingerprint()));
        let _ = fs::remove_file(self.payload_path(key.fingerprint()));
    }

    /// Remove every entry. Returns the number of metadata records removed.
    pub fn purge(&self) -> usize {
        let removed = self.entry_stems().len();
        for dir in [self.meta_dir(), self.payload_dir()] {
            if let Err(e) = fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %e, "cache purge failed");
                }
            }
        }
        removed
    }

    /// Remove entries that are expired at `now` or whose metadata is unreadable.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let Some(max_age) = self.max_age else {
            return 0;
        };
        let mut removed = 0;
        for stem in self.entry_stems() {
            let stale = match read_meta(&self.meta_path(&stem)) {
                Ok(meta) => now - meta.created_at > max_age,
                Err(_) => true,
            };
            if stale {
                let _ = fs::remove_file(self.meta_path(&stem));
                let _ = fs::remove_file(self.payload_path(&stem));
                removed += 1;
            }
        }
        removed
    }

    /// Number of committed entries (metadata records) on disk.
    pub fn len(&self) -> usize {
        self.entry_stems().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<T, MissReason> {
        let meta_path = self.meta_path(key.fingerprint());
        if !meta_path.exists() {
            return Err(MissReason::NotFound);
        }
        let meta = read_meta(&meta_path)?;

        if meta.key != *key || !meta.key.is_consistent() {
            return Err(MissReason::FingerprintMismatch);
        }

        if let Some(max_age) = self.max_age {
            let age = now - meta.created_at;
            if age > max_age {
                return Err(MissReason::Expired {
                    age_secs: age.num_seconds(),
                });
            }
        }

        let bytes = fs::read(self.payload_path(key.fingerprint())).map_err(|e| {
            MissReason::Unreadable {
                what: "payload",
                detail: e.to_string(),
            }
        })?;
        if blake3::hash(&bytes).to_hex().as_str() != meta.payload_hash {
            return Err(MissReason::DigestMismatch);
        }
        serde_json::from_slice(&bytes).map_err(|e| MissReason::Unreadable {
            what: "payload",
            detail: e.to_string(),
        })
    }

    fn store<T: Serialize>(
        &self,
        key: &CacheKey,
        payload: &T,
        created_at: DateTime<Utc>,
    ) -> Result<(), CacheWriteError> {
        let bytes = serde_json::to_vec(payload)?;
        let meta = CacheEntryMeta {
            key: key.clone(),
            created_at,
            payload_hash: blake3::hash(&bytes).to_hex().to_string(),
            payload_bytes: bytes.len() as u64,
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta)?;

        atomic_write(&self.payload_path(key.fingerprint()), &bytes)?;
        atomic_write(&self.meta_path(key.fingerprint()), &meta_bytes)?;
        Ok(())
    }

    fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    fn payload_dir(&self) -> PathBuf {
        self.root.join(PAYLOAD_DIR)
    }

    fn meta_path(&self, fingerprint: &str) -> PathBuf {
        self.meta_dir().join(format!("{fingerprint}.json"))
    }

    fn payload_path(&self, fingerprint: &str) -> PathBuf {
        self.payload_dir().join(format!("{fingerprint}.json"))
    }

    /// File stems of all committed metadata records.
    fn entry_stems(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.meta_dir()) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect()
    }
}

fn read_meta(path: &Path) -> Result<CacheEntryMeta, MissReason> {
    let bytes = fs::read(path).map_err(|e| MissReason::Unreadable {
        what: "metadata",
        detail: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| MissReason::Unreadable {
        what: "metadata",
        detail: e.to_string(),
    })
}

/// Write to a unique temp file in the target directory, then rename into place.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheWriteError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| CacheWriteError::Io {
        op: "create dir",
        path: dir.to_path_buf(),
        source,
    })?;

    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("entry");
    let tmp_path = dir.join(format!(".{file_name}.{}.{n}.tmp", std::process::id()));

    fs::write(&tmp_path, bytes).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        CacheWriteError::Io {
            op: "write",
            path: tmp_path.clone(),
            source,
        }
    })?;

    fs::rename(&tmp_path, path).map_err(|source| {
        // Clean up temp file on rename failure
        let _ = fs::remove_file(&tmp_path);
        CacheWriteError::Io {
            op: "rename",
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::panel::AssetPanel;
    use chrono::{NaiveDate, TimeZone};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn panel() -> AssetPanel {
        AssetPanel::from_columns(
            vec![d("2024-01-02"), d("2024-01-03"), d("2024-01-04")],
            vec![
                ("SPY".into(), vec![0.01, 0.02, -0.01]),
                ("QQQ".into(), vec![f64::NAN, 0.03, 0.00]),
            ],
        )
        .unwrap()
    }

    fn key_for(p: &AssetPanel) -> CacheKey {
        CacheKey::for_inputs(p, &("eligibility", 252_u32, 20_u32), "2024-01-02..=2024-01-04")
            .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn put_then_get_returns_payload() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FactorValueCache::new(dir.path());
        let key = key_for(&panel());

        assert_eq!(cache.get::<Vec<bool>>(&key), None);
        cache.put(&key, &vec![true, false]);
        assert_eq!(cache.get::<Vec<bool>>(&key), Some(vec![true, false]));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.puts, 1);
        assert!(dir.path().join("meta").is_dir());
        assert!(dir.path().join("payload").is_dir());
    }

    #[test]
    fn mutated_cell_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FactorValueCache::new(dir.path());
        let mut p = panel();
        cache.put(&key_for(&p), &vec![true, true]);

        p.set(2, 0, -0.0100001);
        assert_eq!(cache.get::<Vec<bool>>(&key_for(&p)), None);
    }

    #[test]
    fn ttl_boundary_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FactorValueCache::new(dir.path()).with_max_age_days(7);
        let key = key_for(&panel());
        cache.put_at(&key, &42_u32, t0());

        let exactly = t0() + Duration::days(7);
        assert_eq!(cache.get_at::<u32>(&key, exactly), Some(42));

        let just_after = exactly + Duration::milliseconds(1);
        assert_eq!(cache.get_at::<u32>(&key, just_after), None);
    }

    #[test]
    fn truncated_payload_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FactorValueCache::new(dir.path());
        let key = key_for(&panel());
        cache.put(&key, &vec![1.0_f64, 2.0, 3.0]);

        let payload = dir
            .path()
            .join("payload")
            .join(format!("{}.json", key.fingerprint()));
        let bytes = fs::read(&payload).unwrap();
        fs::write(&payload, &bytes[..bytes.len() / 2]).unwrap();

        assert_eq!(cache.get::<Vec<f64>>(&key), None);
    }

    #[test]
    fn garbage_metadata_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FactorValueCache::new(dir.path());
        let key = key_for(&panel());
        cache.put(&key, &1_u8);

        let meta = dir
            .path()
            .join("meta")
            .join(format!("{}.json", key.fingerprint()));
        fs::write(&meta, b"{ not json").unwrap();

        assert_eq!(cache.get::<u8>(&key), None);
    }

    #[test]
    fn missing_payload_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FactorValueCache::new(dir.path());
        let key = key_for(&panel());
        cache.put(&key, &1_u8);
        fs::remove_dir_all(dir.path().join("payload")).unwrap();

        assert_eq!(cache.get::<u8>(&key), None);
    }

    #[test]
    fn write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // Root is a regular file, so directories cannot be created under it.
        let root = dir.path().join("not_a_dir");
        fs::write(&root, b"x").unwrap();
        let cache = FactorValueCache::new(&root);
        let key = key_for(&panel());

        cache.put(&key, &1_u8);
        assert_eq!(cache.stats().write_failures, 1);
        assert_eq!(cache.stats().puts, 0);
        assert_eq!(cache.get::<u8>(&key), None);
    }

    #[test]
    fn handles_share_one_store() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FactorValueCache::new(dir.path());
        let reader = FactorValueCache::new(dir.path());
        let key = key_for(&panel());

        writer.put(&key, &"scores".to_string());
        assert_eq!(reader.get::<String>(&key), Some("scores".to_string()));
    }

    #[test]
    fn get_or_compute_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FactorValueCache::new(dir.path());
        let key = key_for(&panel());
        let mut calls = 0;

        for _ in 0..3 {
            let v: Result<u32, ()> = cache.get_or_compute(&key, || {
                calls += 1;
                Ok(7)
            });
            assert_eq!(v, Ok(7));
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn purge_and_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FactorValueCache::new(dir.path());
        let p = panel();
        let k1 = key_for(&p);
        let k2 = CacheKey::for_inputs(&p, &"other", "r").unwrap();
        cache.put(&k1, &1_u8);
        cache.put(&k2, &2_u8);
        assert_eq!(cache.len(), 2);

        cache.invalidate(&k1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<u8>(&k1), None);

        assert_eq!(cache.purge(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_expired_keeps_fresh_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FactorValueCache::new(dir.path()).with_max_age_days(1);
        let p = panel();
        let old = key_for(&p);
        let fresh = CacheKey::for_inputs(&p, &"fresh", "r").unwrap();
        cache.put_at(&old, &1_u8, t0() - Duration::days(3));
        cache.put_at(&fresh, &2_u8, t0());

        assert_eq!(cache.purge_expired(t0()), 1);
        assert_eq!(cache.get_at::<u8>(&fresh, t0()), Some(2));
    }
}
