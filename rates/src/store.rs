//! Durable storage for the rate cache and the observation history.
//!
//! Both files are JSON documents written stage-then-rename: the new content is
//! fully written and synced to `<file>.tmp`, then renamed over the canonical
//! path. A crash at any point leaves either the old or the new document on
//! disk, never a truncated one.
//!
//! Reads are advisory. A missing or unparsable file loads as empty and is
//! logged; only write failures are reported to the caller.

use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use valutatrade_common::{CurrencyPair, HistoryRecordId, Timestamp};

use crate::cache::{RateCache, RateEntry};
use crate::config::RatesConfig;
use crate::error::{RatesError, RatesResult};
use crate::history::HistoryRecord;

/// Label written at the top of the history document.
pub const HISTORY_SOURCE_LABEL: &str = "ParserService";

const STAGING_SUFFIX: &str = ".tmp";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    pairs: BTreeMap<String, CacheFileEntry>,
    #[serde(default)]
    last_refresh: Option<Timestamp>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFileEntry {
    rate: f64,
    updated_at: Timestamp,
    #[serde(default = "unknown_source")]
    source: String,
}

fn unknown_source() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default = "history_source_label")]
    source: String,
    #[serde(default)]
    last_update: Option<Timestamp>,
    /// Kept as raw JSON so a record that no longer parses is carried over
    /// untouched instead of invalidating the whole file.
    #[serde(default)]
    records: Vec<Value>,
}

impl HistoryFile {
    /// Records that parse, skipping (and logging) the rest.
    fn parsed_records(&self) -> Vec<HistoryRecord> {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| match HistoryRecord::deserialize(raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(index, error = %e, "Skipping unreadable history record");
                    None
                }
            })
            .collect()
    }

    /// Ids already present, including those of records that no longer parse.
    fn taken_ids(&self) -> HashSet<HistoryRecordId> {
        self.records
            .iter()
            .filter_map(|raw| raw.get("id").and_then(Value::as_str))
            .map(|id| HistoryRecordId::from(id.to_string()))
            .collect()
    }
}

fn history_source_label() -> String {
    HISTORY_SOURCE_LABEL.to_string()
}

impl Default for HistoryFile {
    fn default() -> Self {
        Self {
            source: history_source_label(),
            last_update: None,
            records: Vec::new(),
        }
    }
}

impl From<CacheFile> for RateCache {
    fn from(file: CacheFile) -> Self {
        let mut pairs = BTreeMap::new();
        for (key, raw) in file.pairs {
            let pair = match CurrencyPair::from_key(&key) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping cached entry with invalid pair key");
                    continue;
                }
            };
            match RateEntry::new(&pair, raw.rate, raw.updated_at, raw.source) {
                Ok(entry) => {
                    pairs.insert(pair, entry);
                }
                Err(e) => warn!(pair = %pair, error = %e, "Skipping cached entry with invalid rate"),
            }
        }
        RateCache::from_parts(pairs, file.last_refresh)
    }
}

impl From<&RateCache> for CacheFile {
    fn from(cache: &RateCache) -> Self {
        let pairs = cache
            .iter()
            .map(|(pair, entry)| {
                (
                    pair.key(),
                    CacheFileEntry {
                        rate: entry.rate,
                        updated_at: entry.observed_at,
                        source: entry.source.clone(),
                    },
                )
            })
            .collect();
        Self {
            pairs,
            last_refresh: cache.last_refresh(),
        }
    }
}

/// File-backed store for [`RateCache`] and [`HistoryRecord`]s.
///
/// Mutations within one process are serialised through an internal lock, so
/// a resolver and an aggregator sharing one store never interleave their
/// load-modify-write sequences. Separate processes are not coordinated.
pub struct RateCacheStore {
    rates_path: PathBuf,
    history_path: PathBuf,
    write_lock: Mutex<()>,
}

impl RateCacheStore {
    /// Create a store over explicit file paths.
    pub fn new(rates_path: impl Into<PathBuf>, history_path: impl Into<PathBuf>) -> Self {
        Self {
            rates_path: rates_path.into(),
            history_path: history_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store using the configured data directory and file names.
    pub fn from_config(config: &RatesConfig) -> Self {
        Self::new(config.rates_path(), config.history_path())
    }

    pub fn rates_path(&self) -> &Path {
        &self.rates_path
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    /// Load the cache. Absent or unreadable files yield an empty cache.
    pub async fn load(&self) -> RateCache {
        match read_json::<CacheFile>(&self.rates_path).await {
            Ok(Some(file)) => file.into(),
            Ok(None) => {
                debug!(path = %self.rates_path.display(), "No rate cache on disk yet");
                RateCache::new()
            }
            Err(e) => {
                warn!(error = %e, "Rate cache unreadable, treating as empty");
                RateCache::new()
            }
        }
    }

    /// Persist the whole cache atomically.
    pub async fn save(&self, cache: &RateCache) -> RatesResult<()> {
        let _guard = self.write_lock.lock().await;
        write_json_atomic(&self.rates_path, &CacheFile::from(cache)).await
    }

    /// Load, apply `f`, and save, holding the store's write lock throughout.
    ///
    /// Nothing is written when `f` leaves the cache unchanged.
    pub async fn update<T, F>(&self, f: F) -> RatesResult<T>
    where
        F: FnOnce(&mut RateCache) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let mut cache = self.load().await;
        let before = cache.clone();
        let result = f(&mut cache);
        if cache == before {
            debug!("Cache unchanged, skipping write");
            return Ok(result);
        }
        write_json_atomic(&self.rates_path, &CacheFile::from(&cache)).await?;
        Ok(result)
    }

    /// Load all history records. Absent or unreadable files yield no records.
    pub async fn load_history(&self) -> Vec<HistoryRecord> {
        self.load_history_file().await.parsed_records()
    }

    /// Append one record to the history file.
    pub async fn append_history(&self, record: HistoryRecord) -> RatesResult<HistoryRecordId> {
        let mut ids = self.append_history_batch(vec![record]).await?;
        ids.pop()
            .ok_or_else(|| RatesError::Persistence {
                path: self.history_path.clone(),
                reason: "history append produced no record".to_string(),
            })
    }

    /// Append records to the history file in one atomic write.
    ///
    /// Returns the ids as stored; an id already present in the file gets a
    /// `-N` suffix.
    pub async fn append_history_batch(
        &self,
        records: Vec<HistoryRecord>,
    ) -> RatesResult<Vec<HistoryRecordId>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.write_lock.lock().await;
        let mut file = self.load_history_file().await;

        let mut taken = file.taken_ids();
        let mut ids = Vec::with_capacity(records.len());

        for mut record in records {
            record.id = unique_id(&record.id, &taken);
            let raw = serde_json::to_value(&record).map_err(|e| RatesError::Persistence {
                path: self.history_path.clone(),
                reason: e.to_string(),
            })?;
            taken.insert(record.id.clone());
            ids.push(record.id);

            file.last_update = Some(match file.last_update {
                Some(last) if last > record.timestamp => last,
                _ => record.timestamp,
            });
            file.records.push(raw);
        }

        write_json_atomic(&self.history_path, &file).await?;
        debug!(appended = ids.len(), total = file.records.len(), "History appended");
        Ok(ids)
    }

    async fn load_history_file(&self) -> HistoryFile {
        match read_json::<HistoryFile>(&self.history_path).await {
            Ok(Some(file)) => file,
            Ok(None) => HistoryFile::default(),
            Err(e) => {
                warn!(error = %e, "History file unreadable, starting a new one");
                HistoryFile::default()
            }
        }
    }
}

fn unique_id(id: &HistoryRecordId, taken: &HashSet<HistoryRecordId>) -> HistoryRecordId {
    if !taken.contains(id) {
        return id.clone();
    }
    (2..)
        .map(|n| id.with_suffix(n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| id.clone())
}

/// Path of the staging file used while replacing `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("rates"));
    name.push(STAGING_SUFFIX);
    path.with_file_name(name)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> RatesResult<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RatesError::CorruptRead {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| RatesError::CorruptRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> RatesResult<()> {
    let persistence = |reason: String| RatesError::Persistence {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = serde_json::to_vec_pretty(value).map_err(|e| persistence(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| persistence(e.to_string()))?;
    }

    let staging = staging_path(path);
    if let Err(e) = stage_and_replace(&staging, path, &bytes).await {
        if let Err(cleanup) = fs::remove_file(&staging).await {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!(
                    path = %staging.display(),
                    error = %cleanup,
                    "Failed to remove staging file"
                );
            }
        }
        return Err(persistence(e.to_string()));
    }

    Ok(())
}

async fn stage_and_replace(staging: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(staging).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(staging, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MergeOutcome;
    use chrono::Duration;
    use tempfile::TempDir;
    use tokio_test::assert_err;
    use valutatrade_common::now;

    fn store_in(dir: &TempDir) -> RateCacheStore {
        RateCacheStore::new(
            dir.path().join("rates.json"),
            dir.path().join("exchange_rates.json"),
        )
    }

    fn pair(key: &str) -> CurrencyPair {
        CurrencyPair::from_key(key).unwrap()
    }

    fn cache_with(key: &str, rate: f64) -> RateCache {
        let mut cache = RateCache::new();
        let at = now();
        cache.merge_entry(pair(key), RateEntry::new(&pair(key), rate, at, "TEST").unwrap());
        cache.touch(at);
        cache
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let cache = store.load().await;
        assert!(cache.is_empty());
        assert!(cache.last_refresh().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let cache = cache_with("BTC_USD", 45000.0);

        store.save(&cache).await.unwrap();
        let loaded = store.load().await;

        assert_eq!(loaded.get(&pair("BTC_USD")).unwrap().rate, 45000.0);
        assert_eq!(loaded.last_refresh(), cache.last_refresh());
        assert!(!staging_path(store.rates_path()).exists());
    }

    #[tokio::test]
    async fn test_persisted_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&cache_with("EUR_USD", 1.0786)).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.rates_path()).unwrap()).unwrap();
        assert_eq!(raw["pairs"]["EUR_USD"]["rate"], 1.0786);
        assert_eq!(raw["pairs"]["EUR_USD"]["source"], "TEST");
        assert!(raw["pairs"]["EUR_USD"]["updated_at"].is_string());
        assert!(raw["last_refresh"].is_string());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.rates_path(), b"{ not json").unwrap();

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let ts = now().to_rfc3339();
        let raw = serde_json::json!({
            "pairs": {
                "BTC_USD": { "rate": 45000.0, "updated_at": ts, "source": "A" },
                "BROKEN": { "rate": 1.0, "updated_at": ts, "source": "A" },
                "ETH_USD": { "rate": -1.0, "updated_at": ts, "source": "A" }
            },
            "last_refresh": null
        });
        std::fs::write(store.rates_path(), serde_json::to_vec(&raw).unwrap()).unwrap();

        let cache = store.load().await;
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&pair("BTC_USD")).is_some());
    }

    #[tokio::test]
    async fn test_orphaned_staging_file_does_not_affect_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&cache_with("BTC_USD", 45000.0)).await.unwrap();
        let before = std::fs::read(store.rates_path()).unwrap();

        // Simulate a crash after staging but before the rename.
        let staged = CacheFile::from(&cache_with("BTC_USD", 1.0));
        std::fs::write(
            staging_path(store.rates_path()),
            serde_json::to_vec_pretty(&staged).unwrap(),
        )
        .unwrap();

        assert_eq!(std::fs::read(store.rates_path()).unwrap(), before);
        assert_eq!(store.load().await.get(&pair("BTC_USD")).unwrap().rate, 45000.0);

        // The next save overwrites the leftover staging file.
        store.save(&cache_with("BTC_USD", 46000.0)).await.unwrap();
        assert_eq!(store.load().await.get(&pair("BTC_USD")).unwrap().rate, 46000.0);
        assert!(!staging_path(store.rates_path()).exists());
    }

    #[tokio::test]
    async fn test_failed_replace_discards_staging() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("rates.json");
        // A non-empty directory where the file should be makes the rename fail.
        std::fs::create_dir(&canonical).unwrap();
        std::fs::write(canonical.join("keep"), b"x").unwrap();
        let store = RateCacheStore::new(&canonical, dir.path().join("history.json"));

        let result = store.save(&cache_with("BTC_USD", 45000.0)).await;

        assert!(matches!(result, Err(RatesError::Persistence { .. })));
        assert!(!staging_path(&canonical).exists());
        assert!(canonical.join("keep").exists());
    }

    #[tokio::test]
    async fn test_unwritable_parent_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();
        let store = RateCacheStore::new(blocker.join("rates.json"), blocker.join("h.json"));

        let err = assert_err!(store.save(&RateCache::new()).await);
        assert_eq!(err.error_code(), "PERSISTENCE_FAILURE");
    }

    #[tokio::test]
    async fn test_update_applies_closure() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&cache_with("BTC_USD", 45000.0)).await.unwrap();

        let len = store
            .update(|cache| {
                let at = now();
                cache.merge_entry(
                    pair("ETH_USD"),
                    RateEntry::new(&pair("ETH_USD"), 3000.0, at, "TEST").unwrap(),
                );
                cache.touch(at);
                cache.len()
            })
            .await
            .unwrap();

        assert_eq!(len, 2);
        assert_eq!(store.load().await.len(), 2);
    }

    #[tokio::test]
    async fn test_history_append_and_collision_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let at = now();
        let p = pair("BTC_USD");

        let first = store
            .append_history(HistoryRecord::new(&p, 45000.0, at, "A"))
            .await
            .unwrap();
        let batch = store
            .append_history_batch(vec![
                HistoryRecord::new(&p, 45001.0, at, "B"),
                HistoryRecord::new(&p, 45002.0, at, "C"),
            ])
            .await
            .unwrap();

        assert_eq!(batch[0], first.with_suffix(2));
        assert_eq!(batch[1], first.with_suffix(3));

        let records = store.load_history().await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].source, "C");

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.history_path()).unwrap()).unwrap();
        assert_eq!(raw["source"], HISTORY_SOURCE_LABEL);
        assert!(raw["last_update"].is_string());
    }

    #[tokio::test]
    async fn test_history_last_update_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let at = now();
        let p = pair("EUR_USD");

        store
            .append_history(HistoryRecord::new(&p, 1.08, at, "A"))
            .await
            .unwrap();
        store
            .append_history(HistoryRecord::new(&p, 1.07, at - Duration::hours(1), "B"))
            .await
            .unwrap();

        let file = store.load_history_file().await;
        assert_eq!(file.last_update, Some(at));
        assert_eq!(file.records.len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_history_record_does_not_truncate_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let ts = now();
        let btc = HistoryRecord::new(&pair("BTC_USD"), 45000.0, ts, "A");
        let eth = HistoryRecord::new(&pair("ETH_USD"), 3000.0, ts, "A");
        let broken = serde_json::json!({
            "id": "XXX_USD_2025-10-09T12:00:00.000000Z",
            "from_currency": "",
            "to_currency": "USD",
            "rate": 1.0,
            "timestamp": ts,
            "source": "A"
        });
        let raw = serde_json::json!({
            "source": HISTORY_SOURCE_LABEL,
            "last_update": ts,
            "records": [btc, broken, eth]
        });
        std::fs::write(store.history_path(), serde_json::to_vec(&raw).unwrap()).unwrap();

        assert_eq!(store.load_history().await.len(), 2);

        store
            .append_history(HistoryRecord::new(&pair("EUR_USD"), 1.08, now(), "B"))
            .await
            .unwrap();

        let records = store.load_history().await;
        let pairs: Vec<String> = records.iter().map(|r| r.pair().key()).collect();
        assert_eq!(pairs, vec!["BTC_USD", "ETH_USD", "EUR_USD"]);

        let file: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.history_path()).unwrap()).unwrap();
        let stored = file["records"].as_array().unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[1]["from_currency"], "");
    }

    #[tokio::test]
    async fn test_unchanged_update_skips_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let at = now();
        let raw = serde_json::json!({
            "pairs": { "BTC_USD": { "rate": 45000.0, "updated_at": at, "source": "A" } },
            "last_refresh": at
        });
        // Compact on purpose: any rewrite would pretty-print it.
        let compact = serde_json::to_vec(&raw).unwrap();
        std::fs::write(store.rates_path(), &compact).unwrap();

        let older = RateEntry::new(&pair("BTC_USD"), 40000.0, at - Duration::minutes(1), "B").unwrap();
        let outcome = store
            .update(|cache| cache.merge_entry(pair("BTC_USD"), older))
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::KeptNewer);
        assert_eq!(std::fs::read(store.rates_path()).unwrap(), compact);
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/data/rates.json")),
            PathBuf::from("/data/rates.json.tmp")
        );
    }
}
