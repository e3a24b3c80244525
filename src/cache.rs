use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::dedup::{self, ScoreWeights};
use crate::domain::{Identity, Record};
use crate::error::ScanError;

/// Records older than this many hours are fetched again.
pub const FRESHNESS_HOURS: i64 = 24;

pub fn freshness_window() -> chrono::Duration {
    chrono::Duration::hours(FRESHNESS_HOURS)
}

pub fn is_fresh(record: &Record, now: DateTime<Utc>) -> bool {
    is_fresh_within(record, now, freshness_window())
}

pub fn is_fresh_within(record: &Record, now: DateTime<Utc>, window: chrono::Duration) -> bool {
    now.signed_duration_since(record.fetched_at) < window
}

/// Identity to record map. Serialized in key order so rewrites are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cache(BTreeMap<Identity, Record>);

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Identity) -> Option<&Record> {
        self.0.get(id)
    }

    pub fn insert(&mut self, record: Record) -> Option<Record> {
        self.0.insert(record.identity.clone(), record)
    }

    pub fn contains(&self, id: &Identity) -> bool {
        self.0.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Identity, Record> {
        self.0.iter()
    }

    pub fn records(&self) -> btree_map::Values<'_, Identity, Record> {
        self.0.values()
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ScanError> {
        serde_json::to_vec_pretty(self).map_err(|err| ScanError::Serialize(err.to_string()))
    }
}

impl IntoIterator for Cache {
    type Item = (Identity, Record);
    type IntoIter = btree_map::IntoIter<Identity, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<Record> for Cache {
    fn extend<T: IntoIterator<Item = Record>>(&mut self, iter: T) {
        for record in iter {
            self.insert(record);
        }
    }
}

impl FromIterator<Record> for Cache {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        let mut cache = Cache::new();
        cache.extend(iter);
        cache
    }
}

/// Every `key: value` pair of a JSON object, repeated keys included.
struct RawEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for RawEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object keyed by item identity")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(RawEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub before: usize,
    pub after: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_items: usize,
    pub kinds: BTreeMap<String, usize>,
    pub rarity: BTreeMap<String, usize>,
    pub cache_file_size: u64,
}

/// Durable identity to record cache backed by one JSON file.
#[derive(Debug)]
pub struct CacheStore {
    path: Utf8PathBuf,
    records: Cache,
    // Earlier candidates for an identity, kept for the dedup pass.
    shadowed: Vec<Record>,
    freshness: chrono::Duration,
}

impl CacheStore {
    /// Opens the cache file. A missing file yields an empty cache; an
    /// unreadable one is logged and also starts empty.
    pub fn open(path: Utf8PathBuf) -> Self {
        let mut store = Self {
            path,
            records: Cache::new(),
            shadowed: Vec::new(),
            freshness: freshness_window(),
        };
        if !store.path.as_std_path().exists() {
            return store;
        }
        match Self::read_entries(&store.path) {
            Ok(entries) => {
                for record in entries {
                    if let Some(previous) = store.records.insert(record) {
                        store.shadowed.push(previous);
                    }
                }
                info!(
                    count = store.records.len(),
                    duplicates = store.shadowed.len(),
                    path = %store.path,
                    "loaded item cache"
                );
            }
            Err(err) => error!(%err, path = %store.path, "failed to load item cache"),
        }
        store
    }

    pub fn with_freshness(mut self, freshness: chrono::Duration) -> Self {
        self.freshness = freshness;
        self
    }

    fn read_entries(path: &Utf8Path) -> Result<Vec<Record>, ScanError> {
        let content =
            fs::read(path.as_std_path()).map_err(|err| ScanError::Filesystem(err.to_string()))?;
        let RawEntries(entries) = serde_json::from_slice(&content)
            .map_err(|err| ScanError::Serialize(err.to_string()))?;

        let mut records = Vec::with_capacity(entries.len());
        for (key, mut value) in entries {
            if let Some(object) = value.as_object_mut() {
                object
                    .entry("identity")
                    .or_insert_with(|| Value::String(key.clone()));
            }
            match serde_json::from_value::<Record>(value) {
                Ok(record) => records.push(record),
                Err(err) => warn!(key = %key, %err, "skipping malformed cache entry"),
            }
        }
        Ok(records)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn cache(&self) -> &Cache {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pending_duplicates(&self) -> usize {
        self.shadowed.len()
    }

    pub fn get_or_none(&self, id: &Identity) -> Option<&Record> {
        self.records.get(id)
    }

    /// Cached record for `id` if it was fetched within the freshness window.
    pub fn get_fresh(&self, id: &Identity, now: DateTime<Utc>) -> Option<&Record> {
        self.records
            .get(id)
            .filter(|record| self.is_fresh(record, now))
    }

    pub fn is_fresh(&self, record: &Record, now: DateTime<Utc>) -> bool {
        is_fresh_within(record, now, self.freshness)
    }

    /// Last write wins. A fresh put also discards loaded duplicate
    /// candidates for the same identity, since they never reach disk again.
    pub fn put(&mut self, record: Record) -> Option<Record> {
        let before = self.shadowed.len();
        self.shadowed
            .retain(|candidate| candidate.identity != record.identity);
        let dropped = before - self.shadowed.len();
        if dropped > 0 {
            debug!(id = %record.identity, dropped, "superseded duplicate cache entries");
        }
        self.records.insert(record)
    }

    /// Rewrites the whole cache file.
    pub fn flush(&self) -> Result<(), ScanError> {
        let content = self.records.to_json_bytes()?;
        write_file_atomic(&self.path, &content)?;
        debug!(count = self.records.len(), path = %self.path, "item cache saved");
        Ok(())
    }

    pub fn deduplicate(&mut self) -> Result<DedupReport, ScanError> {
        self.deduplicate_with(&ScoreWeights::default())
    }

    pub fn deduplicate_with(&mut self, weights: &ScoreWeights) -> Result<DedupReport, ScanError> {
        let before = self.records.len() + self.shadowed.len();
        let candidates = self
            .shadowed
            .iter()
            .cloned()
            .chain(self.records.records().cloned());
        let resolved = dedup::resolve_with(candidates, weights)?;
        self.records = resolved;
        self.shadowed.clear();

        let after = self.records.len();
        let report = DedupReport {
            before,
            after,
            removed: before - after,
        };
        info!(removed = report.removed, remaining = after, "duplicates resolved");
        Ok(report)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            total_items: self.records.len(),
            ..CacheStats::default()
        };
        for record in self.records.records() {
            let kind = if record.kind.is_empty() {
                "Unknown"
            } else {
                record.kind.as_str()
            };
            *stats.kinds.entry(kind.to_string()).or_default() += 1;
            if let Some(rarity) = record.rarity() {
                *stats.rarity.entry(rarity.to_string()).or_default() += 1;
            }
        }
        stats.cache_file_size = fs::metadata(self.path.as_std_path())
            .map(|meta| meta.len())
            .unwrap_or(0);
        stats
    }

    pub fn clear(&mut self) -> Result<(), ScanError> {
        self.records = Cache::new();
        self.shadowed.clear();
        if self.path.as_std_path().exists() {
            fs::remove_file(self.path.as_std_path())
                .map_err(|err| ScanError::Filesystem(err.to_string()))?;
        }
        info!(path = %self.path, "item cache cleared");
        Ok(())
    }
}

pub fn write_file_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ScanError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| ScanError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("spt-scan")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| ScanError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| ScanError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| ScanError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(id: &str, fetched_at: DateTime<Utc>) -> Record {
        Record::new(id.parse().unwrap(), fetched_at)
    }

    #[test]
    fn freshness_boundary() {
        let now = Utc::now();
        let stale = record("a", now - chrono::Duration::hours(24) - chrono::Duration::seconds(1));
        let fresh = record("a", now - chrono::Duration::hours(23) - chrono::Duration::minutes(59));
        assert!(!is_fresh(&stale, now));
        assert!(is_fresh(&fresh, now));
    }

    #[test]
    fn duplicate_keys_are_kept_as_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("items_cache.json")).unwrap();
        fs::write(
            path.as_std_path(),
            r#"{
                "abc": {"identity": "abc", "kind": "Item", "fetched_at": 100,
                        "localized_fields": {"Name": "Full"}},
                "abc": {"identity": "abc", "fetched_at": 200}
            }"#,
        )
        .unwrap();

        let mut store = CacheStore::open(path);
        assert_eq!(store.len(), 1);
        assert_eq!(store.pending_duplicates(), 1);

        let report = store.deduplicate().unwrap();
        assert_eq!(report.removed, 1);
        let kept = store.get_or_none(&"abc".parse().unwrap()).unwrap();
        assert_eq!(kept.localized_name(), Some("Full"));
    }

    #[test]
    fn entries_without_identity_take_their_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("items_cache.json")).unwrap();
        fs::write(
            path.as_std_path(),
            json!({ "xyz": { "fetched_at": 5 }, "bad": 3 }).to_string(),
        )
        .unwrap();

        let store = CacheStore::open(path);
        assert_eq!(store.len(), 1);
        assert!(store.get_or_none(&"xyz".parse().unwrap()).is_some());
    }

    #[test]
    fn put_supersedes_loaded_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("items_cache.json")).unwrap();
        fs::write(
            path.as_std_path(),
            r#"{
                "abc": {"identity": "abc", "fetched_at": 100,
                        "localized_fields": {"Name": "Old but rich"}},
                "abc": {"identity": "abc", "fetched_at": 200}
            }"#,
        )
        .unwrap();

        let mut store = CacheStore::open(path);
        assert_eq!(store.pending_duplicates(), 1);
        let mut fetched = record("abc", Utc::now());
        fetched.display_name = "fetched".to_string();
        store.put(fetched);
        assert_eq!(store.pending_duplicates(), 0);

        let report = store.deduplicate().unwrap();
        assert_eq!(report.removed, 0);
        let kept = store.get_or_none(&"abc".parse().unwrap()).unwrap();
        assert_eq!(kept.display_name, "fetched");
    }

    #[test]
    fn stats_count_kinds_and_rarity() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("items_cache.json")).unwrap();
        let mut store = CacheStore::open(path);
        let mut first = record("a", Utc::now());
        first.kind = "Item".to_string();
        first
            .properties
            .insert("RarityPvE".to_string(), json!("Rare"));
        store.put(first);
        store.put(record("b", Utc::now()));
        store.flush().unwrap();

        let stats = store.stats();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.kinds.get("Item"), Some(&1));
        assert_eq!(stats.kinds.get("Unknown"), Some(&1));
        assert_eq!(stats.rarity.get("Rare"), Some(&1));
        assert!(stats.cache_file_size > 0);
    }
}
