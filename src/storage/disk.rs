use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File suffix of a stored record.
const RECORD_SUFFIX: &str = ".json.gz";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One cached response body.
///
/// Records are immutable once written; a refetch replaces the whole file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
}

impl CacheRecord {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Directory of gzip-compressed JSON records, one file per key.
///
/// Writes go to a uniquely named temp file first and are renamed into place,
/// so readers never observe a partial record and concurrent writers of the
/// same key resolve as last-writer-wins.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Opens (and creates if needed) the cache directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{RECORD_SUFFIX}"))
    }

    /// Reads the record for `key`, fresh or not. `Ok(None)` when absent.
    pub async fn load(&self, key: &str) -> Result<Option<CacheRecord>, StoreError> {
        let compressed = match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        decode(&compressed).map(Some)
    }

    /// Writes `record` under its key, replacing any previous record.
    pub async fn save(&self, record: &CacheRecord) -> Result<(), StoreError> {
        use std::time::{SystemTime, UNIX_EPOCH};

        let encoded = encode(record)?;

        // SEC-009: Randomized temp filename so concurrent writers never share one
        let random_suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = self
            .dir
            .join(format!("{}.{:016x}.tmp", record.key, random_suffix));

        if let Err(e) = tokio::fs::write(&temp_path, &encoded).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp_path, self.path_for(&record.key)).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Deletes expired and unreadable records. Returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(|n| n.strip_suffix(RECORD_SUFFIX)) else {
                continue;
            };
            let stale = match self.load(key).await {
                Ok(Some(record)) => !record.is_fresh(now),
                Ok(None) => false,
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Removing unreadable cache record");
                    true
                }
            };
            if stale {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

fn encode(record: &CacheRecord) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(record)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn decode(compressed: &[u8]) -> Result<CacheRecord, StoreError> {
    let mut json = Vec::new();
    GzDecoder::new(compressed).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    fn record(key: &str, expires_in: TimeDelta) -> CacheRecord {
        let now = Utc::now();
        CacheRecord {
            key: key.to_string(),
            url: format!("https://example.com/{key}"),
            fetched_at: now,
            expires_at: now + expires_in,
            body: b"<feed>\xff binary-safe</feed>".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();

        let rec = record("abc", TimeDelta::minutes(10));
        store.save(&rec).await.unwrap();

        let loaded = store.load("abc").await.unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert!(loaded.is_fresh(Utc::now()));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        assert!(store.load("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();

        store.save(&record("k", TimeDelta::minutes(1))).await.unwrap();
        let mut newer = record("k", TimeDelta::minutes(10));
        newer.body = b"new".to_vec();
        store.save(&newer).await.unwrap();

        assert_eq!(store.load("k").await.unwrap().unwrap().body, b"new");
        // No temp files left behind
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("bad.json.gz"), b"not gzip").unwrap();

        assert!(store.load("bad").await.is_err());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();

        store.save(&record("fresh", TimeDelta::minutes(10))).await.unwrap();
        store.save(&record("stale", TimeDelta::seconds(-1))).await.unwrap();
        std::fs::write(dir.path().join("junk.json.gz"), b"garbage").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"keep me").unwrap();

        let removed = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.load("fresh").await.unwrap().is_some());
        assert!(store.load("stale").await.unwrap().is_none());
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
