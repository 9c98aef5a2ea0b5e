use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};

use super::disk::{CacheRecord, DiskStore};
use crate::feed::{FetchError, HttpFetcher};

/// Default time-to-live of a cached feed body (10 minutes)
pub const DEFAULT_TTL_SECS: u64 = 600;

/// Cache key for `url`: lowercase hex SHA-256 of the exact URL string.
pub fn cache_key(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// Time-bounded, disk-backed cache in front of [`HttpFetcher`].
///
/// One instance per process, shared by reference between requests. There is
/// no invalidation API: records simply stop being served once they expire.
/// Two concurrent misses for the same URL both fetch and both write.
#[derive(Debug, Clone)]
pub struct FetchCache {
    store: DiskStore,
    fetcher: HttpFetcher,
    ttl: TimeDelta,
}

impl FetchCache {
    pub fn new(store: DiskStore, fetcher: HttpFetcher, ttl_secs: u64) -> Self {
        let ttl = TimeDelta::try_seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX);
        Self {
            store,
            fetcher,
            ttl,
        }
    }

    pub fn store(&self) -> &DiskStore {
        &self.store
    }

    /// Returns the body for `url`, from disk when a fresh record exists,
    /// otherwise from the network (then stored for the TTL).
    ///
    /// Cache read and write failures are logged and never fail the call;
    /// only the network fetch can produce an error.
    pub async fn get_or_fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let key = cache_key(url);
        let now = Utc::now();

        match self.store.load(&key).await {
            Ok(Some(record)) if record.is_fresh(now) => {
                tracing::debug!(url = %url, key = %key, "Cache hit");
                return Ok(record.body);
            }
            Ok(Some(_)) => tracing::debug!(url = %url, key = %key, "Cache record expired"),
            Ok(None) => tracing::debug!(url = %url, key = %key, "Cache miss"),
            Err(e) => {
                tracing::warn!(url = %url, key = %key, error = %e, "Unreadable cache record, refetching");
            }
        }

        let body = self.fetcher.fetch(url).await?;

        let fetched_at = Utc::now();
        let record = CacheRecord {
            key,
            url: url.to_string(),
            fetched_at,
            expires_at: fetched_at
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            body,
        };
        if let Err(e) = self.store.save(&record).await {
            tracing::warn!(url = %url, error = %e, "Failed to write cache record");
        }

        Ok(record.body)
    }
}
