mod disk;
mod fetch_cache;

pub use disk::{CacheRecord, DiskStore, StoreError};
pub use fetch_cache::{cache_key, FetchCache, DEFAULT_TTL_SECS};
