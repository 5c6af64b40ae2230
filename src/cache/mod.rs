//! Durable hash cache for local and remote file observations.
//!
//! # Architecture
//!
//! * [`database`]: SQLite persistence, schema management and the query/update operations.
//! * [`entry`]: Record, key and side types stored in the cache.
//!
//! # Staleness
//!
//! A record's hash is only trusted for the `(size, mtime)` it was computed
//! against. Any observation that changes either clears the hash in the same
//! transaction, which makes [`CacheRecord::needs_hash`] the single source of
//! truth for "needs rehash".

pub mod database;
pub mod entry;

pub use database::{CacheError, CacheResult, HashCache};
pub use entry::{CacheKey, CacheRecord, Observation, PruneStats, Side};
