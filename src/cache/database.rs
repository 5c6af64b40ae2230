//! SQLite-backed hash cache database.
//!
//! Two tables hold the observations of each side:
//!
//! * `filemeta_local`, keyed by `(root, rel, algo)`
//! * `filemeta_remote`, keyed by `(host, root, rel, algo)`
//!
//! Both carry secondary indexes on `(algo, hash)` and on `last_observed`.
//! The database runs in WAL mode and every write is a single immediate
//! transaction, so a metadata update and a hash update for the same key
//! can never interleave.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use super::entry::{CacheKey, CacheRecord, Observation, PruneStats, Side};
use crate::scanner::HashAlgorithm;

/// Current schema version stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS filemeta_local (
    root          TEXT    NOT NULL,
    rel           TEXT    NOT NULL,
    size          INTEGER NOT NULL,
    mtime         INTEGER NOT NULL,
    algo          TEXT    NOT NULL,
    hash          TEXT,
    last_observed INTEGER NOT NULL,
    last_hashed   INTEGER,
    PRIMARY KEY (root, rel, algo)
);
CREATE INDEX IF NOT EXISTS idx_local_algo_hash ON filemeta_local(algo, hash);
CREATE INDEX IF NOT EXISTS idx_local_last_observed ON filemeta_local(last_observed);

CREATE TABLE IF NOT EXISTS filemeta_remote (
    host          TEXT    NOT NULL,
    root          TEXT    NOT NULL,
    rel           TEXT    NOT NULL,
    size          INTEGER NOT NULL,
    mtime         INTEGER NOT NULL,
    algo          TEXT    NOT NULL,
    hash          TEXT,
    last_observed INTEGER NOT NULL,
    last_hashed   INTEGER,
    PRIMARY KEY (host, root, rel, algo)
);
CREATE INDEX IF NOT EXISTS idx_remote_algo_hash ON filemeta_remote(algo, hash);
CREATE INDEX IF NOT EXISTS idx_remote_last_observed ON filemeta_remote(last_observed);
"#;

const COLUMNS: &str = "root, rel, algo, size, mtime, hash, last_observed, last_hashed";

/// Errors raised by the hash cache.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The database directory could not be created.
    #[error("Failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An SQLite operation failed.
    #[error("Cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The on-disk schema is newer than this build understands.
    #[error("Cache schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// A stored row could not be decoded.
    #[error("Corrupt cache row: {0}")]
    CorruptRow(String),

    /// Another thread panicked while holding the connection.
    #[error("Cache connection lock poisoned")]
    Poisoned,
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Durable, staleness-aware cache of file observations for both sides.
///
/// The store is the single owner of cache records. Callers read through the
/// query methods and write through [`upsert_observation`](Self::upsert_observation),
/// [`record_hash`](Self::record_hash) and
/// [`record_verification`](Self::record_verification).
pub struct HashCache {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for HashCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashCache").field("path", &self.path).finish()
    }
}

impl HashCache {
    /// Opens or creates the cache at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created, the database cannot be
    /// opened, or the schema is newer than supported.
    pub fn new(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CacheError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(10))?;
        Self::migrate(&conn)?;

        log::debug!("Opened hash cache at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory cache, mostly for tests and plan-only dry runs.
    ///
    /// # Errors
    ///
    /// Fails if SQLite cannot allocate the database.
    pub fn in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Location of the database file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(conn: &Connection) -> CacheResult<()> {
        let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if found > SCHEMA_VERSION {
            return Err(CacheError::SchemaTooNew {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        if found < SCHEMA_VERSION {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(SCHEMA)?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tx.commit()?;
        }
        Ok(())
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    fn with_immediate_tx<T, F>(&self, f: F) -> CacheResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CacheResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Records one observation of a file.
    ///
    /// Inserts the record if it is new. If `size` or `mtime` differ from the
    /// stored values, the hash and last-hashed timestamp are cleared in the
    /// same transaction. `last_observed` always becomes `now`.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures; the record is left untouched on error.
    pub fn upsert_observation(
        &self,
        side: &Side,
        key: &CacheKey,
        size: u64,
        mtime: i64,
        now: i64,
    ) -> CacheResult<Observation> {
        let table = side.table();
        let (key_clause, mut key_params) = key_filter(side, key);
        let size = size_to_sql(size);

        self.with_immediate_tx(|tx| {
            let existing: Option<(i64, i64, Option<String>)> = tx
                .query_row(
                    &format!("SELECT size, mtime, hash FROM {table} WHERE {key_clause}"),
                    params_from_iter(key_params.iter()),
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            match existing {
                None => {
                    let (columns, placeholders) = match side {
                        Side::Local => ("root, rel, algo", "?, ?, ?"),
                        Side::Remote { .. } => ("host, root, rel, algo", "?, ?, ?, ?"),
                    };
                    key_params.extend([Value::Integer(size), Value::Integer(mtime), Value::Integer(now)]);
                    tx.execute(
                        &format!(
                            "INSERT INTO {table} ({columns}, size, mtime, last_observed) \
                             VALUES ({placeholders}, ?, ?, ?)"
                        ),
                        params_from_iter(key_params.iter()),
                    )?;
                    Ok(Observation::Inserted)
                }
                Some((old_size, old_mtime, hash)) if old_size == size && old_mtime == mtime => {
                    let mut params = vec![Value::Integer(now)];
                    params.append(&mut key_params);
                    tx.execute(
                        &format!("UPDATE {table} SET last_observed = ? WHERE {key_clause}"),
                        params_from_iter(params.iter()),
                    )?;
                    Ok(Observation::Unchanged {
                        hashed: hash.is_some(),
                    })
                }
                Some(_) => {
                    let mut params = vec![Value::Integer(size), Value::Integer(mtime), Value::Integer(now)];
                    params.append(&mut key_params);
                    tx.execute(
                        &format!(
                            "UPDATE {table} SET size = ?, mtime = ?, hash = NULL, last_hashed = NULL, \
                             last_observed = ? WHERE {key_clause}"
                        ),
                        params_from_iter(params.iter()),
                    )?;
                    Ok(Observation::MetadataChanged)
                }
            }
        })
    }

    /// Stores a freshly computed hash; `last_hashed` becomes `now`.
    ///
    /// Returns `false` if no record exists for `key`.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn record_hash(&self, side: &Side, key: &CacheKey, hash: &str, now: i64) -> CacheResult<bool> {
        let table = side.table();
        let (key_clause, mut key_params) = key_filter(side, key);
        let mut params = vec![Value::Text(hash.to_string()), Value::Integer(now)];
        params.append(&mut key_params);

        self.with_immediate_tx(|tx| {
            let changed = tx.execute(
                &format!("UPDATE {table} SET hash = ?, last_hashed = ? WHERE {key_clause}"),
                params_from_iter(params.iter()),
            )?;
            Ok(changed > 0)
        })
    }

    /// Stores the result of a forced re-verification.
    ///
    /// Unlike [`record_hash`](Self::record_hash) this also advances
    /// `last_observed`. A `None` hash (the file could not be read) clears the
    /// stored hash so the record is picked up again as stale.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn record_verification(
        &self,
        side: &Side,
        key: &CacheKey,
        hash: Option<&str>,
        now: i64,
    ) -> CacheResult<bool> {
        let table = side.table();
        let (key_clause, mut key_params) = key_filter(side, key);
        let mut params = vec![
            hash.map_or(Value::Null, |h| Value::Text(h.to_string())),
            hash.map_or(Value::Null, |_| Value::Integer(now)),
            Value::Integer(now),
        ];
        params.append(&mut key_params);

        self.with_immediate_tx(|tx| {
            let changed = tx.execute(
                &format!(
                    "UPDATE {table} SET hash = ?, last_hashed = ?, last_observed = ? WHERE {key_clause}"
                ),
                params_from_iter(params.iter()),
            )?;
            Ok(changed > 0)
        })
    }

    /// Records with a non-null hash in scope, optionally only those observed
    /// at or after `min_last_observed`.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures and undecodable rows.
    pub fn query_hashed(
        &self,
        side: &Side,
        roots: &[String],
        algo: HashAlgorithm,
        min_last_observed: Option<i64>,
    ) -> CacheResult<Vec<CacheRecord>> {
        let (mut clause, mut params) = scope_filter(side, roots, algo);
        clause.push_str(" AND hash IS NOT NULL");
        if let Some(min) = min_last_observed {
            clause.push_str(" AND last_observed >= ?");
            params.push(Value::Integer(min));
        }
        self.select(side, &clause, &params)
    }

    /// Records in scope that need (re)hashing: no hash, no last-hashed, or
    /// last-hashed older than the current mtime.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures and undecodable rows.
    pub fn select_stale(
        &self,
        side: &Side,
        roots: &[String],
        algo: HashAlgorithm,
    ) -> CacheResult<Vec<CacheRecord>> {
        let (mut clause, params) = scope_filter(side, roots, algo);
        clause.push_str(" AND (hash IS NULL OR last_hashed IS NULL OR last_hashed < mtime)");
        self.select(side, &clause, &params)
    }

    /// Every record in scope, hashed or not.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures and undecodable rows.
    pub fn list_records(
        &self,
        side: &Side,
        roots: &[String],
        algo: HashAlgorithm,
    ) -> CacheResult<Vec<CacheRecord>> {
        let (clause, params) = scope_filter(side, roots, algo);
        self.select(side, &clause, &params)
    }

    /// Number of records in scope.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn count(&self, side: &Side, roots: &[String], algo: HashAlgorithm) -> CacheResult<usize> {
        let (clause, params) = scope_filter(side, roots, algo);
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {clause}", side.table()),
            params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Looks up a single record.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures and undecodable rows.
    pub fn get(&self, side: &Side, key: &CacheKey) -> CacheResult<Option<CacheRecord>> {
        let (clause, params) = key_filter(side, key);
        Ok(self.select(side, &clause, &params)?.into_iter().next())
    }

    /// Deletes records on both sides whose last observation is older than
    /// `now - ttl_secs`.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn prune(&self, ttl_secs: i64, now: i64) -> CacheResult<PruneStats> {
        let cutoff = now.saturating_sub(ttl_secs);
        let stats = self.with_immediate_tx(|tx| {
            let local = tx.execute("DELETE FROM filemeta_local WHERE last_observed < ?1", [cutoff])?;
            let remote = tx.execute("DELETE FROM filemeta_remote WHERE last_observed < ?1", [cutoff])?;
            Ok(PruneStats { local, remote })
        })?;
        if stats.local + stats.remote > 0 {
            log::info!(
                "Pruned {} local and {} remote cache records older than {}s",
                stats.local,
                stats.remote,
                ttl_secs
            );
        }
        Ok(stats)
    }

    /// Removes every record from both tables.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn clear(&self) -> CacheResult<()> {
        self.with_immediate_tx(|tx| {
            tx.execute_batch("DELETE FROM filemeta_local; DELETE FROM filemeta_remote;")?;
            Ok(())
        })
    }

    fn select(&self, side: &Side, clause: &str, params: &[Value]) -> CacheResult<Vec<CacheRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM {} WHERE {clause} ORDER BY root, rel",
            side.table()
        ))?;
        let rows = stmt.query_map(params_from_iter(params.iter()), raw_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

/// Row as read from SQLite, before the algorithm column is decoded.
struct RawRow {
    root: String,
    rel: String,
    algo: String,
    size: i64,
    mtime: i64,
    hash: Option<String>,
    last_observed: i64,
    last_hashed: Option<i64>,
}

impl RawRow {
    fn into_record(self) -> CacheResult<CacheRecord> {
        let algo = self
            .algo
            .parse::<HashAlgorithm>()
            .map_err(|e| CacheError::CorruptRow(format!("{}/{}: {e}", self.root, self.rel)))?;
        Ok(CacheRecord {
            root: self.root,
            rel: self.rel,
            algo,
            size: u64::try_from(self.size).unwrap_or(0),
            mtime: self.mtime,
            hash: self.hash,
            last_observed: self.last_observed,
            last_hashed: self.last_hashed,
        })
    }
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        root: row.get(0)?,
        rel: row.get(1)?,
        algo: row.get(2)?,
        size: row.get(3)?,
        mtime: row.get(4)?,
        hash: row.get(5)?,
        last_observed: row.get(6)?,
        last_hashed: row.get(7)?,
    })
}

fn size_to_sql(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// `WHERE` fragment matching exactly one primary key.
fn key_filter(side: &Side, key: &CacheKey) -> (String, Vec<Value>) {
    let mut params = Vec::with_capacity(4);
    let mut clause = String::new();
    if let Some(host) = side.host() {
        clause.push_str("host = ? AND ");
        params.push(Value::Text(host.to_string()));
    }
    clause.push_str("root = ? AND rel = ? AND algo = ?");
    params.push(Value::Text(key.root.clone()));
    params.push(Value::Text(key.rel.clone()));
    params.push(Value::Text(key.algo.as_str().to_string()));
    (clause, params)
}

/// `WHERE` fragment restricting to a host, a set of roots and an algorithm.
fn scope_filter(side: &Side, roots: &[String], algo: HashAlgorithm) -> (String, Vec<Value>) {
    let mut params = Vec::with_capacity(roots.len() + 2);
    let mut clause = String::new();
    if let Some(host) = side.host() {
        clause.push_str("host = ? AND ");
        params.push(Value::Text(host.to_string()));
    }
    clause.push_str("algo = ?");
    params.push(Value::Text(algo.as_str().to_string()));

    if roots.is_empty() {
        clause.push_str(" AND 0");
    } else {
        let placeholders = vec!["?"; roots.len()].join(", ");
        clause.push_str(&format!(" AND root IN ({placeholders})"));
        params.extend(roots.iter().map(|r| Value::Text(r.clone())));
    }
    (clause, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ALGO: HashAlgorithm = HashAlgorithm::Sha256;

    fn key(rel: &str) -> CacheKey {
        CacheKey::new("/data", rel, ALGO)
    }

    fn roots() -> Vec<String> {
        vec!["/data".to_string()]
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite");
        let cache = HashCache::new(&path).unwrap();

        assert!(path.exists());
        assert_eq!(cache.path(), Some(path.as_path()));

        drop(cache);
        // Reopening an existing database keeps the schema.
        HashCache::new(&path).unwrap();
    }

    #[test]
    fn test_insert_then_unchanged() {
        let cache = HashCache::in_memory().unwrap();
        let side = Side::Local;

        assert_eq!(
            cache.upsert_observation(&side, &key("a"), 10, 100, 1000).unwrap(),
            Observation::Inserted
        );
        assert_eq!(
            cache.upsert_observation(&side, &key("a"), 10, 100, 1001).unwrap(),
            Observation::Unchanged { hashed: false }
        );

        cache.record_hash(&side, &key("a"), "h1", 1002).unwrap();
        assert_eq!(
            cache.upsert_observation(&side, &key("a"), 10, 100, 1003).unwrap(),
            Observation::Unchanged { hashed: true }
        );

        let rec = cache.get(&side, &key("a")).unwrap().unwrap();
        assert_eq!(rec.hash.as_deref(), Some("h1"));
        assert_eq!(rec.last_hashed, Some(1002));
        assert_eq!(rec.last_observed, 1003);
    }

    #[test]
    fn test_metadata_change_clears_hash() {
        let cache = HashCache::in_memory().unwrap();
        let side = Side::remote("srv");

        cache.upsert_observation(&side, &key("a"), 10, 100, 1000).unwrap();
        cache.record_hash(&side, &key("a"), "h1", 1000).unwrap();

        assert_eq!(
            cache.upsert_observation(&side, &key("a"), 10, 200, 2000).unwrap(),
            Observation::MetadataChanged
        );
        let rec = cache.get(&side, &key("a")).unwrap().unwrap();
        assert_eq!(rec.hash, None);
        assert_eq!(rec.last_hashed, None);
        assert_eq!(rec.mtime, 200);
        assert_eq!(rec.last_observed, 2000);

        cache.record_hash(&side, &key("a"), "h2", 2001).unwrap();
        cache.upsert_observation(&side, &key("a"), 11, 200, 3000).unwrap();
        assert_eq!(cache.get(&side, &key("a")).unwrap().unwrap().hash, None);
    }

    #[test]
    fn test_sides_and_hosts_are_isolated() {
        let cache = HashCache::in_memory().unwrap();
        cache.upsert_observation(&Side::Local, &key("a"), 1, 1, 10).unwrap();
        cache.upsert_observation(&Side::remote("one"), &key("a"), 1, 1, 10).unwrap();

        assert_eq!(cache.count(&Side::Local, &roots(), ALGO).unwrap(), 1);
        assert_eq!(cache.count(&Side::remote("one"), &roots(), ALGO).unwrap(), 1);
        assert_eq!(cache.count(&Side::remote("two"), &roots(), ALGO).unwrap(), 0);
        assert_eq!(cache.count(&Side::Local, &roots(), HashAlgorithm::Blake3).unwrap(), 0);
    }

    #[test]
    fn test_record_hash_missing_key() {
        let cache = HashCache::in_memory().unwrap();
        assert!(!cache.record_hash(&Side::Local, &key("nope"), "h", 1).unwrap());
    }

    #[test]
    fn test_select_stale_predicate() {
        let cache = HashCache::in_memory().unwrap();
        let side = Side::remote("srv");

        cache.upsert_observation(&side, &key("fresh"), 1, 100, 500).unwrap();
        cache.record_hash(&side, &key("fresh"), "h", 500).unwrap();
        cache.upsert_observation(&side, &key("unhashed"), 1, 100, 500).unwrap();
        // Hashed before its own mtime, e.g. clock skew on the remote.
        cache.upsert_observation(&side, &key("old"), 1, 900, 500).unwrap();
        cache.record_hash(&side, &key("old"), "h", 800).unwrap();

        let stale: Vec<_> = cache
            .select_stale(&side, &roots(), ALGO)
            .unwrap()
            .into_iter()
            .map(|r| r.rel)
            .collect();
        assert_eq!(stale, vec!["old", "unhashed"]);
    }

    #[test]
    fn test_query_hashed_round_scoped() {
        let cache = HashCache::in_memory().unwrap();
        let side = Side::Local;

        cache.upsert_observation(&side, &key("earlier"), 1, 1, 100).unwrap();
        cache.record_hash(&side, &key("earlier"), "h1", 100).unwrap();
        cache.upsert_observation(&side, &key("now"), 1, 1, 200).unwrap();
        cache.record_hash(&side, &key("now"), "h2", 200).unwrap();
        cache.upsert_observation(&side, &key("nohash"), 1, 1, 200).unwrap();

        let all = cache.query_hashed(&side, &roots(), ALGO, None).unwrap();
        assert_eq!(all.len(), 2);

        let scoped = cache.query_hashed(&side, &roots(), ALGO, Some(200)).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].rel, "now");
    }

    #[test]
    fn test_scope_filters_roots() {
        let cache = HashCache::in_memory().unwrap();
        let side = Side::remote("srv");
        cache
            .upsert_observation(&side, &CacheKey::new("/a", "x", ALGO), 1, 1, 1)
            .unwrap();
        cache
            .upsert_observation(&side, &CacheKey::new("/b", "x", ALGO), 1, 1, 1)
            .unwrap();

        assert_eq!(cache.list_records(&side, &["/a".to_string()], ALGO).unwrap().len(), 1);
        assert_eq!(
            cache
                .list_records(&side, &["/a".to_string(), "/b".to_string()], ALGO)
                .unwrap()
                .len(),
            2
        );
        assert!(cache.list_records(&side, &[], ALGO).unwrap().is_empty());
    }

    #[test]
    fn test_record_verification() {
        let cache = HashCache::in_memory().unwrap();
        let side = Side::Local;
        cache.upsert_observation(&side, &key("a"), 1, 1, 10).unwrap();
        cache.record_hash(&side, &key("a"), "old", 10).unwrap();

        cache.record_verification(&side, &key("a"), Some("new"), 50).unwrap();
        let rec = cache.get(&side, &key("a")).unwrap().unwrap();
        assert_eq!(rec.hash.as_deref(), Some("new"));
        assert_eq!(rec.last_hashed, Some(50));
        assert_eq!(rec.last_observed, 50);

        cache.record_verification(&side, &key("a"), None, 60).unwrap();
        let rec = cache.get(&side, &key("a")).unwrap().unwrap();
        assert!(rec.hash.is_none());
        assert!(rec.needs_hash());
    }

    #[test]
    fn test_prune_both_sides() {
        let cache = HashCache::in_memory().unwrap();
        cache.upsert_observation(&Side::Local, &key("old"), 1, 1, 100).unwrap();
        cache.upsert_observation(&Side::Local, &key("new"), 1, 1, 1000).unwrap();
        cache.upsert_observation(&Side::remote("srv"), &key("old"), 1, 1, 100).unwrap();

        let stats = cache.prune(500, 1000).unwrap();
        assert_eq!(stats, PruneStats { local: 1, remote: 1 });
        assert!(cache.get(&Side::Local, &key("new")).unwrap().is_some());
        assert!(cache.get(&Side::Local, &key("old")).unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let cache = HashCache::in_memory().unwrap();
        cache.upsert_observation(&Side::Local, &key("a"), 1, 1, 1).unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.count(&Side::Local, &roots(), ALGO).unwrap(), 0);
    }
}
