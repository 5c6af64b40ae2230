//! Local observer: walk the target tree and keep its cache side current.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::cache::{CacheError, CacheKey, HashCache, Side};
use crate::progress::{ProgressCallback, PHASE_LOCAL_HASH};
use crate::scanner::{FileEntry, HashAlgorithm, Hasher, Walker, WalkerConfig};

/// Counters from one local refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalRefreshStats {
    /// Files seen by the walk.
    pub observed: usize,
    /// Files that were new, changed, or still unhashed.
    pub dirty: usize,
    /// Dirty files hashed successfully.
    pub hashed: usize,
    /// Dirty files whose hash could not be computed.
    pub hash_failures: usize,
    /// Entries the walk could not read.
    pub scan_errors: usize,
}

/// Walks the target tree once per cycle.
pub struct LocalObserver<'a> {
    cache: &'a HashCache,
    root: PathBuf,
    root_key: String,
    algo: HashAlgorithm,
    io_threads: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl<'a> LocalObserver<'a> {
    #[must_use]
    pub fn new(cache: &'a HashCache, root: &Path, algo: HashAlgorithm) -> Self {
        Self {
            cache,
            root: root.to_path_buf(),
            root_key: root.to_string_lossy().into_owned(),
            algo,
            io_threads: 4,
            shutdown_flag: None,
        }
    }

    /// Number of threads hashing dirty files.
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Cache root under which local records are stored.
    #[must_use]
    pub fn root_key(&self) -> &str {
        &self.root_key
    }

    fn key(&self, rel: &str) -> CacheKey {
        CacheKey::new(self.root_key.clone(), rel, self.algo)
    }

    /// Observes every file below the root and hashes the dirty ones.
    ///
    /// Every observation carries `now` as its last-observed time. A file
    /// whose hash fails keeps a null hash and is retried next cycle.
    ///
    /// # Errors
    ///
    /// Only cache failures abort the refresh.
    pub fn refresh(
        &self,
        now: i64,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<LocalRefreshStats, CacheError> {
        let mut stats = LocalRefreshStats::default();
        let mut walker = Walker::new(&self.root, WalkerConfig::default());
        if let Some(flag) = &self.shutdown_flag {
            walker = walker.with_shutdown_flag(Arc::clone(flag));
        }

        let mut dirty: Vec<FileEntry> = Vec::new();
        for entry in walker.walk() {
            let file = match entry {
                Ok(file) => file,
                Err(_) => {
                    stats.scan_errors += 1;
                    continue;
                }
            };
            stats.observed += 1;
            let observation =
                self.cache
                    .upsert_observation(&Side::Local, &self.key(&file.rel), file.size, file.mtime, now)?;
            if observation.is_dirty() {
                dirty.push(file);
            }
        }
        stats.dirty = dirty.len();

        if dirty.is_empty() {
            return Ok(stats);
        }

        for (file, result) in self.hash_all(&dirty, progress) {
            match result {
                Ok(hash) => {
                    self.cache
                        .record_hash(&Side::Local, &self.key(&file.rel), &hash, now)?;
                    stats.hashed += 1;
                }
                Err(e) => {
                    log::warn!("[local-hash] {}: {}", file.path.display(), e);
                    stats.hash_failures += 1;
                }
            }
        }

        log::info!(
            "Local refresh: {} observed, {} dirty, {} hashed, {} hash failures",
            stats.observed,
            stats.dirty,
            stats.hashed,
            stats.hash_failures
        );
        Ok(stats)
    }

    /// Hashes `files` on a bounded pool, preserving input order.
    fn hash_all<'f>(
        &self,
        files: &'f [FileEntry],
        progress: Option<&dyn ProgressCallback>,
    ) -> Vec<(&'f FileEntry, Result<String, crate::scanner::HashError>)> {
        let hasher = Hasher::new(self.algo);
        let done = AtomicUsize::new(0);
        if let Some(p) = progress {
            p.on_phase_start(PHASE_LOCAL_HASH, files.len());
        }

        let work = || {
            files
                .par_iter()
                .map(|file| {
                    let result = hasher.hash_file(&file.path);
                    if let Some(p) = progress {
                        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                        p.on_progress(n, &file.rel);
                        p.on_item_completed(file.size);
                    }
                    (file, result)
                })
                .collect::<Vec<_>>()
        };

        let results = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.io_threads)
            .build()
        {
            Ok(pool) => pool.install(work),
            Err(e) => {
                log::debug!("Falling back to the global rayon pool: {e}");
                work()
            }
        };

        if let Some(p) = progress {
            p.on_phase_end(PHASE_LOCAL_HASH);
        }
        results
    }
}
