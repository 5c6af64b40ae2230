//! Remote metadata refresh: list every root, observe, never hash.

use crate::cache::{CacheKey, HashCache, Side};
use crate::remote::RemoteChannel;
use crate::scanner::HashAlgorithm;

use super::RefreshError;

/// Counters from one remote metadata refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteRefreshStats {
    pub roots_listed: usize,
    pub roots_failed: usize,
    pub observed: usize,
    /// Records whose hash was cleared or never existed.
    pub dirty: usize,
}

/// Lists each remote root and records `(size, mtime, now)` for every file.
///
/// A root whose listing command fails is logged and skipped; a lost
/// connection aborts the refresh.
///
/// # Errors
///
/// Returns [`RefreshError`] on connection loss or cache failure.
pub fn refresh_remote_metadata<C: RemoteChannel + ?Sized>(
    cache: &HashCache,
    channel: &C,
    roots: &[String],
    algo: HashAlgorithm,
    now: i64,
) -> Result<RemoteRefreshStats, RefreshError> {
    let side = Side::remote(channel.host());
    let mut stats = RemoteRefreshStats::default();

    for root in roots {
        let files = match channel.list_files(root) {
            Ok(files) => files,
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => {
                log::warn!("[remote-meta:{root}] listing failed: {e}");
                stats.roots_failed += 1;
                continue;
            }
        };
        log::info!("[remote-meta] {root}: {} files", files.len());
        stats.roots_listed += 1;

        for file in files {
            let key = CacheKey::new(root.as_str(), file.rel, algo);
            let observation = cache.upsert_observation(&side, &key, file.size, file.mtime, now)?;
            stats.observed += 1;
            if observation.is_dirty() {
                stats.dirty += 1;
            }
        }
    }
    Ok(stats)
}
