//! Daily integrity scrub.
//!
//! Picks a uniform random sample of cache records on each side and rehashes
//! them regardless of staleness, catching corruption that leaves size and
//! mtime untouched. The remote side goes through the same batched hashing
//! used by the budgeter.

use std::path::Path;

use chrono::{DateTime, Local, NaiveDate, Timelike};
use rand::seq::index;
use rand::Rng;

use crate::cache::{CacheError, CacheRecord, HashCache, Side};
use crate::config::ScrubConfig;
use crate::refresh::{hash_remote_entries, HashMode, RefreshError};
use crate::remote::RemoteChannel;
use crate::scanner::{HashAlgorithm, Hasher};

/// Counters from one scrub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrubStats {
    pub local_sampled: usize,
    pub local_verified: usize,
    /// Sampled local files that could not be read; their hash is cleared.
    pub local_failed: usize,
    pub remote_sampled: usize,
    pub remote_verified: usize,
}

/// Runs at most once per calendar day at a fixed local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrubSchedule {
    hour: u32,
    minute: u32,
    last_day: Option<NaiveDate>,
}

impl ScrubSchedule {
    #[must_use]
    pub fn new(hour: u32, minute: u32) -> Self {
        Self {
            hour,
            minute,
            last_day: None,
        }
    }

    /// True during the configured minute unless a scrub already ran today.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        now.hour() == self.hour
            && now.minute() == self.minute
            && self.last_day != Some(now.date_naive())
    }

    pub fn mark_ran(&mut self, now: DateTime<Local>) {
        self.last_day = Some(now.date_naive());
    }
}

/// Number of records to sample out of `count`.
///
/// A positive `limit` caps the sample; otherwise `percent` of the population
/// is taken, at least one record.
#[must_use]
pub fn sample_size(count: usize, limit: usize, percent: f64) -> usize {
    if count == 0 {
        return 0;
    }
    if limit > 0 {
        return limit.min(count);
    }
    let share = (count as f64 * percent).floor() as usize;
    share.clamp(1, count)
}

/// Uniform sample without replacement.
pub fn pick_sample<R: Rng + ?Sized>(
    records: Vec<CacheRecord>,
    limit: usize,
    percent: f64,
    rng: &mut R,
) -> Vec<CacheRecord> {
    let n = sample_size(records.len(), limit, percent);
    if n == records.len() {
        return records;
    }
    let mut picked: Vec<usize> = index::sample(rng, records.len(), n).into_vec();
    picked.sort_unstable();

    let mut records: Vec<Option<CacheRecord>> = records.into_iter().map(Some).collect();
    picked.into_iter().filter_map(|i| records[i].take()).collect()
}

/// Rehashes a sample of local records below `root`.
///
/// # Errors
///
/// Only cache failures abort the scrub.
pub fn scrub_local<R: Rng + ?Sized>(
    cache: &HashCache,
    root: &Path,
    algo: HashAlgorithm,
    config: &ScrubConfig,
    now: i64,
    rng: &mut R,
) -> Result<(usize, usize, usize), CacheError> {
    let roots = vec![root.to_string_lossy().into_owned()];
    let records = cache.list_records(&Side::Local, &roots, algo)?;
    let sample = pick_sample(records, config.local_limit, config.local_percent, rng);
    let hasher = Hasher::new(algo);

    let mut verified = 0;
    let mut failed = 0;
    for record in &sample {
        let path = root.join(&record.rel);
        let hash = match hasher.hash_file(&path) {
            Ok(hash) => {
                if record.hash.as_deref().is_some_and(|old| old != hash) {
                    log::warn!("[scrub] local hash drift: {}", record.rel);
                }
                verified += 1;
                Some(hash)
            }
            Err(e) => {
                log::warn!("[scrub] {}: {}", path.display(), e);
                failed += 1;
                None
            }
        };
        cache.record_verification(&Side::Local, &record.key(), hash.as_deref(), now)?;
    }
    Ok((sample.len(), verified, failed))
}

/// Rehashes a sample of remote records on `channel`'s host.
///
/// # Errors
///
/// Returns [`RefreshError`] on connection loss or cache failure.
#[allow(clippy::too_many_arguments)]
pub fn scrub_remote<C: RemoteChannel + ?Sized, R: Rng + ?Sized>(
    cache: &HashCache,
    channel: &C,
    roots: &[String],
    algo: HashAlgorithm,
    config: &ScrubConfig,
    workers: usize,
    now: i64,
    rng: &mut R,
) -> Result<(usize, usize), RefreshError> {
    let side = Side::remote(channel.host());
    let records = cache.list_records(&side, roots, algo)?;
    let sample = pick_sample(records, config.remote_limit, config.remote_percent, rng);
    if sample.is_empty() {
        return Ok((0, 0));
    }
    let verified = hash_remote_entries(cache, channel, algo, &sample, workers, HashMode::Verify, now)?;
    Ok((sample.len(), verified))
}

/// Scrubs both sides.
///
/// # Errors
///
/// Returns [`RefreshError`] on connection loss or cache failure.
#[allow(clippy::too_many_arguments)]
pub fn run_scrub<C: RemoteChannel + ?Sized, R: Rng + ?Sized>(
    cache: &HashCache,
    channel: &C,
    local_root: &Path,
    remote_roots: &[String],
    algo: HashAlgorithm,
    config: &ScrubConfig,
    workers: usize,
    now: i64,
    rng: &mut R,
) -> Result<ScrubStats, RefreshError> {
    log::info!("Starting integrity scrub ({algo})");
    let (local_sampled, local_verified, local_failed) =
        scrub_local(cache, local_root, algo, config, now, rng)?;
    let (remote_sampled, remote_verified) =
        scrub_remote(cache, channel, remote_roots, algo, config, workers, now, rng)?;

    let stats = ScrubStats {
        local_sampled,
        local_verified,
        local_failed,
        remote_sampled,
        remote_verified,
    };
    log::info!(
        "Scrub done: local rehashed {}/{}, remote rehashed {}/{}",
        stats.local_verified,
        stats.local_sampled,
        stats.remote_verified,
        stats.remote_sampled
    );
    Ok(stats)
}
