//! Remote hash budgeter.
//!
//! Ranks stale remote records, greedily selects as many as fit in the
//! cycle's file and byte budgets, and hashes the selection with one batched
//! remote invocation per root. The same batching primitive serves the
//! scrub in [`HashMode::Verify`].

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, CacheRecord, HashCache, Side};
use crate::remote::RemoteChannel;
use crate::scanner::HashAlgorithm;

use super::RefreshError;

/// Secondary ranking metric, applied in descending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryKey {
    /// Largest files first.
    #[default]
    Size,
    /// Most recently modified files first.
    Mtime,
}

/// Per-cycle remote hashing budget. A zero limit is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashBudget {
    pub max_files: usize,
    pub max_bytes: u64,
    pub secondary: SecondaryKey,
}

/// How batch results are written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMode {
    /// Normal refresh: sets hash and last-hashed.
    Refresh,
    /// Scrub re-verification: also advances last-observed.
    Verify,
}

/// Counters from one budgeted hashing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetStats {
    pub candidates: usize,
    pub selected: usize,
    pub selected_bytes: u64,
    pub hashed: usize,
}

/// 0 for records whose hash is missing or older than their mtime.
fn stale_rank(record: &CacheRecord) -> u8 {
    match record.last_hashed {
        Some(hashed) if hashed >= record.mtime && record.hash.is_some() => 1,
        _ => 0,
    }
}

fn secondary_value(record: &CacheRecord, key: SecondaryKey) -> i128 {
    match key {
        SecondaryKey::Size => i128::from(record.size),
        SecondaryKey::Mtime => i128::from(record.mtime),
    }
}

fn rank(a: &CacheRecord, b: &CacheRecord, key: SecondaryKey) -> Ordering {
    stale_rank(a)
        .cmp(&stale_rank(b))
        .then_with(|| Reverse(secondary_value(a, key)).cmp(&Reverse(secondary_value(b, key))))
        .then_with(|| a.root.cmp(&b.root))
        .then_with(|| a.rel.cmp(&b.rel))
}

/// Ranks `candidates` and returns the greedy prefix that fits `budget`.
///
/// Selection stops at the first record that would push either running total
/// past its limit; later, smaller records are not considered.
#[must_use]
pub fn select_within_budget(mut candidates: Vec<CacheRecord>, budget: &HashBudget) -> Vec<CacheRecord> {
    candidates.sort_by(|a, b| rank(a, b, budget.secondary));

    let mut total_bytes: u64 = 0;
    let mut selected = Vec::new();
    for record in candidates {
        if budget.max_files > 0 && selected.len() >= budget.max_files {
            break;
        }
        if budget.max_bytes > 0 && total_bytes.saturating_add(record.size) > budget.max_bytes {
            break;
        }
        total_bytes = total_bytes.saturating_add(record.size);
        selected.push(record);
    }
    selected
}

/// Hashes `entries` on the remote, one batch per root, and stores results.
///
/// Batches are independent: a failing root is logged and skipped. Output
/// lines for paths that were not requested are ignored. Returns the number
/// of records updated.
///
/// # Errors
///
/// Returns [`RefreshError`] on connection loss or cache failure.
pub fn hash_remote_entries<C: RemoteChannel + ?Sized>(
    cache: &HashCache,
    channel: &C,
    algo: HashAlgorithm,
    entries: &[CacheRecord],
    workers: usize,
    mode: HashMode,
    now: i64,
) -> Result<usize, RefreshError> {
    let side = Side::remote(channel.host());
    let mut by_root: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for entry in entries {
        by_root.entry(entry.root.as_str()).or_default().push(entry.rel.clone());
    }

    let mut hashed = 0;
    for (root, rels) in by_root {
        let batch = match channel.hash_batch(root, &rels, algo, workers) {
            Ok(batch) => batch,
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => {
                log::warn!("[remote-hash:{root}] batch failed: {e}");
                continue;
            }
        };
        if !batch.stderr.is_empty() {
            log::warn!("[remote-hash:{root}] {}", batch.stderr);
        }

        let requested: HashSet<&str> = rels.iter().map(String::as_str).collect();
        for line in &batch.lines {
            if !requested.contains(line.rel.as_str()) {
                log::debug!("[remote-hash:{root}] ignoring unrequested path {}", line.rel);
                continue;
            }
            let key = CacheKey::new(root, line.rel.as_str(), algo);
            let updated = match mode {
                HashMode::Refresh => cache.record_hash(&side, &key, &line.hash, now)?,
                HashMode::Verify => cache.record_verification(&side, &key, Some(&line.hash), now)?,
            };
            if updated {
                hashed += 1;
            }
        }
    }
    Ok(hashed)
}

/// Selects stale remote records within `budget` and hashes them.
///
/// # Errors
///
/// Returns [`RefreshError`] on connection loss or cache failure.
pub fn run_budgeted_hashing<C: RemoteChannel + ?Sized>(
    cache: &HashCache,
    channel: &C,
    roots: &[String],
    algo: HashAlgorithm,
    budget: &HashBudget,
    workers: usize,
    now: i64,
) -> Result<BudgetStats, RefreshError> {
    let side = Side::remote(channel.host());
    let candidates = cache.select_stale(&side, roots, algo)?;
    let mut stats = BudgetStats {
        candidates: candidates.len(),
        ..BudgetStats::default()
    };
    if candidates.is_empty() {
        return Ok(stats);
    }

    let selected = select_within_budget(candidates, budget);
    stats.selected = selected.len();
    stats.selected_bytes = selected.iter().map(|r| r.size).sum();
    log::info!(
        "Remote hash budget: {} of {} stale records selected ({} bytes)",
        stats.selected,
        stats.candidates,
        stats.selected_bytes
    );

    stats.hashed = hash_remote_entries(cache, channel, algo, &selected, workers, HashMode::Refresh, now)?;
    if stats.hashed > 0 {
        log::info!("Remote hashed this cycle: {} files", stats.hashed);
    }
    Ok(stats)
}
