//! Reconciliation planner.
//!
//! Compares the content hashes present on each side and plans a copy for
//! every remote path whose content is missing locally. Planning is a pure
//! computation over cached records: it performs no I/O of its own and
//! produces the same [`Plan`] for the same cache contents.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::cache::{CacheRecord, CacheResult, HashCache, Side};
use crate::scanner::HashAlgorithm;

/// A configured remote root and the alias it is merged under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    pub root: String,
    pub alias: String,
}

/// Where a planned path comes from on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub root: String,
    pub alias: String,
    pub rel: String,
}

/// One remote path planned for copying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPath {
    /// Destination path relative to the merge base.
    pub combined_rel: String,
    pub size: u64,
    /// Remote modification time as last observed.
    pub mtime: i64,
    pub origin: Origin,
}

/// Planned file and byte counts for one destination subfolder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FolderTally {
    pub files: u64,
    pub bytes: u64,
}

/// Content present on the remote but absent locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Missing content hash to every remote path carrying it.
    pub entries: BTreeMap<String, Vec<PlannedPath>>,
    /// Keyed by the parent directory of each combined path (`""` at top).
    pub per_subfolder: BTreeMap<String, FolderTally>,
    pub planned_files: u64,
    pub planned_bytes: u64,
}

impl Plan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hashes present only on the remote.
    pub fn missing_hashes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Every planned combined path.
    #[must_use]
    pub fn combined_paths(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .flatten()
            .map(|p| p.combined_rel.clone())
            .collect()
    }

    /// `(hash, path)` pairs in deterministic order.
    pub fn iter_paths(&self) -> impl Iterator<Item = (&str, &PlannedPath)> {
        self.entries
            .iter()
            .flat_map(|(hash, paths)| paths.iter().map(move |p| (hash.as_str(), p)))
    }
}

/// Destination path of `rel` from `source`.
///
/// With several roots every path is prefixed by its root's alias so the
/// flattened namespace cannot collide. An empty alias adds no component.
#[must_use]
pub fn combined_rel(source: &SourceRoot, rel: &str, multi_root: bool) -> String {
    let alias = source.alias.trim_matches('/');
    if multi_root && !alias.is_empty() {
        format!("{alias}/{rel}")
    } else {
        rel.to_string()
    }
}

fn parent_dir(rel: &str) -> &str {
    rel.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Builds the plan from already-scoped hashed records.
///
/// Records whose root is not one of `sources` are ignored.
#[must_use]
pub fn compute_plan(local: &[CacheRecord], remote: &[CacheRecord], sources: &[SourceRoot]) -> Plan {
    let local_hashes: HashSet<&str> = local.iter().filter_map(|r| r.hash.as_deref()).collect();
    let multi_root = sources.len() > 1;
    let by_root: BTreeMap<&str, &SourceRoot> = sources.iter().map(|s| (s.root.as_str(), s)).collect();

    let mut plan = Plan::default();
    for record in remote {
        let Some(hash) = record.hash.as_deref() else {
            continue;
        };
        if local_hashes.contains(hash) {
            continue;
        }
        let Some(source) = by_root.get(record.root.as_str()) else {
            log::debug!("Ignoring record from unconfigured root {}", record.root);
            continue;
        };

        let combined = combined_rel(source, &record.rel, multi_root);
        let tally = plan.per_subfolder.entry(parent_dir(&combined).to_string()).or_default();
        tally.files += 1;
        tally.bytes += record.size;
        plan.planned_files += 1;
        plan.planned_bytes += record.size;

        plan.entries.entry(hash.to_string()).or_default().push(PlannedPath {
            combined_rel: combined,
            size: record.size,
            mtime: record.mtime,
            origin: Origin {
                root: source.root.clone(),
                alias: source.alias.clone(),
                rel: record.rel.clone(),
            },
        });
    }

    for paths in plan.entries.values_mut() {
        paths.sort_by(|a, b| a.combined_rel.cmp(&b.combined_rel));
    }
    plan
}

/// Reads both sides of the cache and plans the cycle.
pub struct Planner<'a> {
    cache: &'a HashCache,
    local_root: String,
    host: String,
    sources: &'a [SourceRoot],
    algo: HashAlgorithm,
}

impl<'a> Planner<'a> {
    #[must_use]
    pub fn new(
        cache: &'a HashCache,
        local_root: impl Into<String>,
        host: impl Into<String>,
        sources: &'a [SourceRoot],
        algo: HashAlgorithm,
    ) -> Self {
        Self {
            cache,
            local_root: local_root.into(),
            host: host.into(),
            sources,
            algo,
        }
    }

    /// Plans using only records observed at or after `min_last_observed`.
    ///
    /// # Errors
    ///
    /// Propagates cache read failures.
    pub fn plan(&self, min_last_observed: Option<i64>) -> CacheResult<Plan> {
        let local = self.cache.query_hashed(
            &Side::Local,
            std::slice::from_ref(&self.local_root),
            self.algo,
            min_last_observed,
        )?;
        let roots: Vec<String> = self.sources.iter().map(|s| s.root.clone()).collect();
        let remote = self.cache.query_hashed(
            &Side::remote(self.host.clone()),
            &roots,
            self.algo,
            min_last_observed,
        )?;

        let plan = compute_plan(&local, &remote, self.sources);
        log::info!(
            "Plan: {} local hashes, {} remote hashed paths, {} missing contents, {} files, {} bytes",
            local.len(),
            remote.len(),
            plan.entries.len(),
            plan.planned_files,
            plan.planned_bytes
        );
        Ok(plan)
    }
}
