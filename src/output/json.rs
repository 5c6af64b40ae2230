//! Structured JSON run log for one merge execution.
//!
//! The log is written twice: once before any copy starts (every entry
//! `pending`) and once after the last planned path has an outcome. A crash
//! in between leaves the intent on disk.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "hashes": [
//!     {
//!       "hash": "af1349b9...",
//!       "duplicates": [
//!         {
//!           "path": "a/b.txt",
//!           "status": "copied",
//!           "source_alias": "data",
//!           "origin_root": "/srv/data",
//!           "src_remote": "/srv/data/a/b.txt",
//!           "dest": "a/b.txt",
//!           "bytes": 10
//!         }
//!       ]
//!     }
//!   ],
//!   "summary": {
//!     "files_by_status": { "copied": 1 },
//!     "bytes_by_status": { "copied": 10 }
//!   },
//!   "meta": { "run_id": "20250810-123005", "...": "..." }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sysinfo::Disks;

use crate::merge::{MergeReport, OutcomeRecord, OutcomeStatus};
use crate::planner::Plan;
use crate::remote::join_remote;

/// Errors that can occur while persisting a run log.
#[derive(thiserror::Error, Debug)]
pub enum RunLogError {
    /// I/O error creating or writing the log.
    #[error("Failed to write run log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Target filesystem usage at the time the log was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsCapacity {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// Capacity of the filesystem holding `path`, zeros if it cannot be found.
#[must_use]
pub fn capacity_of(path: &Path) -> FsCapacity {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| FsCapacity {
            total: disk.total_space(),
            used: disk.total_space().saturating_sub(disk.available_space()),
            free: disk.available_space(),
        })
        .unwrap_or_default()
}

/// Metadata block of a run log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub started_at: String,
    pub source_host: String,
    pub source_roots: Vec<String>,
    pub target_root: String,
    pub use_merge_subroot: bool,
    pub dest_base: String,
    pub run_id: String,
    pub planned_files: u64,
    pub planned_bytes: u64,
    pub target_fs_total_bytes: u64,
    pub target_fs_used_bytes: u64,
    pub target_fs_free_bytes: u64,
    pub on_conflict: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied_files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_bytes_per_second: Option<f64>,
}

impl RunMeta {
    /// Records the target filesystem capacity.
    pub fn set_capacity(&mut self, capacity: FsCapacity) {
        self.target_fs_total_bytes = capacity.total;
        self.target_fs_used_bytes = capacity.used;
        self.target_fs_free_bytes = capacity.free;
    }

    fn apply_report(&mut self, report: &MergeReport) {
        let t = &report.totals;
        self.finished_at = Some(report.finished_at.to_rfc3339());
        self.cancelled = report.cancelled.then_some(true);
        self.interrupted = report.interrupted.then_some(true);
        self.copied_files = Some(t.copied_files);
        self.copied_bytes = Some(t.copied_bytes);
        self.failed_files = Some(t.failed_files);
        self.failed_bytes = Some(t.failed_bytes);
        self.conflict_files = Some(t.conflict_files);
        self.conflict_bytes = Some(t.conflict_bytes);
        self.duration_seconds = Some(report.duration_secs);
        self.throughput_bytes_per_second = Some(report.throughput_bps);
    }
}

/// One planned path in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub path: String,
    pub status: OutcomeStatus,
    pub source_alias: String,
    pub origin_root: String,
    pub src_remote: String,
    pub dest: String,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All planned paths sharing one content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashGroup {
    pub hash: String,
    pub duplicates: Vec<LogEntry>,
}

/// Counts grouped by status label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub files_by_status: BTreeMap<String, u64>,
    pub bytes_by_status: BTreeMap<String, u64>,
}

/// The full document written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogDocument {
    pub hashes: Vec<HashGroup>,
    pub summary: StatusSummary,
    pub meta: RunMeta,
}

/// `merge_<run_id>.json` inside `logs_dir`.
#[must_use]
pub fn run_log_path(logs_dir: &Path, run_id: &str) -> PathBuf {
    logs_dir.join(format!("merge_{run_id}.json"))
}

/// Run log for one merge execution.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    dest_base: PathBuf,
    meta: RunMeta,
}

impl RunLog {
    #[must_use]
    pub fn new(path: PathBuf, dest_base: PathBuf, meta: RunMeta) -> Self {
        Self {
            path,
            dest_base,
            meta,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    /// Builds the document; entries without an outcome are `pending`.
    #[must_use]
    pub fn document(&self, plan: &Plan, outcomes: &[OutcomeRecord]) -> RunLogDocument {
        let by_path: HashMap<&str, &OutcomeRecord> = outcomes
            .iter()
            .map(|r| (r.planned.combined_rel.as_str(), r))
            .collect();
        let mut summary = StatusSummary::default();

        let hashes = plan
            .entries
            .iter()
            .map(|(hash, paths)| {
                let duplicates = paths
                    .iter()
                    .map(|planned| {
                        let entry = match by_path.get(planned.combined_rel.as_str()) {
                            Some(record) => LogEntry {
                                path: planned.combined_rel.clone(),
                                status: record.outcome.status(),
                                source_alias: planned.origin.alias.clone(),
                                origin_root: planned.origin.root.clone(),
                                src_remote: record.src_remote.clone(),
                                dest: record.outcome.dest().to_string(),
                                bytes: planned.size,
                                note: record.outcome.note().map(str::to_string),
                                error: record.outcome.error().map(str::to_string),
                            },
                            None => LogEntry {
                                path: planned.combined_rel.clone(),
                                status: OutcomeStatus::Pending,
                                source_alias: planned.origin.alias.clone(),
                                origin_root: planned.origin.root.clone(),
                                src_remote: join_remote(&planned.origin.root, &planned.origin.rel),
                                dest: self.dest_base.join(&planned.combined_rel).to_string_lossy().into_owned(),
                                bytes: planned.size,
                                note: None,
                                error: None,
                            },
                        };
                        *summary
                            .files_by_status
                            .entry(entry.status.as_str().to_string())
                            .or_default() += 1;
                        *summary
                            .bytes_by_status
                            .entry(entry.status.as_str().to_string())
                            .or_default() += entry.bytes;
                        entry
                    })
                    .collect();
                HashGroup {
                    hash: hash.clone(),
                    duplicates,
                }
            })
            .collect();

        RunLogDocument {
            hashes,
            summary,
            meta: self.meta.clone(),
        }
    }

    /// Writes the plan with every entry pending.
    ///
    /// # Errors
    ///
    /// Returns [`RunLogError`] if the file cannot be written.
    pub fn write_pending(&self, plan: &Plan) -> Result<(), RunLogError> {
        self.write(&self.document(plan, &[]))
    }

    /// Folds the report into the metadata and writes the final log.
    ///
    /// # Errors
    ///
    /// Returns [`RunLogError`] if the file cannot be written.
    pub fn write_final(&mut self, plan: &Plan, report: &MergeReport) -> Result<(), RunLogError> {
        self.meta.apply_report(report);
        self.write(&self.document(plan, &report.records))
    }

    fn write(&self, document: &RunLogDocument) -> Result<(), RunLogError> {
        let io_err = |source| RunLogError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, document)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        log::info!("Run log saved at {}", self.path.display());
        Ok(())
    }
}

/// Reads a run log back from disk.
///
/// # Errors
///
/// Returns [`RunLogError`] if the file is missing or not valid JSON.
pub fn load_run_log(path: &Path) -> Result<RunLogDocument, RunLogError> {
    let data = std::fs::read(path).map_err(|source| RunLogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&data)?)
}
