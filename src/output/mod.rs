//! Artifacts produced by a cycle.
//!
//! - [`json`]: the structured run log written around each merge
//! - [`metrics`]: the Prometheus textfile snapshot
//! - [`report`]: the human-readable alert text

pub mod json;
pub mod metrics;
pub mod report;

use crate::merge::ConflictPolicy;

pub use json::{capacity_of, load_run_log, run_log_path, RunLog, RunLogDocument, RunLogError, RunMeta};
pub use metrics::{MetricsSnapshot, MetricsWriter};
pub use report::{AlertReport, ReportFigures};

/// Labels shared by every artifact of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub run_id: String,
    pub source_host: String,
    pub source_roots: Vec<String>,
    pub source_aliases: Vec<String>,
    pub target_root: String,
    pub use_merge_subroot: bool,
    pub on_conflict: ConflictPolicy,
}
