//! Per-file merge outcomes and their aggregate counters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::planner::PlannedPath;

/// Status label used in run logs. `Pending` marks planned entries that
/// have no outcome yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Copied,
    CopiedOverwrite,
    ConflictVersioned,
    SkippedConflict,
    Failed,
    FailedMissingRemote,
}

impl OutcomeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Copied => "copied",
            Self::CopiedOverwrite => "copied_overwrite",
            Self::ConflictVersioned => "conflict_versioned",
            Self::SkippedConflict => "skipped_conflict",
            Self::Failed => "failed",
            Self::FailedMissingRemote => "failed_missing_remote",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one planned path.
///
/// `dest` is always relative to the merge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    Copied { dest: String },
    CopiedOverwrite { dest: String },
    /// Copied to `dest`, an alternate name next to the existing file.
    ConflictVersioned { dest: String },
    SkippedConflict { dest: String },
    Failed { dest: String, error: String },
    FailedMissingRemote { dest: String, error: String },
}

impl MergeOutcome {
    #[must_use]
    pub fn status(&self) -> OutcomeStatus {
        match self {
            Self::Copied { .. } => OutcomeStatus::Copied,
            Self::CopiedOverwrite { .. } => OutcomeStatus::CopiedOverwrite,
            Self::ConflictVersioned { .. } => OutcomeStatus::ConflictVersioned,
            Self::SkippedConflict { .. } => OutcomeStatus::SkippedConflict,
            Self::Failed { .. } => OutcomeStatus::Failed,
            Self::FailedMissingRemote { .. } => OutcomeStatus::FailedMissingRemote,
        }
    }

    #[must_use]
    pub fn dest(&self) -> &str {
        match self {
            Self::Copied { dest }
            | Self::CopiedOverwrite { dest }
            | Self::ConflictVersioned { dest }
            | Self::SkippedConflict { dest }
            | Self::Failed { dest, .. }
            | Self::FailedMissingRemote { dest, .. } => dest,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } | Self::FailedMissingRemote { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Free-form annotation for the run log.
    #[must_use]
    pub fn note(&self) -> Option<&'static str> {
        match self {
            Self::ConflictVersioned { .. } => Some("created versioned copy due to conflict"),
            _ => None,
        }
    }

    /// Whether data was written to the target.
    #[must_use]
    pub fn wrote_file(&self) -> bool {
        matches!(
            self,
            Self::Copied { .. } | Self::CopiedOverwrite { .. } | Self::ConflictVersioned { .. }
        )
    }
}

/// Outcome of one planned path together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub hash: String,
    pub planned: PlannedPath,
    /// Full source path on the remote host.
    pub src_remote: String,
    pub outcome: MergeOutcome,
    /// Bytes actually written to the target.
    pub transferred: u64,
}

impl OutcomeRecord {
    /// Planned size, used for all byte counters.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.planned.size
    }
}

/// File and byte counts per outcome bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeTotals {
    pub copied_files: u64,
    pub copied_bytes: u64,
    pub failed_files: u64,
    pub failed_bytes: u64,
    pub conflict_files: u64,
    pub conflict_bytes: u64,
}

impl MergeTotals {
    /// Adds one outcome of `bytes` to its bucket.
    pub fn add(&mut self, outcome: &MergeOutcome, bytes: u64) {
        match outcome {
            MergeOutcome::Copied { .. } | MergeOutcome::CopiedOverwrite { .. } => {
                self.copied_files += 1;
                self.copied_bytes += bytes;
            }
            MergeOutcome::ConflictVersioned { .. } | MergeOutcome::SkippedConflict { .. } => {
                self.conflict_files += 1;
                self.conflict_bytes += bytes;
            }
            MergeOutcome::Failed { .. } | MergeOutcome::FailedMissingRemote { .. } => {
                self.failed_files += 1;
                self.failed_bytes += bytes;
            }
        }
    }

    /// Whether anything was copied, failed or conflicted.
    #[must_use]
    pub fn has_activity(&self) -> bool {
        self.copied_files > 0 || self.failed_files > 0 || self.conflict_files > 0
    }
}
