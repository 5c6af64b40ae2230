//! Merge executor: copy every planned remote path into the target.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use filetime::FileTime;

use super::conflict::{versioned_path, ConflictPolicy};
use super::outcome::{MergeOutcome, MergeTotals, OutcomeRecord};
use crate::output::json::{RunLog, RunLogError};
use crate::planner::{Plan, PlannedPath};
use crate::progress::{ProgressCallback, PHASE_MERGE};
use crate::remote::{join_remote, RemoteChannel, RemoteError, RemoteStat};

/// Errors that abort a merge before or after the copy loop.
///
/// Per-file failures are outcomes, never errors.
#[derive(thiserror::Error, Debug)]
pub enum MergeError {
    #[error(transparent)]
    RunLog(#[from] RunLogError),

    #[error("Cannot create merge destination {path}: {source}")]
    DestBase {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Gate asked once before copying starts.
pub trait Confirm {
    /// Returns `true` to proceed with `plan` into `dest_base`.
    fn confirm(&self, plan: &Plan, dest_base: &Path) -> bool;
}

/// Always proceeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&self, _plan: &Plan, _dest_base: &Path) -> bool {
        true
    }
}

/// Asks on the terminal; only an explicit `yes` proceeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, plan: &Plan, dest_base: &Path) -> bool {
        eprintln!(
            "\nMerge {} files ({}) into:\n   {}",
            plan.planned_files,
            bytesize::ByteSize::b(plan.planned_bytes),
            dest_base.display()
        );
        eprint!("Type 'yes' to continue: ");
        let _ = io::stderr().flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => answer.trim().eq_ignore_ascii_case("yes"),
            Err(e) => {
                log::warn!("Could not read confirmation: {e}");
                false
            }
        }
    }
}

/// Result of one merge execution.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub records: Vec<OutcomeRecord>,
    pub totals: MergeTotals,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub duration_secs: f64,
    /// Copied bytes per second of wall time.
    pub throughput_bps: f64,
    /// The confirmation gate declined; nothing was copied.
    pub cancelled: bool,
    /// Shutdown was requested before every path was processed.
    pub interrupted: bool,
}

impl MergeReport {
    fn empty(cancelled: bool) -> Self {
        let now = Local::now();
        Self {
            records: Vec::new(),
            totals: MergeTotals::default(),
            started_at: now,
            finished_at: now,
            duration_secs: 0.0,
            throughput_bps: 0.0,
            cancelled,
            interrupted: false,
        }
    }
}

/// Copies planned files from a remote channel into `dest_base`.
pub struct MergeExecutor<'a, C: RemoteChannel + ?Sized> {
    channel: &'a C,
    dest_base: PathBuf,
    policy: ConflictPolicy,
    confirm: &'a dyn Confirm,
    progress: Option<&'a dyn ProgressCallback>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl<'a, C: RemoteChannel + ?Sized> MergeExecutor<'a, C> {
    #[must_use]
    pub fn new(channel: &'a C, dest_base: impl Into<PathBuf>, policy: ConflictPolicy) -> Self {
        Self {
            channel,
            dest_base: dest_base.into(),
            policy,
            confirm: &AutoConfirm,
            progress: None,
            shutdown_flag: None,
        }
    }

    #[must_use]
    pub fn with_confirm(mut self, confirm: &'a dyn Confirm) -> Self {
        self.confirm = confirm;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<&'a dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Writes the pending log, asks for confirmation, copies, and writes
    /// the final log.
    ///
    /// # Errors
    ///
    /// Fails only if the run log cannot be written or the destination base
    /// cannot be created.
    pub fn run(&self, plan: &Plan, log: &mut RunLog) -> Result<MergeReport, MergeError> {
        log.write_pending(plan)?;

        if !self.confirm.confirm(plan, &self.dest_base) {
            log::warn!("Merge cancelled; nothing copied");
            let report = MergeReport::empty(true);
            log.write_final(plan, &report)?;
            return Ok(report);
        }

        let report = self.execute(plan)?;
        log.write_final(plan, &report)?;
        Ok(report)
    }

    /// Processes every planned path in plan order.
    ///
    /// # Errors
    ///
    /// Fails only if the destination base cannot be created.
    pub fn execute(&self, plan: &Plan) -> Result<MergeReport, MergeError> {
        let started_at = Local::now();
        let clock = Instant::now();
        fs::create_dir_all(&self.dest_base).map_err(|source| MergeError::DestBase {
            path: self.dest_base.clone(),
            source,
        })?;

        if let Some(p) = self.progress {
            p.on_phase_start(PHASE_MERGE, usize::try_from(plan.planned_files).unwrap_or(usize::MAX));
        }

        let mut records = Vec::with_capacity(usize::try_from(plan.planned_files).unwrap_or(0));
        let mut totals = MergeTotals::default();
        let mut interrupted = false;
        for (index, (hash, planned)) in plan.iter_paths().enumerate() {
            if self.is_shutdown_requested() {
                log::warn!("Shutdown requested; stopping merge after {index} files");
                interrupted = true;
                break;
            }
            let record = self.merge_one(hash, planned);
            totals.add(&record.outcome, record.bytes());
            if let Some(p) = self.progress {
                p.on_progress(index + 1, &planned.combined_rel);
                p.on_item_completed(record.transferred);
            }
            records.push(record);
        }

        if let Some(p) = self.progress {
            p.on_phase_end(PHASE_MERGE);
        }

        let duration_secs = round3(clock.elapsed().as_secs_f64());
        let throughput_bps = if duration_secs > 0.0 {
            round3(totals.copied_bytes as f64 / duration_secs)
        } else {
            0.0
        };
        log::info!(
            "Merge finished: {} copied, {} failed, {} conflicts in {:.3}s",
            totals.copied_files,
            totals.failed_files,
            totals.conflict_files,
            duration_secs
        );

        Ok(MergeReport {
            records,
            totals,
            started_at,
            finished_at: Local::now(),
            duration_secs,
            throughput_bps,
            cancelled: false,
            interrupted,
        })
    }

    fn merge_one(&self, hash: &str, planned: &PlannedPath) -> OutcomeRecord {
        let src_remote = join_remote(&planned.origin.root, &planned.origin.rel);
        let dest = self.dest_base.join(&planned.combined_rel);
        let (outcome, transferred) = self.transfer(&src_remote, &dest, planned);

        match &outcome {
            MergeOutcome::Copied { dest } | MergeOutcome::CopiedOverwrite { dest } => {
                log::info!("Copied: {} -> {}", planned.combined_rel, dest);
            }
            MergeOutcome::ConflictVersioned { dest } => {
                log::warn!("Conflict (versioned): {} -> {}", planned.combined_rel, dest);
            }
            MergeOutcome::SkippedConflict { .. } => {
                log::warn!("Conflict (skip): {}", planned.combined_rel);
            }
            MergeOutcome::Failed { error, .. } | MergeOutcome::FailedMissingRemote { error, .. } => {
                log::warn!("Failed: {}: {}", planned.combined_rel, error);
            }
        }

        OutcomeRecord {
            hash: hash.to_string(),
            planned: planned.clone(),
            src_remote,
            outcome,
            transferred,
        }
    }

    fn transfer(&self, src_remote: &str, dest: &Path, planned: &PlannedPath) -> (MergeOutcome, u64) {
        let planned_dest = planned.combined_rel.clone();
        if !stays_below_base(&planned.combined_rel) || !dest.starts_with(&self.dest_base) {
            return (
                MergeOutcome::Failed {
                    error: format!("destination escapes {}: {}", self.dest_base.display(), dest.display()),
                    dest: planned_dest,
                },
                0,
            );
        }
        let existed = dest.exists();

        if existed && self.policy == ConflictPolicy::Skip {
            return (MergeOutcome::SkippedConflict { dest: planned_dest }, 0);
        }

        let stat = match self.channel.stat(src_remote) {
            Ok(Some(stat)) => stat,
            Ok(None) | Err(RemoteError::NotFound(_)) => {
                return (
                    MergeOutcome::FailedMissingRemote {
                        dest: planned_dest,
                        error: format!("remote-missing: {src_remote}"),
                    },
                    0,
                );
            }
            Err(e) => {
                return (
                    MergeOutcome::Failed {
                        dest: planned_dest,
                        error: e.to_string(),
                    },
                    0,
                );
            }
        };

        let versioned = existed && self.policy == ConflictPolicy::Version;
        let target = if versioned {
            versioned_path(dest, Some(stat.mtime))
        } else {
            dest.to_path_buf()
        };
        let target_rel = self.relative_to_base(&target);

        match self.download(src_remote, &target) {
            Ok(bytes) => {
                propagate_times(&target, &stat);
                let outcome = if versioned {
                    MergeOutcome::ConflictVersioned { dest: target_rel }
                } else if existed {
                    MergeOutcome::CopiedOverwrite { dest: target_rel }
                } else {
                    MergeOutcome::Copied { dest: target_rel }
                };
                (outcome, bytes)
            }
            Err(RemoteError::NotFound(_)) => (
                MergeOutcome::FailedMissingRemote {
                    dest: target_rel,
                    error: format!("remote-missing: {src_remote}"),
                },
                0,
            ),
            Err(e) => (
                MergeOutcome::Failed {
                    dest: target_rel,
                    error: e.to_string(),
                },
                0,
            ),
        }
    }

    /// Streams the source into a temp file beside `target`, then renames it
    /// into place so a failed transfer never leaves a partial file.
    fn download(&self, src_remote: &str, target: &Path) -> Result<u64, RemoteError> {
        let dir = target.parent().unwrap_or(&self.dest_base);
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let bytes = {
            let mut writer = io::BufWriter::new(tmp.as_file_mut());
            let bytes = self.channel.fetch(src_remote, &mut writer)?;
            writer.flush()?;
            bytes
        };
        tmp.persist(target).map_err(|e| RemoteError::Io(e.error))?;
        Ok(bytes)
    }

    fn relative_to_base(&self, path: &Path) -> String {
        path.strip_prefix(&self.dest_base)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Whether joining `rel` onto a base directory stays below it.
fn stays_below_base(rel: &str) -> bool {
    let mut components = Path::new(rel).components().peekable();
    components.peek().is_some()
        && components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Best-effort: copy the source access and modification times.
fn propagate_times(target: &Path, stat: &RemoteStat) {
    let atime = FileTime::from_unix_time(stat.atime, 0);
    let mtime = FileTime::from_unix_time(stat.mtime, 0);
    if let Err(e) = filetime::set_file_times(target, atime, mtime) {
        log::debug!("Could not set times on {}: {}", target.display(), e);
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
