//! Round controller.
//!
//! One cycle runs observe → refresh → budget → plan → merge against a
//! single remote connection. The outer loop adds hourly cache pruning, the
//! daily scrub, change detection against the previous cycle, alerting and
//! metrics, then sleeps until the next cycle.
//!
//! Cycles never overlap. A connection failure aborts only the current
//! cycle; the loop tries again after the sleep interval.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::alert::{self, LogNotifier, Notifier};
use crate::cache::{CacheError, HashCache};
use crate::config::Config;
use crate::merge::{
    AutoConfirm, Confirm, MergeError, MergeExecutor, MergeReport, MergeTotals, StdinConfirm,
};
use crate::output::{
    capacity_of, run_log_path, AlertReport, MetricsSnapshot, MetricsWriter, ReportFigures,
    RunIdentity, RunLog, RunMeta,
};
use crate::planner::{Plan, Planner};
use crate::progress::ProgressCallback;
use crate::refresh::{
    refresh_remote_metadata, run_budgeted_hashing, LocalObserver, RefreshError,
};
use crate::remote::{Connector, RemoteChannel, RemoteError};
use crate::scanner::HashAlgorithm;
use crate::scrub::{run_scrub, ScrubSchedule, ScrubStats};
use crate::session::{snapshot_path, RoundSnapshot};

/// Run identifiers and versioned names share this local-time format.
pub const RUN_ID_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Errors that abort a single cycle.
#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error("Remote connection failed: {0}")]
    Connect(#[source] RemoteError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Shutdown was requested before the cycle could plan on complete data.
    #[error("Cycle interrupted before planning")]
    Interrupted,
}

/// Whether a cycle may copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    Merge,
    /// Stop after planning.
    PlanOnly,
}

/// Everything one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub run_id: String,
    pub algo: HashAlgorithm,
    /// Start of the cycle in Unix seconds; the plan only saw records
    /// observed at or after it.
    pub cycle_ts: i64,
    pub plan: Plan,
    /// Present when a merge ran (or was declined at the prompt).
    pub report: Option<MergeReport>,
    pub log_path: Option<PathBuf>,
}

impl CycleOutcome {
    #[must_use]
    pub fn totals(&self) -> MergeTotals {
        self.report.as_ref().map(|r| r.totals).unwrap_or_default()
    }

    /// Combined paths still only on the source.
    #[must_use]
    pub fn only_remote_paths(&self) -> BTreeSet<String> {
        self.plan.combined_paths()
    }

    #[must_use]
    pub fn figures(&self) -> ReportFigures {
        ReportFigures {
            planned_files: self.plan.planned_files,
            planned_bytes: self.plan.planned_bytes,
            totals: self.totals(),
            duration_secs: self.report.as_ref().map(|r| r.duration_secs),
            throughput_bps: self.report.as_ref().map(|r| r.throughput_bps),
            log_path: self
                .log_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }
}

/// What the outer loop did in one round.
#[derive(Debug, Clone)]
pub struct RoundResult {
    /// `None` if the cycle failed.
    pub cycle: Option<CycleOutcome>,
    pub pruned: bool,
    pub scrub: Option<ScrubStats>,
    pub changed: bool,
    pub alerted: bool,
}

/// Drives cycles against one source host.
pub struct Engine<K: Connector> {
    config: Config,
    cache: HashCache,
    connector: K,
    confirm: Box<dyn Confirm>,
    notifiers: Vec<Box<dyn Notifier>>,
    progress: Option<Box<dyn ProgressCallback>>,
    shutdown: Arc<AtomicBool>,
    last_prune: Option<Instant>,
    scrub_schedule: ScrubSchedule,
}

impl<K: Connector> Engine<K> {
    /// Builds an engine; confirmation is interactive unless
    /// `config.auto_merge` is set.
    #[must_use]
    pub fn new(config: Config, cache: HashCache, connector: K) -> Self {
        let confirm: Box<dyn Confirm> = if config.auto_merge {
            Box::new(AutoConfirm)
        } else {
            Box::new(StdinConfirm)
        };
        let scrub_schedule = ScrubSchedule::new(config.scrub.hour, config.scrub.minute);
        Self {
            config,
            cache,
            connector,
            confirm,
            notifiers: vec![Box::new(LogNotifier)],
            progress: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            last_prune: None,
            scrub_schedule,
        }
    }

    #[must_use]
    pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Replaces the notifier list.
    #[must_use]
    pub fn with_notifiers(mut self, notifiers: Vec<Box<dyn Notifier>>) -> Self {
        self.notifiers = notifiers;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Box<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &HashCache {
        &self.cache
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn ensure_not_interrupted(&self) -> Result<(), CycleError> {
        if self.is_shutdown_requested() {
            return Err(CycleError::Interrupted);
        }
        Ok(())
    }

    fn identity(&self, run_id: &str) -> RunIdentity {
        RunIdentity {
            run_id: run_id.to_string(),
            source_host: self.config.source_host(),
            source_roots: self.config.remote.roots.clone(),
            source_aliases: self.config.aliases(),
            target_root: self.config.target_root.to_string_lossy().into_owned(),
            use_merge_subroot: self.config.use_merge_subroot,
            on_conflict: self.config.on_conflict,
        }
    }

    /// Runs one cycle.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] on connection loss, cache failure, or if the
    /// run log cannot be written. File-level problems are outcomes. A
    /// shutdown request before planning gives [`CycleError::Interrupted`];
    /// one during the merge stops it between files and is reported in the
    /// merge report instead.
    pub fn run_cycle(&self, run_id: &str, mode: CycleMode) -> Result<CycleOutcome, CycleError> {
        let channel = self.connector.connect().map_err(CycleError::Connect)?;
        let algo = channel.detect_algorithm();
        log::info!("Shared hash algorithm: {algo}");

        let cycle_ts = Local::now().timestamp();
        let progress = self.progress.as_deref();

        let observer = LocalObserver::new(&self.cache, &self.config.target_root, algo)
            .with_io_threads(self.config.io_threads)
            .with_shutdown_flag(Arc::clone(&self.shutdown));
        let local = observer.refresh(cycle_ts, progress)?;
        if local.hashed > 0 {
            log::info!("Local hashed/updated: {} files", local.hashed);
        }
        // A cut-short walk leaves part of the target unobserved for this
        // cycle, so its content would be planned again.
        self.ensure_not_interrupted()?;

        let roots = &self.config.remote.roots;
        refresh_remote_metadata(&self.cache, &channel, roots, algo, cycle_ts)?;
        run_budgeted_hashing(
            &self.cache,
            &channel,
            roots,
            algo,
            &self.config.budget.to_budget(),
            self.config.budget.hash_workers,
            cycle_ts,
        )?;
        self.ensure_not_interrupted()?;

        let sources = self.config.sources();
        let plan = Planner::new(&self.cache, observer.root_key(), channel.host(), &sources, algo)
            .plan(Some(cycle_ts))?;

        let mut outcome = CycleOutcome {
            run_id: run_id.to_string(),
            algo,
            cycle_ts,
            plan,
            report: None,
            log_path: None,
        };
        if outcome.plan.is_empty() {
            log::info!("Nothing to merge: every source content exists on the target");
            return Ok(outcome);
        }
        if mode == CycleMode::PlanOnly {
            return Ok(outcome);
        }

        let dest_base = self.config.dest_base();
        let mut meta = RunMeta {
            started_at: Local::now().to_rfc3339(),
            source_host: self.config.source_host(),
            source_roots: roots.clone(),
            target_root: self.config.target_root.to_string_lossy().into_owned(),
            use_merge_subroot: self.config.use_merge_subroot,
            dest_base: dest_base.to_string_lossy().into_owned(),
            run_id: run_id.to_string(),
            planned_files: outcome.plan.planned_files,
            planned_bytes: outcome.plan.planned_bytes,
            on_conflict: self.config.on_conflict.to_string(),
            ..RunMeta::default()
        };
        meta.set_capacity(capacity_of(&self.config.target_root));

        let mut run_log = RunLog::new(
            run_log_path(&self.config.logs_dir(), run_id),
            dest_base.clone(),
            meta,
        );
        let report = MergeExecutor::new(&channel, dest_base, self.config.on_conflict)
            .with_confirm(self.confirm.as_ref())
            .with_progress(progress)
            .with_shutdown_flag(Arc::clone(&self.shutdown))
            .run(&outcome.plan, &mut run_log)?;

        outcome.log_path = Some(run_log.path().to_path_buf());
        outcome.report = Some(report);
        Ok(outcome)
    }

    fn prune_if_due(&mut self, now: DateTime<Local>) -> bool {
        let interval = Duration::from_secs(self.config.daemon.prune_interval_secs);
        if self.last_prune.is_some_and(|at| at.elapsed() < interval) {
            return false;
        }
        self.last_prune = Some(Instant::now());
        match self.cache.prune(self.config.daemon.prune_ttl_secs, now.timestamp()) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Cache prune failed: {e}");
                false
            }
        }
    }

    fn scrub_if_due(&mut self, now: DateTime<Local>) -> Option<ScrubStats> {
        if !self.config.scrub.enabled || !self.scrub_schedule.is_due(now) {
            return None;
        }
        self.scrub_schedule.mark_ran(now);

        let result = self
            .connector
            .connect()
            .map_err(CycleError::Connect)
            .and_then(|channel| {
                let algo = channel.detect_algorithm();
                run_scrub(
                    &self.cache,
                    &channel,
                    &self.config.target_root,
                    &self.config.remote.roots,
                    algo,
                    &self.config.scrub,
                    self.config.budget.hash_workers,
                    now.timestamp(),
                    &mut rand::thread_rng(),
                )
                .map_err(CycleError::from)
            });
        match result {
            Ok(stats) => Some(stats),
            Err(e) => {
                log::warn!("Scrub failed: {e}");
                None
            }
        }
    }

    /// One iteration of the outer loop at `now`.
    pub fn run_round(&mut self, now: DateTime<Local>) -> RoundResult {
        let pruned = self.prune_if_due(now);
        let scrub = self.scrub_if_due(now);
        let run_id = now.format(RUN_ID_FORMAT).to_string();

        let mut result = RoundResult {
            cycle: None,
            pruned,
            scrub,
            changed: false,
            alerted: false,
        };
        let outcome = match self.run_cycle(&run_id, CycleMode::Merge) {
            Ok(outcome) => outcome,
            Err(CycleError::Interrupted) => {
                log::info!("Cycle {run_id} interrupted; previous snapshot kept");
                return result;
            }
            Err(e) => {
                log::error!("Cycle {run_id} failed: {e}");
                return result;
            }
        };

        let state_path = snapshot_path(&self.config.logs_dir());
        let previous = RoundSnapshot::load_or_empty(&state_path);
        let current = RoundSnapshot::new(outcome.only_remote_paths());
        if let Err(e) = current.save(&state_path) {
            log::warn!("{e:#}");
        }

        let totals = outcome.totals();
        let identity = self.identity(&run_id);
        if let Some(dir) = &self.config.metrics.dir {
            let snapshot = MetricsSnapshot {
                planned_files: outcome.plan.planned_files,
                planned_bytes: outcome.plan.planned_bytes,
                totals,
                finished_at: Local::now().timestamp(),
            };
            MetricsWriter::new(dir, self.config.metrics.basename.as_str())
                .write_best_effort(&identity, &snapshot);
        }

        result.changed = alert::change_detected(&previous, &current, &totals);
        if alert::should_alert(outcome.plan.planned_files, &totals, result.changed) {
            let report = AlertReport::new(&identity, &outcome.figures());
            result.alerted = alert::deliver(&self.notifiers, &report, outcome.log_path.as_deref()) > 0;
        } else if !result.changed {
            log::info!("No new changes since the previous cycle; no alert sent");
        }

        result.cycle = Some(outcome);
        result
    }

    /// Runs rounds until shutdown, or once if `once` or the configuration
    /// says so. Returns `true` if stopped by a shutdown request.
    pub fn run_loop(&mut self, once: bool) -> bool {
        let once = once || !self.config.daemon.run_forever;
        log::info!(
            "Starting {} mode against {}",
            if once { "one-shot" } else { "daemon" },
            self.config.source_host()
        );

        loop {
            if self.is_shutdown_requested() {
                break;
            }
            self.run_round(Local::now());
            if once {
                return self.is_shutdown_requested();
            }
            self.sleep_between_cycles();
        }
        log::info!("Stopping at user request");
        true
    }

    fn sleep_between_cycles(&self) {
        let deadline = Instant::now() + Duration::from_secs(self.config.daemon.sleep_secs);
        while !self.is_shutdown_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(250)));
        }
    }
}
