//! Progress reporting utilities using indicatif.
//!
//! The engine reports two long-running phases: hashing dirty local files
//! ([`PHASE_LOCAL_HASH`]) and copying planned files ([`PHASE_MERGE`]).
//! Components take an optional `&dyn ProgressCallback`; the binary wires in
//! [`Progress`] when stderr is a terminal.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Phase name for local hashing.
pub const PHASE_LOCAL_HASH: &str = "local-hash";
/// Phase name for the merge copy loop.
pub const PHASE_MERGE: &str = "merge";

/// Progress callback for cycle phases.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase
    /// * `total` - Total number of items to process
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called for each item processed.
    ///
    /// # Arguments
    ///
    /// * `current` - Current item number (1-based)
    /// * `path` - Path being processed
    fn on_progress(&self, current: usize, path: &str);

    /// Called when an item has been processed, providing its size.
    fn on_item_completed(&self, _bytes: u64) {}

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);
}

/// Progress reporter using indicatif.
pub struct Progress {
    bar: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `quiet` - If true, no progress bars will be displayed.
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            quiet,
        }
    }

    fn style(phase: &str) -> ProgressStyle {
        let template = if phase == PHASE_MERGE {
            "[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} {msg} (ETA: {eta})"
        } else {
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}"
        };
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-")
    }

    fn label(phase: &str) -> &str {
        match phase {
            PHASE_LOCAL_HASH => "Hashing local",
            PHASE_MERGE => "Copying",
            other => other,
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }
        let pb = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
        pb.set_style(Self::style(phase));
        pb.set_message(Self::label(phase).to_string());
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(old) = slot.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }
        if let Ok(slot) = self.bar.lock() {
            if let Some(pb) = slot.as_ref() {
                pb.set_position(current as u64);
                pb.set_message(truncate_path(path, 40));
            }
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_with_message(format!("{} complete", Self::label(phase)));
            }
        }
    }
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let count = file_name.chars().count();
    if count + 4 > max_len {
        let tail: String = file_name.chars().skip(count + 3 - max_len).collect();
        return format!("...{tail}");
    }
    format!(".../{file_name}")
}
