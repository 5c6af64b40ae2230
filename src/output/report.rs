//! Human-readable alert report.
//!
//! Rendered with `askama` from `templates/alert.txt`. Sizes are shown both
//! as exact byte counts (grouped with `.`) and in binary units.

use askama::Template;
use bytesize::ByteSize;
use chrono::Local;

use super::RunIdentity;
use crate::merge::MergeTotals;

/// Cycle figures shown in the report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFigures {
    pub planned_files: u64,
    pub planned_bytes: u64,
    pub totals: MergeTotals,
    pub duration_secs: Option<f64>,
    pub throughput_bps: Option<f64>,
    /// Run log path, if one was written.
    pub log_path: Option<String>,
}

/// Rendered alert text for one cycle.
#[derive(Template)]
#[template(path = "alert.txt")]
pub struct AlertReport {
    pub generated_at: String,
    pub run_id: String,
    pub source_host: String,
    pub source_roots: String,
    pub target_root: String,
    pub use_merge_subroot: bool,
    pub on_conflict: String,
    pub planned: String,
    pub copied: String,
    pub failed: String,
    pub conflict: String,
    pub duration: Option<String>,
    pub throughput: Option<String>,
    pub log_path: String,
}

impl AlertReport {
    #[must_use]
    pub fn new(identity: &RunIdentity, figures: &ReportFigures) -> Self {
        let t = &figures.totals;
        Self {
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            run_id: identity.run_id.clone(),
            source_host: identity.source_host.clone(),
            source_roots: identity.source_roots.join(", "),
            target_root: identity.target_root.clone(),
            use_merge_subroot: identity.use_merge_subroot,
            on_conflict: identity.on_conflict.to_string(),
            planned: files_and_bytes(figures.planned_files, figures.planned_bytes),
            copied: files_and_bytes(t.copied_files, t.copied_bytes),
            failed: files_and_bytes(t.failed_files, t.failed_bytes),
            conflict: files_and_bytes(t.conflict_files, t.conflict_bytes),
            duration: figures.duration_secs.map(|d| format!("{d:.3} s")),
            throughput: figures.throughput_bps.map(|bps| {
                let whole = bps.max(0.0) as u64;
                format!("{} B/s ({}/s)", group_thousands(whole), ByteSize::b(whole))
            }),
            log_path: figures.log_path.clone().unwrap_or_else(|| "-".to_string()),
        }
    }

    /// Subject line for transports that need one.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("[Merge Alert] {} {}", self.source_host, self.run_id)
    }

    /// Renders the report body.
    ///
    /// # Errors
    ///
    /// Returns an error if template rendering fails.
    pub fn to_text(&self) -> Result<String, askama::Error> {
        self.render()
    }
}

/// `1234567` becomes `1.234.567`.
#[must_use]
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

fn files_and_bytes(files: u64, bytes: u64) -> String {
    format!(
        "{} files, {} bytes ({})",
        group_thousands(files),
        group_thousands(bytes),
        ByteSize::b(bytes)
    )
}
