//! Prometheus textfile-collector snapshot.
//!
//! One file per deployment, `<dir>/<basename>.prom`, replaced every cycle.
//! The file is written to `<basename>.prom.tmp` first and renamed so the
//! collector never reads a partial snapshot.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::PathBuf;

use super::RunIdentity;
use crate::merge::MergeTotals;

/// Counter values for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub planned_files: u64,
    pub planned_bytes: u64,
    pub totals: MergeTotals,
    /// Unix seconds when the cycle ended.
    pub finished_at: i64,
}

/// (name, type, help) for every exported metric, in output order.
const METRICS: [(&str, &str, &str); 9] = [
    (
        "merge_unique_files_total",
        "gauge",
        "Number of files only available on the source (planned).",
    ),
    (
        "merge_unique_bytes_total",
        "gauge",
        "Total bytes only available on the source (planned).",
    ),
    ("merge_files_copied_total", "counter", "Number of files copied successfully."),
    ("merge_bytes_copied_total", "counter", "Total bytes copied successfully."),
    ("merge_files_failed_total", "counter", "Number of failed copies."),
    ("merge_bytes_failed_total", "counter", "Total bytes of failed copies."),
    ("merge_files_conflict_total", "counter", "Number of files in conflict."),
    ("merge_bytes_conflict_total", "counter", "Total bytes in conflict."),
    ("merge_last_run_timestamp_seconds", "gauge", "End time of the last cycle."),
];

/// Escapes a label value: backslash and quote are escaped, newlines dropped.
#[must_use]
pub fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => {}
            c => out.push(c),
        }
    }
    out
}

/// Writes metric snapshots into a textfile-collector directory.
#[derive(Debug, Clone)]
pub struct MetricsWriter {
    dir: PathBuf,
    basename: String,
}

impl MetricsWriter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, basename: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            basename: basename.into(),
        }
    }

    /// Final path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.prom", self.basename))
    }

    /// Renders the snapshot in the Prometheus text exposition format.
    #[must_use]
    pub fn render(identity: &RunIdentity, snapshot: &MetricsSnapshot) -> String {
        let labels = [
            ("source_host", identity.source_host.clone()),
            ("target_root", identity.target_root.clone()),
            ("run_id", identity.run_id.clone()),
            ("source_roots", identity.source_roots.join(",")),
            ("source_aliases", identity.source_aliases.join(",")),
        ]
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect::<Vec<_>>()
        .join(",");

        let t = &snapshot.totals;
        let values: [i128; 9] = [
            snapshot.planned_files.into(),
            snapshot.planned_bytes.into(),
            t.copied_files.into(),
            t.copied_bytes.into(),
            t.failed_files.into(),
            t.failed_bytes.into(),
            t.conflict_files.into(),
            t.conflict_bytes.into(),
            snapshot.finished_at.into(),
        ];

        let mut out = String::new();
        for ((name, kind, help), value) in METRICS.iter().zip(values) {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} {kind}");
            let _ = writeln!(out, "{name}{{{labels}}} {value}");
        }
        out
    }

    /// Renders and atomically replaces the snapshot file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory or file cannot be written.
    pub fn write(&self, identity: &RunIdentity, snapshot: &MetricsSnapshot) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{}.prom.tmp", self.basename));
        let path = self.path();
        fs::write(&tmp, Self::render(identity, snapshot))?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Best-effort: like [`write`](Self::write) but only logs failures.
    pub fn write_best_effort(&self, identity: &RunIdentity, snapshot: &MetricsSnapshot) {
        match self.write(identity, snapshot) {
            Ok(path) => log::info!("Metrics written to {}", path.display()),
            Err(e) => log::warn!("Could not write metrics to {}: {}", self.dir.display(), e),
        }
    }
}
