//! Loading and saving the round snapshot.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::session::data::RoundSnapshot;

/// File name of the snapshot inside the logs directory.
pub const STATE_FILE_NAME: &str = "_state.json";

/// `<logs_dir>/_state.json`.
#[must_use]
pub fn snapshot_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(STATE_FILE_NAME)
}

impl RoundSnapshot {
    /// Saves the snapshot, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let json = serde_json::to_string(self).context("Failed to serialize round snapshot")?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in: {}", dir.display()))?;
        tmp.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write round snapshot: {}", path.display()))?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace round snapshot: {}", path.display()))?;
        Ok(())
    }

    /// Loads a snapshot from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read round snapshot: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse round snapshot: {}", path.display()))
    }

    /// Loads a snapshot, treating a missing or unreadable file as empty.
    #[must_use]
    pub fn load_or_empty(path: &Path) -> Self {
        if !path.exists() {
            return Self::empty();
        }
        match Self::load(path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("{e:#}; treating previous round as empty");
                Self::empty()
            }
        }
    }
}
