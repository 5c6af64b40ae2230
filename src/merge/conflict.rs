//! Conflict policy and versioned destination naming.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

/// What to do when a planned destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Leave the existing file alone and record a conflict.
    Skip,
    /// Replace the existing file; counted as a copy.
    Overwrite,
    /// Write a timestamp-tagged sibling and record a conflict.
    #[default]
    #[serde(alias = "suffix")]
    Version,
}

impl ConflictPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Overwrite => "overwrite",
            Self::Version => "version",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "overwrite" => Ok(Self::Overwrite),
            "version" | "suffix" => Ok(Self::Version),
            other => Err(format!(
                "unknown conflict policy '{other}' (expected skip, overwrite or version)"
            )),
        }
    }
}

/// Splits a file name into its stem and compound extension.
///
/// `data.tar.gz` gives `("data", ".tar.gz")`. Leading dots belong to the
/// stem (`.bashrc` has no extension) and a name ending in `.` has none.
#[must_use]
pub fn split_compound_suffix(name: &str) -> (&str, &str) {
    if name.ends_with('.') {
        return (name, "");
    }
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].find('.') {
        Some(idx) => name.split_at(leading + idx),
        None => (name, ""),
    }
}

/// `YYYYmmdd-HHMMSS` in local time for `epoch`, or for now.
#[must_use]
pub fn version_tag(epoch: Option<i64>) -> String {
    let when = epoch
        .and_then(|secs| Local.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Local::now);
    when.format("%Y%m%d-%H%M%S").to_string()
}

/// First free `stem.v<tag>[-N]<suffixes>` sibling of `dest`.
///
/// `epoch` is the source modification time when known. Collisions are
/// resolved with `-2`, `-3`, … before the extension.
#[must_use]
pub fn versioned_path(dest: &Path, epoch: Option<i64>) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, suffixes) = split_compound_suffix(&name);
    let tag = version_tag(epoch);

    let candidate = dest.with_file_name(format!("{stem}.v{tag}{suffixes}"));
    if !candidate.exists() {
        return candidate;
    }
    (2u64..)
        .map(|i| dest.with_file_name(format!("{stem}.v{tag}-{i}{suffixes}")))
        .find(|c| !c.exists())
        .unwrap_or(candidate)
}
