//! Snapshot of the previous cycle's unresolved paths.

use std::collections::BTreeSet;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};

/// Combined paths still only on the source after a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Serialized as a sorted list.
    #[serde(default)]
    pub last_only_in_2_relpaths: BTreeSet<String>,
    /// Naive timestamps (no offset) are read as local time.
    #[serde(deserialize_with = "local_or_naive")]
    pub saved_at: DateTime<Local>,
}

fn local_or_naive<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Local>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Local));
    }
    let naive: NaiveDateTime = raw.parse().map_err(serde::de::Error::custom)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| serde::de::Error::custom(format!("nonexistent local time: {raw}")))
}

impl RoundSnapshot {
    #[must_use]
    pub fn new(paths: BTreeSet<String>) -> Self {
        Self {
            last_only_in_2_relpaths: paths,
            saved_at: Local::now(),
        }
    }

    /// Empty snapshot, used when nothing was saved yet.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(BTreeSet::new())
    }

    #[must_use]
    pub fn paths(&self) -> &BTreeSet<String> {
        &self.last_only_in_2_relpaths
    }

    /// Whether the unresolved set differs from `previous`.
    #[must_use]
    pub fn differs_from(&self, previous: &Self) -> bool {
        self.last_only_in_2_relpaths != previous.last_only_in_2_relpaths
    }
}
