//! Cache record definitions.

use serde::{Deserialize, Serialize};

use crate::scanner::HashAlgorithm;

/// Which host a cache record describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Side {
    /// The local target tree.
    Local,
    /// A file on the remote source host.
    Remote {
        /// Remote host name, part of the remote key.
        host: String,
    },
}

impl Side {
    /// Remote side for `host`.
    #[must_use]
    pub fn remote(host: impl Into<String>) -> Self {
        Self::Remote { host: host.into() }
    }

    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Local => "filemeta_local",
            Self::Remote { .. } => "filemeta_remote",
        }
    }

    pub(crate) fn host(&self) -> Option<&str> {
        match self {
            Self::Local => None,
            Self::Remote { host } => Some(host),
        }
    }
}

/// Identity of a record within one side: `(root, relative path, algorithm)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Tree root the path is relative to.
    pub root: String,
    /// `/`-separated path below `root`.
    pub rel: String,
    /// Algorithm the stored hash was computed with.
    pub algo: HashAlgorithm,
}

impl CacheKey {
    #[must_use]
    pub fn new(root: impl Into<String>, rel: impl Into<String>, algo: HashAlgorithm) -> Self {
        Self {
            root: root.into(),
            rel: rel.into(),
            algo,
        }
    }
}

/// One cached observation of a file.
///
/// `hash` is only meaningful for the `(size, mtime)` pair it was computed
/// against; the store clears it whenever either changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub root: String,
    pub rel: String,
    pub algo: HashAlgorithm,
    pub size: u64,
    /// Modification time in whole seconds.
    pub mtime: i64,
    pub hash: Option<String>,
    /// Cycle timestamp of the most recent observation.
    pub last_observed: i64,
    pub last_hashed: Option<i64>,
}

impl CacheRecord {
    #[must_use]
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.root.clone(), self.rel.clone(), self.algo)
    }

    /// The "needs work" predicate used for stale selection.
    #[must_use]
    pub fn needs_hash(&self) -> bool {
        match (self.hash.as_ref(), self.last_hashed) {
            (Some(_), Some(hashed)) => hashed < self.mtime,
            _ => true,
        }
    }
}

/// What an observation did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First time this key was seen.
    Inserted,
    /// Size or mtime differed; hash and last-hashed were cleared.
    MetadataChanged,
    /// Metadata matched; only last-observed advanced.
    Unchanged {
        /// Whether the record still carries a hash.
        hashed: bool,
    },
}

impl Observation {
    /// Whether the file must be (re)hashed to be usable for planning.
    #[must_use]
    pub fn is_dirty(self) -> bool {
        !matches!(self, Self::Unchanged { hashed: true })
    }
}

/// Rows removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub local: usize,
    pub remote: usize,
}
