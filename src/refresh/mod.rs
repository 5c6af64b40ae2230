//! Per-cycle cache refresh for both sides.
//!
//! - [`local`]: walk the target tree, observe every file, hash dirty ones.
//! - [`remote`]: list the remote roots and observe metadata only.
//! - [`budget`]: pick a bounded set of stale remote records and hash them
//!   in batched remote invocations.

pub mod budget;
pub mod local;
pub mod remote;

pub use budget::{
    hash_remote_entries, run_budgeted_hashing, select_within_budget, BudgetStats, HashBudget,
    HashMode, SecondaryKey,
};
pub use local::{LocalObserver, LocalRefreshStats};
pub use remote::{refresh_remote_metadata, RemoteRefreshStats};

use crate::cache::CacheError;
use crate::remote::RemoteError;

/// Errors that abort a refresh step.
///
/// Per-file failures never show up here; they are logged and counted.
#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
