//! Conflict-aware merge of planned remote files into the target.
//!
//! - [`executor`]: the copy loop, confirmation gate and run-log bracketing
//! - [`outcome`]: per-file outcome kinds and aggregate counters
//! - [`conflict`]: conflict policy and versioned naming

pub mod conflict;
pub mod executor;
pub mod outcome;

pub use conflict::{versioned_path, ConflictPolicy};
pub use executor::{AutoConfirm, Confirm, MergeError, MergeExecutor, MergeReport, StdinConfirm};
pub use outcome::{MergeOutcome, MergeTotals, OutcomeRecord, OutcomeStatus};
