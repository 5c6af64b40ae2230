//! Round-to-round state.
//!
//! The only state carried between cycles besides the hash cache is the set
//! of combined paths that were still missing locally at the end of the
//! previous cycle. It decides whether a cycle's result is new enough to
//! alert on.
//!
//! * [`data`]: the serializable snapshot
//! * [`io`]: loading and saving it under the logs directory

pub mod data;
pub mod io;

pub use data::RoundSnapshot;
pub use io::{snapshot_path, STATE_FILE_NAME};
