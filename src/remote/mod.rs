//! Remote source access.
//!
//! The engine talks to the source host only through the [`RemoteChannel`]
//! trait: list a root, probe for a hashing tool, hash a batch of files,
//! stat a path and stream a file. [`ssh::SshChannel`] drives the system
//! `ssh` client; [`local::LocalChannel`] serves a tree on a mounted
//! filesystem.
//!
//! A [`Connector`] opens one channel per cycle. Connection failures surface
//! as [`RemoteError`] and abort only the current cycle.

pub mod local;
pub mod ssh;

use std::io::Write;

use crate::scanner::HashAlgorithm;

pub use local::{LocalChannel, LocalConnector};
pub use ssh::{SshChannel, SshConnector, SshSettings};

/// One file reported by a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the listed root, `/`-separated, no `./` prefix.
    pub rel: String,
    pub size: u64,
    /// Modification time truncated to whole seconds.
    pub mtime: i64,
}

/// Result of a single-path stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub atime: i64,
    pub mtime: i64,
    pub size: u64,
}

/// One `hash  path` line produced by a batched hash invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashLine {
    pub hash: String,
    pub rel: String,
}

/// Output of one batched hash invocation for a single root.
#[derive(Debug, Clone, Default)]
pub struct HashBatch {
    pub lines: Vec<HashLine>,
    /// Diagnostics printed by the hashing tool; never fatal on their own.
    pub stderr: String,
}

/// Errors raised by a remote channel.
#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    /// Connection or authentication failure; aborts the cycle.
    #[error("Cannot connect to {host}: {message}")]
    Connect { host: String, message: String },

    /// A local helper process could not be started.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The remote command exited unsuccessfully.
    #[error("Remote command failed ({status}): {command}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The command outlived its deadline and was killed; aborts the cycle.
    #[error("Remote command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    /// The remote path does not exist.
    #[error("Remote path not found: {0}")]
    NotFound(String),

    /// Output could not be understood.
    #[error("Unexpected remote output: {0}")]
    Parse(String),

    /// Local I/O while streaming data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Whether the error indicates the channel itself is unusable.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Spawn { .. } | Self::Timeout { .. }
        )
    }
}

/// Operations the engine needs from the source host.
pub trait RemoteChannel {
    /// Host name used to key remote cache records.
    fn host(&self) -> &str;

    /// Whether `program` is available on the remote `PATH`.
    fn has_command(&self, program: &str) -> Result<bool, RemoteError>;

    /// Lists every regular file below `root`, skipping `_logs` subtrees.
    fn list_files(&self, root: &str) -> Result<Vec<RemoteFile>, RemoteError>;

    /// Hashes `rels` (relative to `root`) with up to `workers` parallel
    /// processes on the remote side.
    ///
    /// Files that fail to hash are simply absent from the output.
    fn hash_batch(
        &self,
        root: &str,
        rels: &[String],
        algo: HashAlgorithm,
        workers: usize,
    ) -> Result<HashBatch, RemoteError>;

    /// Stats a full remote path; `Ok(None)` if it does not exist.
    fn stat(&self, path: &str) -> Result<Option<RemoteStat>, RemoteError>;

    /// Streams a full remote path into `dest`, returning the bytes written.
    fn fetch(&self, path: &str, dest: &mut dyn Write) -> Result<u64, RemoteError>;

    /// Picks the hash algorithm for a cycle: BLAKE3 if `b3sum` exists,
    /// SHA-256 otherwise.
    fn detect_algorithm(&self) -> HashAlgorithm {
        match self.has_command(HashAlgorithm::Blake3.remote_tool()) {
            Ok(true) => HashAlgorithm::Blake3,
            Ok(false) => HashAlgorithm::Sha256,
            Err(e) => {
                log::debug!("b3sum probe failed on {}: {}", self.host(), e);
                HashAlgorithm::Sha256
            }
        }
    }
}

/// Opens a fresh channel for a cycle.
pub trait Connector {
    type Channel: RemoteChannel;

    /// # Errors
    ///
    /// Returns [`RemoteError::Connect`] if the host is unreachable or
    /// rejects authentication.
    fn connect(&self) -> Result<Self::Channel, RemoteError>;
}

/// Joins a remote root and a relative path.
#[must_use]
pub fn join_remote(root: &str, rel: &str) -> String {
    let root = root.trim_end_matches('/');
    format!("{root}/{}", rel.trim_start_matches('/'))
}

/// Quotes `s` for a POSIX shell.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Strips the `./` prefix `find` puts on relative paths.
fn strip_dot_slash(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

/// Parses NUL-terminated `mtime\tsize\tpath` records from `find -printf`.
///
/// Malformed records are skipped with a debug log.
#[must_use]
pub fn parse_listing(output: &[u8]) -> Vec<RemoteFile> {
    output
        .split(|b| *b == 0)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let text = String::from_utf8_lossy(record);
            let text = text.trim_start_matches('\n');
            let parsed = parse_listing_record(text);
            if parsed.is_none() {
                log::debug!("Skipping malformed listing record: {text:?}");
            }
            parsed
        })
        .collect()
}

fn parse_listing_record(record: &str) -> Option<RemoteFile> {
    let mut parts = record.splitn(3, '\t');
    let mtime: f64 = parts.next()?.trim().parse().ok()?;
    let size: u64 = parts.next()?.trim().parse().ok()?;
    let path = strip_dot_slash(parts.next()?);
    if path.is_empty() || path == "." {
        return None;
    }
    Some(RemoteFile {
        rel: path.to_string(),
        size,
        mtime: mtime.floor() as i64,
    })
}

/// Parses `b3sum`/`sha256sum` output.
///
/// Handles binary-mode `*` markers and the backslash escaping both tools
/// apply to names containing `\` or newlines.
#[must_use]
pub fn parse_hash_output(output: &str) -> Vec<HashLine> {
    output.lines().filter_map(parse_hash_line).collect()
}

fn parse_hash_line(line: &str) -> Option<HashLine> {
    let (escaped, line) = match line.strip_prefix('\\') {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    let (hash, rest) = line.split_once(' ')?;
    if hash.is_empty() || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let name = rest
        .strip_prefix(' ')
        .or_else(|| rest.strip_prefix('*'))
        .unwrap_or(rest);
    let name = if escaped { unescape_name(name) } else { name.to_string() };
    let rel = strip_dot_slash(&name).to_string();
    if rel.is_empty() {
        return None;
    }
    Some(HashLine {
        hash: hash.to_ascii_lowercase(),
        rel,
    })
}

fn unescape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parses `stat -c '%X %Y %s'` output, or `MISSING`.
pub(crate) fn parse_stat(output: &str) -> Result<Option<RemoteStat>, RemoteError> {
    let text = output.trim();
    if text == "MISSING" {
        return Ok(None);
    }
    let fields: Vec<i64> = text
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| RemoteError::Parse(format!("stat output {text:?}")))?;
    match fields.as_slice() {
        [atime, mtime, size] => Ok(Some(RemoteStat {
            atime: *atime,
            mtime: *mtime,
            size: u64::try_from(*size).unwrap_or(0),
        })),
        _ => Err(RemoteError::Parse(format!("stat output {text:?}"))),
    }
}
