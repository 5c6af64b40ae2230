//! Streaming content hashers for local files.
//!
//! # Overview
//! This module provides the [`Hasher`] struct for computing BLAKE3 or SHA-256
//! digests of file contents. The digest format (lowercase hex) matches what
//! `b3sum` and `sha256sum` print on the remote side, so local and remote
//! hashes are directly comparable.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::HashError;

/// Read buffer size for streamed hashing (1 MiB).
pub const HASH_CHUNK: usize = 1024 * 1024;

/// Content hash algorithm shared by both sides for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3 tree hash (`b3sum` on the remote).
    Blake3,
    /// SHA-256 (`sha256sum` on the remote).
    Sha256,
}

impl HashAlgorithm {
    /// Name stored in the cache `algo` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
        }
    }

    /// Remote utility that produces `hash  path` lines for this algorithm.
    #[must_use]
    pub fn remote_tool(self) -> &'static str {
        match self {
            Self::Blake3 => "b3sum",
            Self::Sha256 => "sha256sum",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blake3" => Ok(Self::Blake3),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!("unknown hash algorithm '{other}'")),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File hasher bound to one algorithm.
#[derive(Debug, Clone, Copy)]
pub struct Hasher {
    algorithm: HashAlgorithm,
}

impl Hasher {
    /// Create a hasher for the given algorithm.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// The algorithm this hasher computes.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash the full content of a file, returning lowercase hex.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read. A partial
    /// read never produces a digest.
    pub fn hash_file(&self, path: &Path) -> Result<String, HashError> {
        match self.algorithm {
            HashAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                hasher
                    .update_mmap_rayon(path)
                    .map_err(|e| HashError::from_io(path, e))?;
                Ok(hasher.finalize().to_hex().to_string())
            }
            HashAlgorithm::Sha256 => {
                let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
                self.hash_reader(file)
                    .map_err(|e| HashError::from_io(path, e))
            }
        }
    }

    /// Hash everything readable from `reader`.
    ///
    /// # Errors
    ///
    /// Propagates read errors from `reader`.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> std::io::Result<String> {
        let mut buffer = vec![0u8; HASH_CHUNK];
        match self.algorithm {
            HashAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                loop {
                    let n = reader.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buffer[..n]);
                }
                Ok(hasher.finalize().to_hex().to_string())
            }
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let n = reader.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buffer[..n]);
                }
                Ok(format!("{:x}", hasher.finalize()))
            }
        }
    }

    /// Hash an in-memory buffer.
    #[must_use]
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        match self.algorithm {
            HashAlgorithm::Blake3 => blake3::hash(data).to_hex().to_string(),
            HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
        }
    }
}
