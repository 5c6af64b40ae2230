//! Remote channel backed by the local filesystem.
//!
//! Serves a source tree that is reachable as a mounted directory (NFS,
//! SSHFS) with the same semantics as [`SshChannel`](super::SshChannel).
//! Also the channel used by the integration tests.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use filetime::FileTime;

use super::{Connector, HashBatch, HashLine, RemoteChannel, RemoteError, RemoteFile, RemoteStat};
use crate::scanner::{HashAlgorithm, Hasher, Walker, WalkerConfig};

/// Channel that reads source roots directly from disk.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    host: String,
    blake3_available: bool,
}

impl LocalChannel {
    /// Channel reporting `host` as its host name.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            blake3_available: true,
        }
    }

    /// Pretend `b3sum` is missing, forcing SHA-256.
    #[must_use]
    pub fn without_blake3(mut self) -> Self {
        self.blake3_available = false;
        self
    }
}

impl RemoteChannel for LocalChannel {
    fn host(&self) -> &str {
        &self.host
    }

    fn has_command(&self, program: &str) -> Result<bool, RemoteError> {
        Ok(match program {
            "b3sum" => self.blake3_available,
            "sha256sum" => true,
            _ => false,
        })
    }

    fn list_files(&self, root: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let root_path = Path::new(root);
        if !root_path.is_dir() {
            return Err(RemoteError::NotFound(root.to_string()));
        }
        let files = Walker::new(root_path, WalkerConfig::default())
            .walk()
            .filter_map(|entry| match entry {
                Ok(file) => Some(RemoteFile {
                    rel: file.rel,
                    size: file.size,
                    mtime: file.mtime,
                }),
                Err(e) => {
                    log::warn!("[remote-meta:{root}] {e}");
                    None
                }
            })
            .collect();
        Ok(files)
    }

    fn hash_batch(
        &self,
        root: &str,
        rels: &[String],
        algo: HashAlgorithm,
        _workers: usize,
    ) -> Result<HashBatch, RemoteError> {
        let hasher = Hasher::new(algo);
        let mut batch = HashBatch::default();
        let mut errors = Vec::new();
        for rel in rels {
            match hasher.hash_file(&Path::new(root).join(rel)) {
                Ok(hash) => batch.lines.push(HashLine {
                    hash,
                    rel: rel.clone(),
                }),
                Err(e) => errors.push(format!("{}: {e}", algo.remote_tool())),
            }
        }
        batch.stderr = errors.join("\n");
        Ok(batch)
    }

    fn stat(&self, path: &str) -> Result<Option<RemoteStat>, RemoteError> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(RemoteStat {
                atime: FileTime::from_last_access_time(&meta).unix_seconds(),
                mtime: FileTime::from_last_modification_time(&meta).unix_seconds(),
                size: meta.len(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RemoteError::Io(e)),
        }
    }

    fn fetch(&self, path: &str, dest: &mut dyn Write) -> Result<u64, RemoteError> {
        let mut file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RemoteError::NotFound(path.to_string()),
            _ => RemoteError::Io(e),
        })?;
        Ok(io::copy(&mut file, dest)?)
    }
}

/// Hands out clones of a [`LocalChannel`].
#[derive(Debug, Clone)]
pub struct LocalConnector {
    channel: LocalChannel,
}

impl LocalConnector {
    #[must_use]
    pub fn new(channel: LocalChannel) -> Self {
        Self { channel }
    }
}

impl Connector for LocalConnector {
    type Channel = LocalChannel;

    fn connect(&self) -> Result<LocalChannel, RemoteError> {
        Ok(self.channel.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_algorithm() {
        assert_eq!(LocalChannel::new("h").detect_algorithm(), HashAlgorithm::Blake3);
        assert_eq!(
            LocalChannel::new("h").without_blake3().detect_algorithm(),
            HashAlgorithm::Sha256
        );
    }

    #[test]
    fn test_list_skips_logs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/_logs")).unwrap();
        fs::write(dir.path().join("a/b.txt"), b"0123456789").unwrap();
        fs::write(dir.path().join("a/_logs/x.json"), b"{}").unwrap();

        let ch = LocalChannel::new("h");
        let files = ch.list_files(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel, "a/b.txt");
        assert_eq!(files[0].size, 10);
    }

    #[test]
    fn test_list_missing_root() {
        let ch = LocalChannel::new("h");
        assert!(matches!(
            ch.list_files("/nonexistent/root/12345"),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn test_hash_batch_skips_failures() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ok.txt"), b"abc").unwrap();
        let root = dir.path().to_str().unwrap();

        let batch = LocalChannel::new("h")
            .hash_batch(
                root,
                &["ok.txt".to_string(), "gone.txt".to_string()],
                HashAlgorithm::Sha256,
                4,
            )
            .unwrap();
        assert_eq!(batch.lines.len(), 1);
        assert_eq!(
            batch.lines[0].hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(batch.stderr.contains("sha256sum"));
    }

    #[test]
    fn test_stat_and_fetch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        fs::write(&path, b"payload").unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_650_000_000, 0)).unwrap();
        let path = path.to_str().unwrap();

        let ch = LocalChannel::new("h");
        let stat = ch.stat(path).unwrap().unwrap();
        assert_eq!(stat.mtime, 1_650_000_000);
        assert_eq!(stat.size, 7);

        let mut buf = Vec::new();
        assert_eq!(ch.fetch(path, &mut buf).unwrap(), 7);
        assert_eq!(buf, b"payload");

        assert!(ch.stat("/nonexistent/12345").unwrap().is_none());
    }
}
