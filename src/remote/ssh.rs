//! Remote channel over the system `ssh` client.
//!
//! Each cycle opens one multiplexed control-master connection; every
//! command of the cycle reuses it. Connection and keep-alive timeouts are
//! enforced by ssh itself (`ConnectTimeout`, `ServerAliveInterval`), so an
//! unreachable host fails the command instead of hanging the cycle. A live
//! link with a stuck remote command (a hung mount under `find` or `cat`) is
//! caught by a per-command deadline that kills the local ssh process group.
//!
//! Password and key-passphrase authentication go through `sshpass`, with
//! the secret passed in the `SSHPASS` environment variable rather than on
//! the command line.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tempfile::TempDir;

use super::{
    parse_hash_output, parse_listing, parse_stat, shell_quote, Connector, HashBatch,
    RemoteChannel, RemoteError, RemoteFile, RemoteStat,
};
use crate::scanner::{HashAlgorithm, LOGS_DIR_NAME};

/// Exit status ssh uses for its own (connection-level) failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// How long the control master lingers after the last command.
const CONTROL_PERSIST_SECS: u64 = 120;

/// Connection parameters for [`SshConnector`].
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    /// Per-command deadline in seconds; 0 disables it.
    pub command_timeout_secs: u64,
}

impl SshSettings {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn command_deadline(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    /// Secret handed to `sshpass`, and the prompt it should answer.
    fn secret(&self) -> Option<(&str, Option<&'static str>)> {
        match (&self.key_file, &self.key_passphrase, &self.password) {
            (Some(_), Some(passphrase), _) => Some((passphrase.as_str(), Some("passphrase"))),
            (Some(_), None, _) => None,
            (None, _, Some(password)) => Some((password.as_str(), None)),
            (None, _, None) => None,
        }
    }
}

/// Opens [`SshChannel`]s.
#[derive(Debug, Clone)]
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    #[must_use]
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

impl Connector for SshConnector {
    type Channel = SshChannel;

    fn connect(&self) -> Result<SshChannel, RemoteError> {
        log::info!(
            "Connecting to {}:{}",
            self.settings.destination(),
            self.settings.port
        );
        let control_dir = tempfile::Builder::new()
            .prefix("hashmerge-ssh-")
            .tempdir()
            .map_err(|source| RemoteError::Spawn {
                program: "ssh".into(),
                source,
            })?;
        let channel = SshChannel {
            settings: self.settings.clone(),
            control_dir,
        };

        // Establishes the control master; later commands ride on it.
        let output = channel.run("true", None)?;
        if !output.status.success() {
            return Err(RemoteError::Connect {
                host: channel.settings.host.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        log::debug!("SSH control master established for {}", channel.settings.host);
        Ok(channel)
    }
}

/// A live, multiplexed ssh session to one host.
pub struct SshChannel {
    settings: SshSettings,
    control_dir: TempDir,
}

impl std::fmt::Debug for SshChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshChannel")
            .field("host", &self.settings.host)
            .field("port", &self.settings.port)
            .finish_non_exhaustive()
    }
}

impl SshChannel {
    fn control_path(&self) -> PathBuf {
        self.control_dir.path().join("cm-%C")
    }

    /// Builds the `ssh` (or `sshpass ssh`) invocation for `remote_cmd`.
    fn command(&self, remote_cmd: &str) -> Command {
        let s = &self.settings;
        let mut cmd = match s.secret() {
            Some((secret, prompt)) => {
                let mut c = Command::new("sshpass");
                if let Some(prompt) = prompt {
                    c.args(["-P", prompt]);
                }
                c.arg("-e").arg("ssh").env("SSHPASS", secret);
                c
            }
            None => {
                let mut c = Command::new("ssh");
                c.args(["-o", "BatchMode=yes"]);
                c
            }
        };

        cmd.arg("-p")
            .arg(s.port.to_string())
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", s.connect_timeout_secs))
            .arg("-o")
            .arg(format!("ServerAliveInterval={}", s.keepalive_secs))
            .args(["-o", "ServerAliveCountMax=3"])
            .args(["-o", "ControlMaster=auto"])
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()))
            .arg("-o")
            .arg(format!("ControlPersist={CONTROL_PERSIST_SECS}"));
        if let Some(key) = &s.key_file {
            cmd.arg("-i").arg(key).args(["-o", "IdentitiesOnly=yes"]);
        }
        cmd.arg(s.destination()).arg("--").arg(remote_cmd);
        cmd
    }

    fn spawn(&self, remote_cmd: &str, stdin: Stdio) -> Result<Child, RemoteError> {
        let mut cmd = self.command(remote_cmd);
        let program = cmd.get_program().to_string_lossy().into_owned();
        log::trace!("ssh {}: {}", self.settings.host, remote_cmd);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so a deadline kill also reaches ssh under sshpass.
            cmd.process_group(0);
        }
        cmd.stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RemoteError::Spawn { program, source })
    }

    /// Runs `remote_cmd`, optionally feeding `input` on stdin.
    fn run(&self, remote_cmd: &str, input: Option<Vec<u8>>) -> Result<Output, RemoteError> {
        let stdin = if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut child = self.spawn(remote_cmd, stdin)?;

        // Feed stdin from a helper thread so a large file list cannot
        // deadlock against a full stdout pipe.
        let writer = match (input, child.stdin.take()) {
            (Some(data), Some(mut pipe)) => Some(thread::spawn(move || pipe.write_all(&data))),
            _ => None,
        };
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let watchdog = Watchdog::arm(child, self.settings.command_deadline());

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        let (status, timed_out) = watchdog.wait()?;
        if let Some(handle) = writer {
            if let Ok(Err(e)) = handle.join() {
                log::debug!("Writing ssh stdin failed: {e}");
            }
        }
        if timed_out {
            return Err(self.timeout(remote_cmd));
        }

        let output = Output {
            status,
            stdout,
            stderr,
        };
        self.check_connection(&output)?;
        Ok(output)
    }

    fn timeout(&self, remote_cmd: &str) -> RemoteError {
        RemoteError::Timeout {
            command: remote_cmd.to_string(),
            secs: self.settings.command_timeout_secs,
        }
    }

    fn check_connection(&self, output: &Output) -> Result<(), RemoteError> {
        if output.status.code() == Some(SSH_CONNECTION_FAILURE) {
            return Err(RemoteError::Connect {
                host: self.settings.host.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn run_checked(&self, remote_cmd: &str) -> Result<Output, RemoteError> {
        let output = self.run(remote_cmd, None)?;
        if !output.status.success() {
            return Err(RemoteError::CommandFailed {
                command: remote_cmd.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Drop for SshChannel {
    fn drop(&mut self) {
        let status = Command::new("ssh")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()))
            .args(["-O", "exit"])
            .arg(self.settings.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            log::debug!("Closing ssh control master failed: {e}");
        }
    }
}

/// Reads a child pipe to the end on a helper thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Kills a child that is still running when its deadline passes.
struct Watchdog {
    child: Arc<Mutex<Child>>,
    done: mpsc::Sender<()>,
    timer: JoinHandle<bool>,
}

impl Watchdog {
    fn arm(child: Child, deadline: Option<Duration>) -> Self {
        let child = Arc::new(Mutex::new(child));
        let (done, finished) = mpsc::channel::<()>();
        let target = Arc::clone(&child);
        let timer = thread::spawn(move || {
            let Some(deadline) = deadline else {
                let _ = finished.recv();
                return false;
            };
            match finished.recv_timeout(deadline) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    let mut child = target.lock().unwrap_or_else(PoisonError::into_inner);
                    terminate(&mut child);
                    true
                }
                _ => false,
            }
        });
        Self { child, done, timer }
    }

    /// Reaps the child. The flag is set if the deadline killed it.
    ///
    /// Call only after its pipes are drained.
    fn wait(self) -> io::Result<(ExitStatus, bool)> {
        let Self { child, done, timer } = self;
        drop(done);
        let fired = timer.join().unwrap_or(false);
        let status = child.lock().unwrap_or_else(PoisonError::into_inner).wait()?;
        Ok((status, fired && !status.success()))
    }
}

fn terminate(child: &mut Child) {
    log::warn!("Remote command exceeded its deadline; killing pid {}", child.id());
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = killed {
            log::debug!("Killing process group {group} failed: {e}");
        }
    }
    if let Err(e) = child.kill() {
        log::debug!("Killing pid {} failed: {e}", child.id());
    }
}

/// `find` invocation listing `mtime\tsize\tpath\0` records, skipping logs.
fn listing_command(root: &str) -> String {
    format!(
        "cd {} && find . -type f ! -path './{logs}/*' ! -path '*/{logs}/*' -printf '%T@\\t%s\\t%p\\0'",
        shell_quote(root),
        logs = LOGS_DIR_NAME
    )
}

fn hash_command(root: &str, algo: HashAlgorithm, workers: usize) -> String {
    format!(
        "cd {} && xargs -0 -r -P {} {} --",
        shell_quote(root),
        workers.max(1),
        algo.remote_tool()
    )
}

fn stat_command(path: &str) -> String {
    let quoted = shell_quote(path);
    format!("if [ -e {quoted} ]; then stat -c '%X %Y %s' -- {quoted}; else echo MISSING; fi")
}

impl RemoteChannel for SshChannel {
    fn host(&self) -> &str {
        &self.settings.host
    }

    fn has_command(&self, program: &str) -> Result<bool, RemoteError> {
        let output = self.run(
            &format!("command -v {} >/dev/null 2>&1 && echo OK || echo NO", shell_quote(program)),
            None,
        )?;
        Ok(String::from_utf8_lossy(&output.stdout).contains("OK"))
    }

    fn list_files(&self, root: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let command = listing_command(root);
        let output = self.run(&command, None)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && output.stdout.is_empty() {
            return Err(RemoteError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.trim().is_empty() {
            log::warn!("[remote-meta:{root}] {}", stderr.trim());
        }
        Ok(parse_listing(&output.stdout))
    }

    fn hash_batch(
        &self,
        root: &str,
        rels: &[String],
        algo: HashAlgorithm,
        workers: usize,
    ) -> Result<HashBatch, RemoteError> {
        if rels.is_empty() {
            return Ok(HashBatch::default());
        }
        let mut input = Vec::with_capacity(rels.iter().map(|r| r.len() + 1).sum());
        for rel in rels {
            input.extend_from_slice(rel.as_bytes());
            input.push(0);
        }
        let output = self.run(&hash_command(root, algo, workers), Some(input))?;
        Ok(HashBatch {
            lines: parse_hash_output(&String::from_utf8_lossy(&output.stdout)),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn stat(&self, path: &str) -> Result<Option<RemoteStat>, RemoteError> {
        let output = self.run_checked(&stat_command(path))?;
        parse_stat(&String::from_utf8_lossy(&output.stdout))
    }

    fn fetch(&self, path: &str, dest: &mut dyn Write) -> Result<u64, RemoteError> {
        let command = format!("cat -- {}", shell_quote(path));
        let mut child = self.spawn(&command, Stdio::null())?;

        let stderr_reader = drain(child.stderr.take());
        let mut stdout = child.stdout.take();
        let watchdog = Watchdog::arm(child, self.settings.command_deadline());

        let copied = match stdout.as_mut() {
            Some(pipe) => io::copy(pipe, dest),
            None => Ok(0),
        };
        drop(stdout);
        let stderr = String::from_utf8_lossy(&stderr_reader.join().unwrap_or_default()).into_owned();
        let (status, timed_out) = watchdog.wait()?;
        if timed_out {
            return Err(self.timeout(&command));
        }
        let copied = copied?;

        if status.code() == Some(SSH_CONNECTION_FAILURE) {
            return Err(RemoteError::Connect {
                host: self.settings.host.clone(),
                message: stderr.trim().to_string(),
            });
        }
        if !status.success() {
            return Err(RemoteError::CommandFailed {
                command,
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(copied)
    }
}
