//! Application configuration.
//!
//! A single [`Config`] is built once at start-up and handed to every
//! component. Layers, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config PATH`, else `config.toml` in the platform
//!    config directory if present)
//! 3. Environment variables prefixed `HASHMERGE_`, with `__` separating
//!    nested keys (`HASHMERGE_REMOTE__HOST=backup-02`)

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::merge::ConflictPolicy;
use crate::planner::SourceRoot;
use crate::refresh::{HashBudget, SecondaryKey};
use crate::remote::SshSettings;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "HASHMERGE_";

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Target root does not exist or is not a directory: {0}")]
    TargetMissing(PathBuf),
}

/// How the source host is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// The system `ssh` client.
    #[default]
    Ssh,
    /// Source roots are mounted locally (NFS, SSHFS).
    Local,
}

/// Source host and roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    pub roots: Vec<String>,
    /// One alias per root; derived from the root names when absent.
    pub aliases: Option<Vec<String>>,
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    /// Deadline for any single remote command, including one file transfer
    /// (0 disables it).
    pub command_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Ssh,
            host: String::new(),
            port: 22,
            user: "root".to_string(),
            password: None,
            key_file: None,
            key_passphrase: None,
            roots: Vec::new(),
            aliases: None,
            connect_timeout_secs: 25,
            keepalive_secs: 30,
            command_timeout_secs: 6 * 3600,
        }
    }
}

/// Per-cycle remote hashing budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum files hashed per cycle (0 disables the limit).
    pub files: usize,
    /// Maximum bytes hashed per cycle (0 disables the limit).
    pub bytes: u64,
    pub secondary: SecondaryKey,
    /// Parallel hashing processes on the remote host.
    pub hash_workers: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            files: 500,
            bytes: 5 * 1024 * 1024 * 1024,
            secondary: SecondaryKey::Size,
            hash_workers: 4,
        }
    }
}

impl BudgetConfig {
    #[must_use]
    pub fn to_budget(&self) -> HashBudget {
        HashBudget {
            max_files: self.files,
            max_bytes: self.bytes,
            secondary: self.secondary,
        }
    }
}

/// Outer loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub run_forever: bool,
    pub sleep_secs: u64,
    pub prune_ttl_secs: i64,
    pub prune_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            run_forever: true,
            sleep_secs: 30,
            prune_ttl_secs: 7 * 24 * 3600,
            prune_interval_secs: 3600,
        }
    }
}

/// Daily integrity scrub.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrubConfig {
    pub enabled: bool,
    pub hour: u32,
    pub minute: u32,
    /// Share of local records sampled when `local_limit` is 0.
    pub local_percent: f64,
    pub remote_percent: f64,
    pub local_limit: usize,
    pub remote_limit: usize,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 2,
            minute: 0,
            local_percent: 0.05,
            remote_percent: 0.02,
            local_limit: 5000,
            remote_limit: 3000,
        }
    }
}

/// Prometheus textfile output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Textfile collector directory; metrics are off when unset.
    pub dir: Option<PathBuf>,
    pub basename: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            basename: "merge_compare".to_string(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target_root: PathBuf,
    pub use_merge_subroot: bool,
    pub merge_subroot: String,
    pub on_conflict: ConflictPolicy,
    /// Copy without asking; when false the merge waits for a typed `yes`.
    pub auto_merge: bool,
    pub remote: RemoteConfig,
    pub budget: BudgetConfig,
    /// Hash cache location; the platform cache directory when unset.
    pub cache_db: Option<PathBuf>,
    /// Threads hashing dirty local files.
    pub io_threads: usize,
    pub daemon: DaemonConfig,
    pub scrub: ScrubConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_root: PathBuf::from("/home/data"),
            use_merge_subroot: false,
            merge_subroot: "merge_from_server2".to_string(),
            on_conflict: ConflictPolicy::Version,
            auto_merge: true,
            remote: RemoteConfig::default(),
            budget: BudgetConfig::default(),
            cache_db: None,
            io_threads: 4,
            daemon: DaemonConfig::default(),
            scrub: ScrubConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Default platform-specific configuration file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "hashmerge", "hashmerge").map(|d| d.config_dir().join("config.toml"))
    }

    /// Default hash cache location.
    #[must_use]
    pub fn default_cache_path() -> PathBuf {
        ProjectDirs::from("com", "hashmerge", "hashmerge").map_or_else(
            || std::env::temp_dir().join("hashmerge_cache.sqlite"),
            |d| d.cache_dir().join("hash_cache.sqlite"),
        )
    }

    /// The layered figment for `path` (or the default file).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if an explicit `path` does not exist.
    pub fn figment(path: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(default) = Self::default_config_path().filter(|p| p.is_file()) {
                    log::debug!("Using configuration file {}", default.display());
                    figment = figment.merge(Toml::file(default));
                }
            }
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Loads and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable sources or invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::figment(path)?.extract::<Config>().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde alone cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.remote.roots.is_empty() {
            return invalid("remote.roots must list at least one source root".into());
        }
        if self.remote.roots.iter().any(|r| r.trim().is_empty()) {
            return invalid("remote.roots must not contain empty entries".into());
        }
        if self.remote.transport == Transport::Ssh && self.remote.host.trim().is_empty() {
            return invalid("remote.host must be set".into());
        }
        if let Some(aliases) = &self.remote.aliases {
            if aliases.len() != self.remote.roots.len() {
                return invalid(format!(
                    "remote.aliases has {} entries but remote.roots has {}",
                    aliases.len(),
                    self.remote.roots.len()
                ));
            }
            let unique: HashSet<&String> = aliases.iter().collect();
            if unique.len() != aliases.len() {
                return invalid("remote.aliases must be unique".into());
            }
        }
        if self.remote.roots.len() > 1 {
            for (root, alias) in self.remote.roots.iter().zip(self.aliases()) {
                if let Some(problem) = alias_problem(&alias) {
                    return invalid(format!(
                        "alias '{alias}' for root '{root}' {problem}; set remote.aliases"
                    ));
                }
            }
        }
        for (name, value) in [
            ("scrub.local_percent", self.scrub.local_percent),
            ("scrub.remote_percent", self.scrub.remote_percent),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be between 0 and 1, got {value}"));
            }
        }
        if self.scrub.hour > 23 || self.scrub.minute > 59 {
            return invalid(format!(
                "scrub time {:02}:{:02} is out of range",
                self.scrub.hour, self.scrub.minute
            ));
        }
        if self.budget.hash_workers == 0 || self.io_threads == 0 {
            return invalid("budget.hash_workers and io_threads must be at least 1".into());
        }
        if self.use_merge_subroot && self.merge_subroot.trim().is_empty() {
            return invalid("merge_subroot must be set when use_merge_subroot is enabled".into());
        }
        Ok(())
    }

    /// Fails if the target root is not an existing directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TargetMissing`].
    pub fn check_target_root(&self) -> Result<(), ConfigError> {
        if self.target_root.is_dir() {
            Ok(())
        } else {
            Err(ConfigError::TargetMissing(self.target_root.clone()))
        }
    }

    /// Directory merged files are written below.
    #[must_use]
    pub fn dest_base(&self) -> PathBuf {
        if self.use_merge_subroot {
            self.target_root.join(&self.merge_subroot)
        } else {
            self.target_root.clone()
        }
    }

    /// Run logs and round state.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.dest_base().join(crate::scanner::LOGS_DIR_NAME)
    }

    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.cache_db.clone().unwrap_or_else(Self::default_cache_path)
    }

    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        derive_aliases(&self.remote.roots, self.remote.aliases.as_deref())
    }

    /// Configured roots paired with their aliases.
    #[must_use]
    pub fn sources(&self) -> Vec<SourceRoot> {
        self.remote
            .roots
            .iter()
            .cloned()
            .zip(self.aliases())
            .map(|(root, alias)| SourceRoot { root, alias })
            .collect()
    }

    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        let r = &self.remote;
        SshSettings {
            host: r.host.clone(),
            port: r.port,
            user: r.user.clone(),
            password: r.password.clone(),
            key_file: r.key_file.clone(),
            key_passphrase: r.key_passphrase.clone(),
            connect_timeout_secs: r.connect_timeout_secs,
            keepalive_secs: r.keepalive_secs,
            command_timeout_secs: r.command_timeout_secs,
        }
    }

    /// Host name recorded in the cache and in artifacts.
    #[must_use]
    pub fn source_host(&self) -> String {
        if self.remote.host.is_empty() {
            "localhost".to_string()
        } else {
            self.remote.host.clone()
        }
    }
}

/// Why `alias` cannot name a directory directly below the destination.
fn alias_problem(alias: &str) -> Option<&'static str> {
    match alias {
        "" => Some("is empty"),
        "." | ".." => Some("is a relative directory reference"),
        a if a.contains(['/', '\\']) => Some("contains a path separator"),
        _ => None,
    }
}

/// Aliases for `roots`: the explicit list if its length matches, else the
/// last path component of each root (or the root with `/` turned into
/// `_`), made unique with `_1`, `_2`, … suffixes.
#[must_use]
pub fn derive_aliases(roots: &[String], explicit: Option<&[String]>) -> Vec<String> {
    if let Some(explicit) = explicit.filter(|a| a.len() == roots.len()) {
        return explicit.to_vec();
    }

    let mut used = HashSet::new();
    roots
        .iter()
        .map(|root| {
            let base = Path::new(root)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| root.trim_matches('/').replace('/', "_"));
            let mut alias = base.clone();
            let mut i = 1;
            while used.contains(&alias) {
                alias = format!("{base}_{i}");
                i += 1;
            }
            used.insert(alias.clone());
            alias
        })
        .collect()
}
