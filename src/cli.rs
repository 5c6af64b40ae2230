//! Command-line interface definitions for hashmerge.
//!
//! Global options control verbosity and the configuration file; the
//! subcommand picks between the merge loop (the default) and a dry
//! planning pass.
//!
//! # Example
//!
//! ```bash
//! # Run the merge loop with the default configuration
//! hashmerge
//!
//! # One cycle with an explicit config file, asking before copying
//! hashmerge --config /etc/hashmerge.toml run --once --confirm
//!
//! # Show what would be copied without copying anything
//! hashmerge plan
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::merge::ConflictPolicy;

/// Hash-based one-way merge from a remote source host.
///
/// hashmerge copies every file whose content exists on the source host but
/// nowhere below the target root, comparing files by content hash and
/// keeping per-file hashes in a local cache between cycles.
#[derive(Debug, Parser)]
#[command(name = "hashmerge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML)
    ///
    /// Defaults to config.toml in the platform configuration directory.
    #[arg(short, long, global = true, value_name = "PATH", env = "HASHMERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The subcommand, with `run` filled in when none was given.
    #[must_use]
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }
}

impl Commands {
    /// Overrides shared by every subcommand.
    #[must_use]
    pub fn cycle_args(&self) -> &CycleArgs {
        match self {
            Commands::Run(args) => &args.cycle,
            Commands::Plan(args) => &args.cycle,
        }
    }
}

/// Available subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Run merge cycles until interrupted
    Run(RunArgs),
    /// Refresh the cache and print the merge plan without copying
    Plan(PlanArgs),
}

/// Overrides shared by every subcommand that runs a cycle.
#[derive(Debug, Clone, Default, Args)]
pub struct CycleArgs {
    /// Conflict policy for existing destination files (skip, overwrite, version)
    #[arg(long, value_name = "POLICY")]
    pub on_conflict: Option<ConflictPolicy>,

    /// Maximum remote files hashed per cycle (0 disables the limit)
    #[arg(long, value_name = "N")]
    pub budget_files: Option<usize>,

    /// Maximum remote bytes hashed per cycle (e.g. 500MB, 5GiB; 0 disables)
    ///
    /// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub budget_bytes: Option<u64>,

    /// Path to the hash cache database
    #[arg(long, value_name = "PATH")]
    pub cache: Option<PathBuf>,

    /// Clear the hash cache before the first cycle
    ///
    /// Every file on both sides is rehashed, subject to the remote budget.
    #[arg(long)]
    pub clear_cache: bool,
}

impl CycleArgs {
    /// Applies the command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(policy) = self.on_conflict {
            config.on_conflict = policy;
        }
        if let Some(files) = self.budget_files {
            config.budget.files = files;
        }
        if let Some(bytes) = self.budget_bytes {
            config.budget.bytes = bytes;
        }
        if let Some(cache) = &self.cache {
            config.cache_db = Some(cache.clone());
        }
    }
}

/// Arguments for the run subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub cycle: CycleArgs,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Ask for a typed confirmation before each merge
    #[arg(long)]
    pub confirm: bool,

    /// Seconds to sleep between cycles
    #[arg(long, value_name = "SECS")]
    pub sleep: Option<u64>,
}

impl RunArgs {
    pub fn apply(&self, config: &mut Config) {
        self.cycle.apply(config);
        if self.once {
            config.daemon.run_forever = false;
        }
        if self.confirm {
            config.auto_merge = false;
        }
        if let Some(secs) = self.sleep {
            config.daemon.sleep_secs = secs;
        }
    }
}

/// Arguments for the plan subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub cycle: CycleArgs,

    /// Print only the totals instead of the full plan
    #[arg(long)]
    pub summary: bool,
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use hashmerge::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("5GiB").unwrap(), 5 * 1_073_741_824);
/// assert_eq!(parse_size("500MB").unwrap(), 500_000_000);
/// ```
/// # Errors
///
/// Returns an error for an empty string, a malformed number or an unknown
/// suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (digits, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let value: f64 = digits
        .parse()
        .map_err(|_| format!("Invalid number: '{digits}'"))?;

    let unit: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1 << 10,
        "MB" | "M" => 1_000_000,
        "MIB" => 1 << 20,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1 << 30,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1 << 40,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((value * unit as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("1024B").unwrap(), 1024);
        assert_eq!(parse_size("1kib").unwrap(), 1024);
        assert_eq!(parse_size("1.5MB").unwrap(), 1_500_000);
        assert_eq!(parse_size(" 5 GiB ").unwrap(), 5_368_709_120);
        assert_eq!(parse_size("1TiB").unwrap(), 1_099_511_627_776);
    }

    #[test]
    fn test_parse_size_errors() {
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("1XB").is_err());
        assert!(parse_size("-1MB").is_err());
    }

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::try_parse_from(["hashmerge"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(cli.command.is_none());
        match cli.command() {
            Commands::Run(args) => {
                assert!(!args.once);
                assert!(!args.confirm);
            }
            Commands::Plan(_) => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_with_options() {
        let cli = Cli::try_parse_from([
            "hashmerge",
            "-v",
            "--config",
            "/etc/hashmerge.toml",
            "run",
            "--once",
            "--confirm",
            "--on-conflict",
            "skip",
            "--budget-files",
            "10",
            "--budget-bytes",
            "1GiB",
            "--sleep",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/hashmerge.toml")));

        let Some(Commands::Run(args)) = cli.command else {
            panic!("Expected Run command");
        };
        assert!(args.once);
        assert!(args.confirm);
        assert_eq!(args.cycle.on_conflict, Some(ConflictPolicy::Skip));
        assert_eq!(args.cycle.budget_files, Some(10));
        assert_eq!(args.cycle.budget_bytes, Some(1 << 30));
        assert_eq!(args.sleep, Some(5));
    }

    #[test]
    fn test_run_args_apply() {
        let cli = Cli::try_parse_from([
            "hashmerge",
            "run",
            "--once",
            "--confirm",
            "--on-conflict",
            "suffix",
            "--cache",
            "/tmp/c.sqlite",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command() else {
            panic!("Expected Run command");
        };

        let mut config = Config::default();
        args.apply(&mut config);
        assert!(!config.daemon.run_forever);
        assert!(!config.auto_merge);
        assert_eq!(config.on_conflict, ConflictPolicy::Version);
        assert_eq!(config.cache_db, Some(PathBuf::from("/tmp/c.sqlite")));
        assert_eq!(config.budget, Config::default().budget);
    }

    #[test]
    fn test_cli_parse_plan() {
        let cli = Cli::try_parse_from(["hashmerge", "plan", "--summary", "--clear-cache"]).unwrap();
        let command = cli.command();
        assert!(command.cycle_args().clear_cache);
        match command {
            Commands::Plan(args) => assert!(args.summary),
            Commands::Run(_) => panic!("Expected Plan command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_policy() {
        let result = Cli::try_parse_from(["hashmerge", "run", "--on-conflict", "merge"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["hashmerge", "-v", "-q", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["hashmerge", "plan", "-q", "--json-errors"]).unwrap();
        assert!(cli.quiet);
        assert!(cli.json_errors);
    }

    #[test]
    fn test_cli_invalid_subcommand() {
        let result = Cli::try_parse_from(["hashmerge", "scan", "/path"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_version_flag() {
        let result = Cli::try_parse_from(["hashmerge", "--version"]);
        assert!(result.is_err());
    }
}
