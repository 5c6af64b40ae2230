//! hashmerge - incremental, hash-based one-way merge.
//!
//! Copies every file whose content exists on a remote source host but
//! nowhere below a local target root. Files are compared by content hash,
//! never by path, so renamed or reorganised data is not copied twice.
//! Hashes on both sides live in a SQLite cache and are recomputed only when
//! a file's size or mtime changes, which keeps repeated cycles cheap on
//! large trees.
//!
//! The pieces, in cycle order:
//!
//! - [`refresh`]: observe both trees and hash what changed (remote hashing
//!   is budgeted per cycle)
//! - [`planner`]: hashes present remotely but not locally
//! - [`merge`]: copy the planned paths under a conflict policy
//! - [`output`]: run log, metrics and alert text
//! - [`round`]: the loop tying it together with pruning, scrubbing and
//!   change detection

pub mod alert;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod merge;
pub mod output;
pub mod planner;
pub mod progress;
pub mod refresh;
pub mod remote;
pub mod round;
pub mod scanner;
pub mod scrub;
pub mod session;
pub mod signal;

use std::io::{IsTerminal, Write};

use anyhow::Context;
use chrono::Local;

use crate::cache::HashCache;
use crate::cli::{Cli, Commands};
use crate::config::{Config, Transport};
use crate::error::ExitCode;
use crate::progress::Progress;
use crate::remote::{Connector, LocalChannel, LocalConnector, SshConnector};
use crate::round::{CycleError, CycleMode, CycleOutcome, Engine, RUN_ID_FORMAT};
use crate::signal::ShutdownHandler;

/// Runs the command described by `cli`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the target root is
/// missing, the cache cannot be opened, or a `plan` cycle fails. Failures
/// inside the merge loop are logged and retried on the next cycle.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    log::debug!("hashmerge {}", env!("CARGO_PKG_VERSION"));

    let command = cli.command();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    match &command {
        Commands::Run(args) => args.apply(&mut config),
        Commands::Plan(args) => args.cycle.apply(&mut config),
    }
    config.validate()?;
    config.check_target_root()?;

    let cache_path = config.cache_path();
    let cache = HashCache::new(&cache_path)
        .with_context(|| format!("opening hash cache {}", cache_path.display()))?;
    log::info!("Hash cache: {}", cache_path.display());
    if command.cycle_args().clear_cache {
        cache.clear().context("clearing hash cache")?;
        log::info!("Hash cache cleared");
    }

    let handler = signal::install_handler()?;
    let quiet = cli.quiet;

    match config.remote.transport {
        Transport::Ssh => {
            let connector = SshConnector::new(config.ssh_settings());
            dispatch(command, config, cache, connector, &handler, quiet)
        }
        Transport::Local => {
            let connector = LocalConnector::new(LocalChannel::new(config.source_host()));
            dispatch(command, config, cache, connector, &handler, quiet)
        }
    }
}

fn dispatch<K: Connector>(
    command: Commands,
    config: Config,
    cache: HashCache,
    connector: K,
    handler: &ShutdownHandler,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    let mut engine = Engine::new(config, cache, connector).with_shutdown_flag(handler.get_flag());
    if !quiet && std::io::stderr().is_terminal() {
        engine = engine.with_progress(Box::new(Progress::new(quiet)));
    }

    match command {
        Commands::Plan(args) => {
            let run_id = Local::now().format(RUN_ID_FORMAT).to_string();
            match engine.run_cycle(&run_id, CycleMode::PlanOnly) {
                Ok(outcome) => {
                    print_plan(&outcome, args.summary)?;
                    Ok(ExitCode::Success)
                }
                Err(CycleError::Interrupted) => Ok(ExitCode::Interrupted),
                Err(e) => Err(e.into()),
            }
        }
        Commands::Run(_) => {
            if engine.run_loop(false) {
                Ok(ExitCode::Interrupted)
            } else {
                Ok(ExitCode::Success)
            }
        }
    }
}

/// Writes the plan of `outcome` to stdout as JSON.
fn print_plan(outcome: &CycleOutcome, summary: bool) -> anyhow::Result<()> {
    let plan = &outcome.plan;
    let document = if summary {
        serde_json::json!({
            "run_id": outcome.run_id,
            "algorithm": outcome.algo.to_string(),
            "planned_files": plan.planned_files,
            "planned_bytes": plan.planned_bytes,
            "per_subfolder": plan.per_subfolder,
        })
    } else {
        serde_json::json!({
            "run_id": outcome.run_id,
            "algorithm": outcome.algo.to_string(),
            "plan": plan,
        })
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &document)?;
    writeln!(stdout)?;
    Ok(())
}
