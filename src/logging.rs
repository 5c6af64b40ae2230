//! Logging setup for hashmerge.
//!
//! Uses the `log` facade with the `env_logger` backend. The level comes from,
//! in priority order:
//!
//! 1. `RUST_LOG` (if set)
//! 2. CLI flags: `--quiet` (errors only) or `-v`/`-vv` (debug/trace)
//! 3. Default: info
//!
//! hashmerge usually runs as a long-lived service, so every line carries a
//! local timestamp. Module paths are added from debug level upwards.
//!
//! ```rust,no_run
//! use hashmerge::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("cache opened");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Initialize logging from the CLI verbosity flags.
///
/// # Panics
///
/// Panics if called more than once per process (an `env_logger`
/// restriction).
pub fn init_logging(verbose: u8, quiet: bool) {
    let from_env = env::var("RUST_LOG").is_ok();

    let mut builder = Builder::new();
    if from_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(determine_level(verbose, quiet));
    }
    configure_format(&mut builder, verbose);
    builder.init();

    log::debug!("Logging initialized at level {}", current_level_name());
}

/// Level for the given flags; `quiet` wins over `verbose`.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn configure_format(builder: &mut Builder, verbose: u8) {
    builder.format(move |buf, record| {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let level = record.level();
        let style = buf.default_level_style(level);

        if verbose >= 1 {
            writeln!(
                buf,
                "[{stamp}] {style}{level:<5}{style:#} [{}] {}",
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        } else {
            writeln!(buf, "[{stamp}] {style}{level:<5}{style:#} {}", record.args())
        }
    });
}

/// The current maximum log level as a lowercase name.
pub fn current_level_name() -> &'static str {
    match log::max_level() {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}
