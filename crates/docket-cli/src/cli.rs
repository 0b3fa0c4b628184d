//! `docket`: diagnostics for the Docket connection pool
//!
//! Usage:
//!   docket check                      # open the store, probe it, print pool state
//!   docket soak --workers 8           # nested-transaction workload, then statistics
//!   docket memory --samples 5         # sample memory like the pool's monitor
//!   docket config                     # print the effective configuration as TOML
//!
//! The config file defaults to `<config dir>/docket/docket.toml` and can be
//! set with `--config` or `DOCKET_CONFIG`.

mod commands;
mod logging;
mod store;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::soak::SoakOptions;
use crate::logging::{LogFormat, LoggingConfig};

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Connection pool diagnostics", long_about = None)]
#[command(version)]
struct Cli {
    /// Pool configuration file (TOML)
    #[arg(long, short, global = true, env = "DOCKET_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding `storage_path` from the config
    #[arg(long, short, global = true, env = "DOCKET_DATABASE")]
    database: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Console log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Also write rotating JSON logs to the default log directory
    #[arg(long, global = true)]
    log_to_file: bool,

    /// Debug-level logging from every docket crate
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the store, run a probe query and print pool statistics
    Check,

    /// Run a concurrent nested-transaction workload
    Soak {
        /// Concurrent workers
        #[arg(long, short, default_value_t = 4)]
        workers: usize,

        /// Filings per worker
        #[arg(long, short, default_value_t = 100)]
        iterations: usize,

        /// Fail every n-th filing inside its nested scope (0 disables)
        #[arg(long, default_value_t = 10)]
        fail_every: usize,

        /// Pause between filings, in milliseconds
        #[arg(long, default_value_t = 0)]
        pause_ms: u64,
    },

    /// Sample process and system memory
    Memory {
        /// Number of samples
        #[arg(long, short, default_value_t = 5)]
        samples: usize,

        /// Time between samples, in milliseconds
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    };
    logging::init(
        logging
            .with_format(cli.log_format)
            .with_log_dir(cli.log_to_file.then(logging::log_directory)),
    )?;

    let config = store::load_config(cli.config.as_deref(), cli.database.as_deref())?;

    match cli.command {
        Commands::Check => commands::check::run(config, cli.json).await,
        Commands::Soak {
            workers,
            iterations,
            fail_every,
            pause_ms,
        } => {
            let database = store::open_sqlite(config)?;
            let options = SoakOptions {
                workers,
                iterations,
                fail_every,
                pause: Duration::from_millis(pause_ms),
            };
            commands::soak::run(database, options, cli.json).await
        }
        Commands::Memory {
            samples,
            interval_ms,
        } => {
            commands::memory::run(&config, samples, Duration::from_millis(interval_ms), cli.json)
                .await
        }
        Commands::Config => commands::config::run(&config, cli.json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_soak_with_global_flags() {
        let cli = Cli::try_parse_from([
            "docket", "soak", "--workers", "2", "--json", "--database", "cases.db",
        ])
        .expect("parse");
        assert!(cli.json);
        assert_eq!(cli.database, Some(PathBuf::from("cases.db")));
        match cli.command {
            Commands::Soak {
                workers,
                iterations,
                fail_every,
                ..
            } => {
                assert_eq!(workers, 2);
                assert_eq!(iterations, 100);
                assert_eq!(fail_every, 10);
            }
            _ => panic!("expected soak"),
        }
    }
}
