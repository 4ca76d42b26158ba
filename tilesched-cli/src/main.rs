//! tilesched CLI - Command-line interface
//!
//! Diagnostics for the tilesched scheduler: run synthetic load against it,
//! fetch real tiles through it, and inspect the configuration file.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilesched::config::config_file_path;
use tilesched::logging::init_logging;
use tilesched::SchedulerConfig;

use commands::fetch::FetchArgs;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilesched")]
#[command(about = "Map tile request scheduler diagnostics", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.tilesched/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run synthetic providers against the scheduler and report statistics
    Simulate {
        /// Number of providers (map layers) sharing the tile type
        #[arg(long, default_value = "3")]
        providers: usize,

        /// Tiles submitted per provider
        #[arg(long, default_value = "50")]
        tiles: usize,

        /// Global concurrency for the simulated tile type
        #[arg(long)]
        concurrency: Option<usize>,

        /// Concurrency of each provider
        #[arg(long, default_value = "2")]
        provider_concurrency: usize,

        /// Simulated fetch latency in milliseconds
        #[arg(long, default_value = "100")]
        latency_ms: u64,

        /// Number of providers marked hidden
        #[arg(long, default_value = "0")]
        hidden: usize,

        /// Statistics reporting interval in milliseconds
        #[arg(long, default_value = "500")]
        report_ms: u64,
    },

    /// Fetch tiles over HTTP through the scheduler
    Fetch {
        /// Tile URL (repeatable)
        #[arg(long = "url", required = true)]
        urls: Vec<String>,

        /// Concurrent downloads
        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Inspect the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration
    Show,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let path = cli.config.clone().unwrap_or_else(config_file_path);
    let mut config = SchedulerConfig::load_from(&path)?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    if let Commands::Config { action } = &cli.command {
        match action {
            ConfigAction::Path => commands::config::run_path(&path),
            ConfigAction::Show => commands::config::run_show(&config),
        }
        return Ok(());
    }

    let _logging = init_logging(&config.logging).map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    match cli.command {
        Commands::Simulate {
            providers,
            tiles,
            concurrency,
            provider_concurrency,
            latency_ms,
            hidden,
            report_ms,
        } => runtime.block_on(commands::simulate::run(
            SimulateArgs {
                providers,
                tiles,
                concurrency,
                provider_concurrency,
                latency_ms,
                hidden,
                report_ms,
            },
            config,
        )),
        Commands::Fetch {
            urls,
            concurrency,
            timeout,
        } => runtime.block_on(commands::fetch::run(
            FetchArgs {
                urls,
                concurrency,
                timeout_secs: timeout,
            },
            config,
        )),
        Commands::Config { .. } => Ok(()),
    }
}
