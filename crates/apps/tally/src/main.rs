//! Tally - channel metrics sync from the command line
//!
//! Every command prints its JSON outcome to stdout and exits non-zero when
//! the outcome is an error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use channel_sync::{ApiCredentials, CommandResult, EngineConfig, ProviderMode, SyncService};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "tally", version, about = "Channel metrics sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Engine config file (default: ~/.config/tally/engine.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Warehouse database, overriding the config file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Provider mode for this invocation only
    #[arg(long, global = true)]
    mode: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fresh sync for a channel
    Sync {
        channel_id: String,
        /// Profile the run is attributed to
        #[arg(long)]
        profile: Option<String>,
        /// Number of recent items to collect
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Resume a failed sync run from its checkpoint
    Resume {
        sync_run_id: i64,
        channel_id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the active mode and the modes that can be activated
    Status,
    /// Switch provider mode (fake, real, record) and keep it as the default
    Mode { mode: String },
    /// Call every provider endpoint without persisting anything
    Probe {
        channel_id: String,
        /// Item ids to fetch stats for (default: the recent items)
        #[arg(long = "item")]
        items: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show a persisted sync run
    Run { sync_run_id: i64 },
}

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    };
    if let Some(database) = &cli.database {
        config.database_path = Some(database.clone());
    }
    Ok(config)
}

fn build_service(config: EngineConfig) -> anyhow::Result<SyncService> {
    let mut builder = SyncService::builder(config)
        .admission(|mode: ProviderMode| mode == ProviderMode::Fake || ApiCredentials::is_available());

    match ApiCredentials::load() {
        Ok(credentials) => builder = builder.credentials(credentials),
        Err(e) => {
            warn!("YouTube API key not found, real and record modes are unavailable: {e}");
            if let Some(path) = ApiCredentials::default_credentials_path() {
                warn!(
                    "To configure YouTube access, either:\n\
                     1. Place {{\"apiKey\": \"...\"}} at: {}\n\
                     2. Or set the YOUTUBE_API_KEY environment variable",
                    path.display()
                );
            }
        }
    }

    builder.build()
}

fn print<T: Serialize>(result: &CommandResult<T>) -> ExitCode {
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to encode result: {e}"),
    }
    if result.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    let service = build_service(config)?;

    if let Some(mode) = &cli.mode {
        let result = service.set_mode(mode);
        if !result.ok {
            return Ok(print(&result));
        }
    }

    let limit = |limit: Option<usize>| limit.unwrap_or(service.default_recent_limit());

    let code = match cli.command {
        Commands::Sync {
            channel_id,
            profile,
            limit: recent,
        } => print(
            &service
                .start_sync(&channel_id, profile.as_deref(), limit(recent))
                .await,
        ),
        Commands::Resume {
            sync_run_id,
            channel_id,
            limit: recent,
        } => print(
            &service
                .resume_sync(sync_run_id, &channel_id, limit(recent))
                .await,
        ),
        Commands::Status => print(&service.get_status()),
        Commands::Mode { mode } => {
            let result = service.set_mode(&mode);
            if let Some(status) = &result.data {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => EngineConfig::default_path()
                        .context("Could not determine config directory")?,
                };
                EngineConfig::persist_default_mode(&path, status.mode)?;
                info!("Default mode is now {} ({})", status.mode.as_str(), path.display());
            }
            print(&result)
        }
        Commands::Probe {
            channel_id,
            items,
            limit: recent,
        } => print(&service.probe(&channel_id, &items, limit(recent)).await),
        Commands::Run { sync_run_id } => print(&service.get_sync_run(sync_run_id).await),
    };
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {e}");
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
