//! `hal-cache` - inspect and maintain a durable cache directory

use clap::{Parser, Subcommand};
use hal_cache::{logging, CacheConfig, CacheManager, Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "hal-cache")]
#[command(about = "Inspect and maintain a hal-cache durable store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to $HAL_CACHE_CONFIG_PATH/<env>.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Durable cache directory, overrides the configuration
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Durable tier budget in megabytes
    #[arg(long)]
    max_size_mb: Option<u64>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show tier statistics
    Stats,

    /// Print the value stored under a key
    Get { key: String },

    /// Remove a key from the store
    Delete { key: String },

    /// Remove expired and unreadable records
    Cleanup,

    /// Remove every record
    Clear,

    /// Clean up and print tuning recommendations
    Optimize,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose)?;

    let config = resolve_config(&cli)?;
    debug!(?config, "resolved configuration");
    if config.durable.is_none() {
        warn!("no durable directory configured; operating on an empty memory tier");
    }

    let cache = CacheManager::new(&config)?;

    match cli.command {
        Commands::Stats => print_json(&cache.stats())?,
        Commands::Get { key } => match cache.get(&key) {
            Some(value) => print_json(&value)?,
            None => {
                eprintln!("{}: not found", key);
                return Ok(ExitCode::FAILURE);
            }
        },
        Commands::Delete { key } => {
            if !cache.delete(&key) {
                eprintln!("{}: not found", key);
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Cleanup => print_json(&cache.cleanup_expired())?,
        Commands::Clear => {
            let removed = cache.clear();
            println!("removed {} records", removed);
        }
        Commands::Optimize => print_json(&cache.optimize())?,
    }

    Ok(ExitCode::SUCCESS)
}

fn resolve_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = CacheConfig::load_from_file(path)?;
            config.override_from_env()?;
            config
        }
        None => CacheConfig::load()?,
    };

    if let Some(dir) = &cli.dir {
        let max_size_bytes = config
            .durable
            .as_ref()
            .map_or(hal_cache::config::DEFAULT_DURABLE_MAX_BYTES, |d| d.max_size_bytes);
        config = config.with_durable(dir, max_size_bytes);
    }

    if let Some(mb) = cli.max_size_mb {
        match config.durable.as_mut() {
            Some(durable) => {
                durable.max_size_bytes = megabytes_to_bytes(mb)?;
            }
            None => {
                return Err(Error::Config(
                    "--max-size-mb requires a durable directory".to_string(),
                ))
            }
        }
    }

    config.validate()?;
    Ok(config)
}

fn megabytes_to_bytes(mb: u64) -> Result<u64> {
    mb.checked_mul(1024 * 1024)
        .ok_or_else(|| Error::Config(format!("--max-size-mb {} is too large", mb)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
