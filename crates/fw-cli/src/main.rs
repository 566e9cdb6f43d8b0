use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fw_cli::commands::{clients, history, parse};
use fw_cli::{Cli, Commands, Config};

/// Load config and open the history database, ensuring the parent
/// directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(fw_db::HistoryDatabase, Config)> {
    let config = load_config(config_path)?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = fw_db::HistoryDatabase::open(&config.database_path)
        .context("failed to open history database")?;
    Ok((db, config))
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    config
        .validate_clients()
        .context("invalid client configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let mut stdout = std::io::stdout().lock();

    match &cli.command {
        Some(Commands::Parse { files }) => {
            parse::run(&mut stdout, files)?;
        }
        Some(Commands::History { slot, since }) => {
            let since = since
                .as_deref()
                .map(|s| {
                    s.parse::<DateTime<Utc>>()
                        .with_context(|| format!("invalid --since timestamp: {s}"))
                })
                .transpose()?;
            let (db, _config) = open_database(cli.config.as_deref())?;
            history::run(&mut stdout, &db, slot.as_deref(), since)?;
        }
        Some(Commands::Clients) => {
            let config = load_config(cli.config.as_deref())?;
            clients::run(&mut stdout, &config)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
