//! mediagate - cost-gated assessment for generated media
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use mediagate::cli::{Cli, Commands};
use mediagate::config::ConfigManager;
use mediagate::error::MediagateResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> MediagateResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug; general.verbose raises the floor to info
    let level = match (cli.verbose, config.general.verbose) {
        (0, false) => "warn",
        (0, true) | (1, _) => "info",
        _ => "debug",
    };
    let filter = EnvFilter::new(format!("mediagate={}", level));

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .without_time()
            .init();
    }

    ConfigManager::ensure_state_dirs(&config).await?;

    match cli.command {
        Commands::Assess(args) => mediagate::cli::commands::assess(args, &config).await,
        Commands::Cache(args) => mediagate::cli::commands::cache(args, &config).await,
        Commands::Budget(args) => mediagate::cli::commands::budget(args, &config).await,
        Commands::Config(args) => {
            mediagate::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
