//! rescache - resource fetch-and-cache CLI
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use rescache::cli::{Cli, Commands};
use rescache::config::{Config, ConfigManager};
use rescache::error::RescacheResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging: 0 = warn, 1 = info, 2+ = debug
fn init_logging(verbose: u8, config: &Config) {
    let filter = match verbose {
        0 => EnvFilter::new("rescache=warn"),
        1 => EnvFilter::new("rescache=info"),
        _ => EnvFilter::new("rescache=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.with_target(false).without_time().init();
    }
}

async fn run() -> RescacheResult<ExitCode> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions { shell } = cli.command {
        rescache::cli::commands::completions(shell);
        return Ok(ExitCode::SUCCESS);
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Completions { .. } => unreachable!("Completions handled above"),
        Commands::LockName(args) => rescache::cli::commands::lock_name(args, &config)?,
        Commands::Find(args) => {
            if !rescache::cli::commands::find(args, &config).await? {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Get(args) => rescache::cli::commands::get(args, &config).await?,
        Commands::Config(args) => {
            rescache::cli::commands::config(args, &config_manager, &config).await?
        }
    }

    Ok(ExitCode::SUCCESS)
}
