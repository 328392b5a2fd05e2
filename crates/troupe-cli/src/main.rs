use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use troupe_core::config::TroupeConfig;

mod commands;

#[derive(Parser)]
#[command(name = "troupe")]
#[command(about = "TROUPE CLI - inspect scenario types, configuration and templates", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered scenario types
    Scenarios,
    /// Inspect configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect template catalogs
    Templates {
        #[command(subcommand)]
        action: TemplatesAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse a config file and print the effective configuration
    Check { file: PathBuf },
}

#[derive(Subcommand)]
enum TemplatesAction {
    /// List actor and scenario templates. Uses `[templates].path` when no file is given.
    List { file: Option<PathBuf> },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TroupeConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TroupeConfig::default(),
    };
    troupe_telemetry::init_tracing(&config.logging, cli.log_json)?;

    let output = match cli.command {
        Commands::Scenarios => commands::scenarios::list(),
        Commands::Config { action } => match action {
            ConfigAction::Check { file } => commands::config::check(&file)?,
        },
        Commands::Templates { action } => match action {
            TemplatesAction::List { file } => {
                let path = file
                    .or_else(|| config.templates.resolved_path())
                    .context("No template catalog given and no config directory found")?;
                commands::templates::list(&path)?
            }
        },
    };
    print!("{output}");

    Ok(())
}
