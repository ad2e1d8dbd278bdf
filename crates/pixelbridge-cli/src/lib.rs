//! pixelbridge command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};
use pixelbridge_core::config::{Config, LogLevel};
use pixelbridge_core::error::ConfigError;
use std::path::{Path, PathBuf};

/// pixelbridge - agent gateway to observer bridge
#[derive(Parser)]
#[command(name = "pixelbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "PIXELBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the gateway and serve observers
    Run(commands::run::RunArgs),

    /// Query a running bridge
    Status(commands::status::StatusArgs),

    /// Configuration management
    Config(commands::config::ConfigArgs),

    /// Run diagnostics
    Doctor(commands::doctor::DoctorArgs),

    /// Show version information
    Version,
}

/// Run the CLI with the given arguments.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => commands::run::run(args, load_config(config_path)?).await,
        Commands::Status(args) => commands::status::run(args, load_config(config_path)?).await,
        Commands::Config(args) => commands::config::run(args, config_path).await,
        Commands::Doctor(args) => commands::doctor::run(args, config_path).await,
        Commands::Version => {
            println!("pixelbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Load the config from an explicit path, or the default location with
/// fallback to defaults. Environment overrides apply either way.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Ok(Config::load(path)?.with_env_overrides()),
        None => Ok(Config::load_or_default()),
    }
}

/// `EnvFilter` directive for the configured level, raised one step per `-v`.
pub fn log_directive(level: LogLevel, verbose: u8) -> String {
    let levels = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];
    let base = levels.iter().position(|l| *l == level).unwrap_or(2);
    let effective = levels[(base + verbose as usize).min(levels.len() - 1)];
    let lvl = effective.as_str();
    ["pixelbridge", "pixelbridge_core", "pixelbridge_gateway", "pixelbridge_server"]
        .iter()
        .map(|target| format!("{}={}", target, lvl))
        .collect::<Vec<_>>()
        .join(",")
}
