//! pixelbridge CLI entry point.

use clap::Parser;
use pixelbridge_cli::{load_config, log_directive, run, Cli};
use pixelbridge_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging from config, falling back to defaults if it cannot be read
    let logging = load_config(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();
    init_tracing(&logging, cli.verbose);

    // Run the command
    run(cli).await
}

fn init_tracing(logging: &LoggingConfig, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(logging.level, verbose)));

    // stdout is reserved for command output
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}
