//! Status command.

use clap::Args;
use console::style;
use pixelbridge_core::config::Config;
use serde_json::Value;
use std::time::Duration;

/// Status command arguments.
#[derive(Args)]
pub struct StatusArgs {
    /// Observer server port (defaults to the configured port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Print the raw health JSON
    #[arg(long)]
    pub json: bool,
}

/// Query `/health` on a running bridge.
pub async fn run(args: StatusArgs, config: Config) -> anyhow::Result<()> {
    let port = args.port.unwrap_or(config.observer.port);
    let url = format!("http://127.0.0.1:{}/health", port);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()?;

    let health: Value = match client.get(&url).send().await {
        Ok(response) => response.error_for_status()?.json().await?,
        Err(_) => {
            println!("Bridge is not running (port {}).", port);
            return Ok(());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&health)?);
        return Ok(());
    }

    println!("{}", style("pixelbridge").bold());
    println!("  Observer port:    {}", port);
    println!("  Observers:        {}", health["observers"]);
    println!("  Gateway:          {}", health["gateway"]["url"].as_str().unwrap_or("-"));
    println!("  Gateway state:    {}", format_state(&health["gateway"]["state"]));
    println!("  Pending requests: {}", health["gateway"]["pendingRequests"]);
    Ok(())
}

fn format_state(state: &Value) -> String {
    match state.as_str() {
        Some("connected") => style("connected").green().to_string(),
        Some("error") => style("error").red().to_string(),
        Some(other) => style(other).yellow().to_string(),
        None => "-".to_string(),
    }
}
