//! Diagnostic commands.

use clap::Args;
use console::{style, Emoji};
use pixelbridge_core::config::Config;
use pixelbridge_core::error::ConfigError;
use pixelbridge_core::{paths, ConnectionState};
use pixelbridge_gateway::GatewayConnection;
use std::path::Path;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

static CHECK: Emoji = Emoji("✓", "+");
static CROSS: Emoji = Emoji("✗", "x");
static WARN: Emoji = Emoji("⚠", "!");

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Doctor command arguments.
#[derive(Args)]
pub struct DoctorArgs {
    /// Also attempt a full gateway handshake
    #[arg(long)]
    pub full: bool,
}

/// Run the doctor command.
pub async fn run(args: DoctorArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("pixelbridge doctor\n");

    let mut errors = 0;
    let mut warnings = 0;

    // Check directories
    println!("Checking directories...");

    match paths::base_dir() {
        Ok(dir) => {
            if dir.exists() {
                println!("  {} Base directory exists: {:?}", style(CHECK).green(), dir);
            } else {
                println!("  {} Base directory missing: {:?}", style(WARN).yellow(), dir);
                warnings += 1;
            }
        }
        Err(e) => {
            println!("  {} Failed to determine base directory: {}", style(CROSS).red(), e);
            errors += 1;
        }
    }

    // Check config
    println!("\nChecking configuration...");

    let loaded = match config_path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    let config = match loaded {
        Ok(config) => {
            println!("  {} Configuration loaded", style(CHECK).green());
            config.with_env_overrides()
        }
        Err(ConfigError::NotFound(_)) => {
            println!("  {} Configuration file not found, using defaults", style(WARN).yellow());
            println!("    Run 'pixelbridge config init' to create one");
            warnings += 1;
            Config::default().with_env_overrides()
        }
        Err(e) => {
            println!("  {} Configuration error: {}", style(CROSS).red(), e);
            errors += 1;
            Config::default().with_env_overrides()
        }
    };

    match config.validate() {
        Ok(()) => println!("  {} Configuration valid", style(CHECK).green()),
        Err(e) => {
            println!("  {} Configuration invalid: {}", style(CROSS).red(), e);
            errors += 1;
        }
    }

    match &config.gateway.token {
        Some(token) if !token.is_empty() => {
            println!("  {} Gateway token is set", style(CHECK).green());
        }
        _ => {
            println!("  {} Gateway token not set", style(WARN).yellow());
            warnings += 1;
        }
    }

    // Check gateway
    println!("\nChecking gateway...");

    match gateway_addr(&config.gateway.url) {
        Some((host, port)) => {
            let attempt = TcpStream::connect((host.as_str(), port));
            match tokio::time::timeout(CONNECT_TIMEOUT, attempt).await {
                Ok(Ok(_)) => {
                    println!("  {} Gateway reachable at {}:{}", style(CHECK).green(), host, port);
                }
                _ => {
                    println!("  {} Gateway not reachable at {}:{}", style(CROSS).red(), host, port);
                    errors += 1;
                }
            }
        }
        None => {
            println!("  {} Cannot parse gateway url: {}", style(CROSS).red(), config.gateway.url);
            errors += 1;
        }
    }

    if args.full {
        match handshake(&config).await {
            ConnectionState::Connected => {
                println!("  {} Gateway handshake succeeded", style(CHECK).green());
            }
            state => {
                println!("  {} Gateway handshake failed (state: {})", style(CROSS).red(), state);
                errors += 1;
            }
        }
    }

    // Check observer port
    println!("\nChecking observer port...");

    match TcpListener::bind(("127.0.0.1", config.observer.port)).await {
        Ok(_) => {
            println!("  {} Port {} is free", style(CHECK).green(), config.observer.port);
        }
        Err(_) => {
            println!(
                "  {} Port {} is in use (a bridge may already be running)",
                style(WARN).yellow(),
                config.observer.port
            );
            warnings += 1;
        }
    }

    // Summary
    println!("\n{}", style("Summary").bold());
    let errors_styled = if errors > 0 {
        style(errors).red()
    } else {
        style(errors).green()
    };
    let warnings_styled = if warnings > 0 {
        style(warnings).yellow()
    } else {
        style(warnings).green()
    };
    println!("  Errors: {}", errors_styled);
    println!("  Warnings: {}", warnings_styled);

    if errors > 0 {
        anyhow::bail!("{} error(s) found", errors);
    }

    Ok(())
}

/// Host and port of a ws:// or wss:// URL.
fn gateway_addr(raw: &str) -> Option<(String, u16)> {
    let url = url::Url::parse(raw).ok()?;
    let port = url.port().or(match url.scheme() {
        "ws" => Some(80),
        "wss" => Some(443),
        _ => None,
    })?;
    Some((url.host_str()?.to_string(), port))
}

/// Connect once and report where the handshake ended up.
async fn handshake(config: &Config) -> ConnectionState {
    let (gateway, _events) = GatewayConnection::new(config.gateway.clone());
    let mut state = gateway.subscribe_state();
    gateway.connect();

    let wait = Duration::from_millis(config.gateway.handshake_timeout_ms) + CONNECT_TIMEOUT;
    let settled = tokio::time::timeout(
        wait,
        state.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Error)),
    )
    .await;
    let result = match settled {
        Ok(Ok(state)) => *state,
        _ => gateway.state(),
    };
    gateway.disconnect();
    result
}
