//! Run command.

use clap::Args;
use pixelbridge_core::config::{BindMode, Config};
use pixelbridge_core::paths;
use pixelbridge_gateway::GatewayConnection;
use pixelbridge_server::{
    AssetSource, Bridge, FileAssetSource, FileLayoutStore, LayoutStore, NoAssets, ObserverServer,
};
use std::sync::Arc;
use tracing::info;

/// Run command arguments.
#[derive(Args)]
pub struct RunArgs {
    /// Gateway WebSocket URL
    #[arg(long)]
    pub gateway_url: Option<String>,

    /// Gateway auth token
    #[arg(long)]
    pub token: Option<String>,

    /// Observer server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Observer bind mode (loopback, lan)
    #[arg(short, long)]
    pub bind: Option<String>,
}

/// Apply command-line overrides on top of the loaded config.
pub fn apply_overrides(mut config: Config, args: RunArgs) -> anyhow::Result<Config> {
    if let Some(url) = args.gateway_url {
        config.gateway.url = url;
    }
    if let Some(token) = args.token {
        config.gateway.token = Some(token.into());
    }
    if let Some(port) = args.port {
        config.observer.port = port;
    }
    if let Some(bind) = args.bind {
        config.observer.bind = match bind.as_str() {
            "loopback" => BindMode::Loopback,
            "lan" => BindMode::Lan,
            _ => anyhow::bail!("Invalid bind mode: {}", bind),
        };
    }
    config.validate()?;
    Ok(config)
}

/// Run the bridge until Ctrl-C.
pub async fn run(args: RunArgs, config: Config) -> anyhow::Result<()> {
    let config = apply_overrides(config, args)?;

    let assets: Arc<dyn AssetSource> = match &config.assets.catalog_path {
        Some(path) => Arc::new(FileAssetSource::new(path)),
        None => Arc::new(NoAssets),
    };
    let layouts: Arc<dyn LayoutStore> = match &config.assets.layout_path {
        Some(path) => Arc::new(FileLayoutStore::new(path)),
        None => Arc::new(FileLayoutStore::new(paths::layout_file()?)),
    };

    let (gateway, events) = GatewayConnection::new(config.gateway.clone());
    let bridge = Bridge::new(gateway.clone(), events)
        .with_assets(assets)
        .with_layout_store(layouts);
    let handle = bridge.handle();
    let runtime = tokio::spawn(bridge.run());

    info!(url = %config.gateway.url, "connecting to gateway");
    gateway.connect();

    let server = ObserverServer::new(config.observer.clone(), handle.clone());
    let served = server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await;

    handle.shutdown();
    let _ = runtime.await;
    served?;
    Ok(())
}
