use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

mod cli;
mod config;

use gemgate_core::{Gateway, GatewayConfig, ProxySetting, TransportConfig, WreqTransport};
use gemgate_pool::key_preview;
use gemgate_router::{AppState, gateway_router};

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("gemgate failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let keys = config::load_keys(&cli)?;
    if keys.is_empty() {
        warn!("no API keys configured; chat requests will fail until /admin/reload");
    }

    let proxy = ProxySetting::new(cli.proxy.clone());
    let transport = {
        let proxy = proxy.clone();
        WreqTransport::new_with_proxy_resolver(TransportConfig::default(), move || proxy.get())
            .context("building upstream client")?
    };
    let config = GatewayConfig {
        base_url: cli.base_url.clone(),
        max_retries: cli.max_retries,
        default_model: cli.default_model.clone(),
        proxy,
        ..GatewayConfig::default()
    };
    info!(
        host = %cli.host,
        port = cli.port,
        base_url = %config.base_url,
        default_model = %config.default_model,
        max_retries = config.max_retries,
        proxy = %cli.proxy.as_deref().unwrap_or(""),
        admin_protected = cli.admin_key.is_some(),
        "config loaded"
    );

    let gateway = Arc::new(Gateway::new(config, Arc::new(transport)));
    for input in &keys {
        info!(key = %key_preview(&input.key), source = %input.source, "key configured");
    }
    gateway.reload(keys);

    let app = gateway_router(AppState {
        gateway,
        admin_key: cli.admin_key.clone().filter(|key| !key.trim().is_empty()),
        port: Some(cli.port),
    });

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    info!("shut down");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gemgate=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
}
