use anyhow::{Context, Result};
use clap::Parser;
use relay_hub::{build, serve, telemetry::Telemetry, Cli, HubConfig};
use tokio::{net::TcpListener, signal};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HubConfig::try_from(cli)?;
    let telemetry = Telemetry::init(&config.telemetry)?;
    let roles: Vec<&str> = config.roles.iter().map(|role| role.as_str()).collect();
    info!(
        listen_addr = %config.listen_addr,
        roles = ?roles,
        heartbeat_secs = config.heartbeat.interval.as_secs(),
        heartbeat_max_missed = config.heartbeat.max_missed,
        static_dir = ?config.static_dir,
        "starting relay-hub"
    );

    let (_state, router) = build(&config, Some(telemetry.metrics_handle()));
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("relay-hub listening on ws://{}/ws", config.listen_addr);

    serve(listener, router, shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
