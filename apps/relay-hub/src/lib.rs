//! Relay hub: admits senders and viewers over WebSocket, keeps the connection
//! registry, and fans every sender payload out to the viewers of its role.

pub mod admission;
pub mod alerts;
pub mod broadcast;
pub mod config;
pub mod registry;
pub mod routes;
pub mod sensor;
pub mod session;
pub mod state;
pub mod stats;
pub mod telemetry;

use std::{future::Future, net::SocketAddr};

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;

pub use config::{Cli, HubConfig};
pub use state::{AppState, SharedState};

/// State plus the router serving it.
pub fn build(config: &HubConfig, metrics: Option<PrometheusHandle>) -> (SharedState, Router) {
    let state = AppState::new(config, metrics);
    let router = routes::router(state.clone(), config.static_dir.as_deref());
    (state, router)
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
