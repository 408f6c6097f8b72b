//! The RPC status endpoint and Prometheus exporter (§6): two independent listeners, same as the
//! teacher's two-port pattern, but served with plain [`axum::serve`] — no TLS termination, no
//! `axum_server` handle, since the RPC surface here is operator-only and sits behind an internal
//! network boundary.

use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use axum::{routing::get, Router};
use snafu::{ResultExt, Snafu};
use tokio::{net::TcpListener, sync::Notify};
use tracing::info;

use crate::{
    leader::LeaderCandidate,
    metrics::Metrics,
    registry::{JobPolicyRegistry, NodeRegistry},
};
use replicator_state::StateStoreImplementation;

mod metrics;
mod status;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to bind RPC listener on {addr}"))]
    BindRpcListener { source: std::io::Error, addr: SocketAddr },

    #[snafu(display("Failed to bind metrics listener on {addr}"))]
    BindMetricsListener { source: std::io::Error, addr: SocketAddr },

    #[snafu(display("RPC server error"))]
    ServeRpc { source: std::io::Error },

    #[snafu(display("Metrics server error"))]
    ServeMetrics { source: std::io::Error },
}

pub struct AppState {
    pub leader: Arc<LeaderCandidate>,
    pub node_registry: Arc<NodeRegistry>,
    pub job_registry: Arc<JobPolicyRegistry>,
    pub state_store: Arc<StateStoreImplementation>,
    pub metrics: Arc<Metrics>,
}

pub async fn start_http_server(rpc_port: u16, metrics_port: u16, state: Arc<AppState>, shutdown: Arc<Notify>) -> Result<(), Error> {
    let metrics_addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, metrics_port));
    let metrics_listener = TcpListener::bind(metrics_addr).await.context(BindMetricsListenerSnafu { addr: metrics_addr })?;
    let metrics_app = Router::new().route("/metrics", get(metrics::get)).with_state(Arc::clone(&state));

    info!(addr = %metrics_addr, "Starting metrics exporter");
    let metrics_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let server = axum::serve(metrics_listener, metrics_app.into_make_service());
        if let Err(error) = server.with_graceful_shutdown(wait(metrics_shutdown)).await {
            tracing::error!(%error, "Metrics server exited with an error");
        }
    });

    let rpc_addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, rpc_port));
    let rpc_listener = TcpListener::bind(rpc_addr).await.context(BindRpcListenerSnafu { addr: rpc_addr })?;
    let rpc_app = Router::new().route("/v1/status", get(status::get_status)).with_state(state);

    info!(addr = %rpc_addr, "Starting RPC status listener");
    axum::serve(rpc_listener, rpc_app.into_make_service())
        .with_graceful_shutdown(wait(shutdown))
        .await
        .context(ServeRpcSnafu)?;

    info!("HTTP server shut down");
    Ok(())
}

async fn wait(shutdown: Arc<Notify>) {
    shutdown.notified().await;
}
