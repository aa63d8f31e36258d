//! cprd — the cpr gateway daemon.
//!
//! Forwards JSON-RPC calls to one upstream node and hands stream
//! parameters over out of band, redirecting unread streams so their bytes
//! travel from the caller to the node directly.
//!
//! # Usage
//!
//! ```text
//! CPR_API_TOKEN=... cprd --api 127.0.0.1:2345 --listen 0.0.0.0:33111
//! ```

mod config;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use cpr_api::{ApiState, build_router};
use cpr_rpc::{ParamDecoder, RpcClient};
use cpr_stream::{HyperTransport, StreamEncoder, StreamRegistry, push_url_for};

use config::{Cli, ProxyConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cprd=debug,cpr=debug".parse().unwrap()),
        )
        .init();

    let config = ProxyConfig::resolve(Cli::parse(), |name| std::env::var(name).ok())?;
    run(config).await
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    info!(upstream = %config.upstream_rpc, "cpr gateway starting");

    // ── Upstream ───────────────────────────────────────────────

    let push_base = push_url_for(&config.upstream_rpc)?;
    let transport = Arc::new(HyperTransport::new().with_bearer(config.token.clone()));
    let encoder = StreamEncoder::new(push_base.to_string(), transport);
    info!(%push_base, "upstream push endpoint");

    let upstream = RpcClient::new(&config.upstream_rpc)?
        .with_bearer(config.token.clone())
        .with_param_encoder(Arc::new(encoder));

    // ── API server ─────────────────────────────────────────────

    let router = build_router(ApiState {
        decoder: ParamDecoder::new(StreamRegistry::new(), config.handoff_timeout),
        upstream: Arc::new(upstream),
    });

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!(addr = %config.listen, handoff_timeout = ?config.handoff_timeout, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("cpr gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
