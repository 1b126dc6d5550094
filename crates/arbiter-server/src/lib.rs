//! HTTP service for the arbiter decision control plane: store backends,
//! audit chain, authorization engine, and the event pipeline behind the
//! `/v1` surface.

mod audit;
mod authz;
mod error;
mod http;
mod pipeline;
mod store;

pub use audit::{verify_audit_chain, verify_audit_chain_with_mirror};
pub use pipeline::AppState;

use arbiter_config::Config;
use axum::Router;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid listen_addr: {0}")]
    ListenAddr(String),
    #[error("startup failed: {0}")]
    Startup(String),
    #[error("bind failed: {0}")]
    Bind(std::io::Error),
    #[error("serve failed: {0}")]
    Serve(std::io::Error),
}

pub async fn build_app(cfg: Config) -> Result<Router, ServeError> {
    let state = AppState::new(cfg).map_err(ServeError::Startup)?;
    Ok(http::router(state))
}

pub async fn serve(cfg: Config) -> Result<(), ServeError> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|err| ServeError::ListenAddr(format!("{}: {err}", cfg.server.listen_addr)))?;
    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(ServeError::Bind)?;
    info!(%addr, "arbiter listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServeError::Serve)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
