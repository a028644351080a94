//! Liveness endpoint for the worker.
//!
//! `GET /health` answers `200 {"msg":"worker healthy"}`; every other path is
//! a 404. The server listens on port 4100.

use std::net::{IpAddr, SocketAddr};

use axum::{Json, Router, http::StatusCode, routing::get};
use hash_ai_config::HealthConfig;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const HEALTH_PORT: u16 = 4100;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Invalid health bind host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("Health server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    msg: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { msg: "worker healthy" })
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

pub fn build_router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(not_found)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// The socket address for the configured bind host.
pub fn bind_address(config: &HealthConfig) -> Result<SocketAddr, HealthError> {
    let host = config.host.trim_start_matches('[').trim_end_matches(']');
    let ip: IpAddr = match host {
        "localhost" => IpAddr::from([127, 0, 0, 1]),
        other => other.parse().map_err(|e: std::net::AddrParseError| HealthError::InvalidHost {
            host: config.host.clone(),
            reason: e.to_string(),
        })?,
    };
    Ok(SocketAddr::new(ip, HEALTH_PORT))
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(config: &HealthConfig, shutdown: CancellationToken) -> Result<(), HealthError> {
    let addr = bind_address(config)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Health server listening");

    axum::serve(listener, build_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
