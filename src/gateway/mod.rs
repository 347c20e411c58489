//! Axum-based HTTP gateway receiving vendor webhooks.
//!
//! - Request body size limit (64KB max)
//! - Request timeouts (30s) to prevent slow-loris stalls
//! - Signature verification over the exact request bytes

mod handlers;
mod signature;

pub use signature::verify_signature;

use crate::config::Config;
use crate::media::MediaQueue;
use crate::store::Store;
use anyhow::{Context, Result};
use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use handlers::{handle_health, handle_webhook};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;


/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub media: Option<MediaQueue>,
    /// Shared secret for webhook HMAC verification. `None` = fail-open.
    pub webhook_secret: Option<Arc<str>>,
}

/// Run the webhook gateway.
pub async fn run_gateway(config: &Config, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .context("parse gateway bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind gateway socket")?;

    run_gateway_with_listener(listener, state).await
}

/// Run the gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    listener: tokio::net::TcpListener,
    state: AppState,
) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("get gateway listener local address")?;

    tracing::info!(
        addr = %local_addr,
        signature = if state.webhook_secret.is_some() { "enforced" } else { "fail-open" },
        "webhook gateway listening"
    );

    let app = build_app(state);
    axum::serve(listener, app)
        .await
        .context("serve webhook gateway")?;

    Ok(())
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/webhook", post(handle_webhook))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}
