//! Inbound HTTP surface for the callback pipeline.
//!
//! Axum with body limits and request timeouts. Responses follow the platform
//! contract rather than HTTP conventions: verification failures answer with
//! an empty 200 body (the platform treats non-success statuses as delivery
//! failures and retries), and event deliveries always get a success token
//! once admission is settled.

mod callback;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::dispatch::CallbackDispatcher;

/// Maximum callback body size. Platform envelopes are small; 64KB is ample.
const MAX_BODY_SIZE: usize = 65_536;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all gateway handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<CallbackDispatcher>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/wecom/callback",
            get(callback::handle_verify).post(callback::handle_callback),
        )
        .route("/healthz", get(|| async { "ok" }))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
                .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS))),
        )
        .with_state(state)
}

pub async fn run_gateway(host: &str, port: u16, dispatcher: Arc<CallbackDispatcher>) -> Result<()> {
    let state = AppState { dispatcher };
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind gateway on {addr}"))?;
    tracing::info!("callback gateway listening on {addr}");

    axum::serve(listener, app)
        .await
        .context("gateway server exited")?;
    Ok(())
}
