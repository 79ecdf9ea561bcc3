//! Remote-procedure surface: stateless host-automation wrappers behind typed
//! request/response JSON endpoints, run as its own process away from the
//! callback gateway.

mod actions;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::OpsConfig;

const MAX_BODY_SIZE: usize = 262_144;

/// Uniform response shape: `(status code, message, payload)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsResponse {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl OpsResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            code: 200,
            message: "ok".to_string(),
            data,
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchMediaRequest {
    pub url: String,
    /// Target container/extension, e.g. "mp3".
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HtmlRenderRequest {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestartServiceRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpProxyRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Clone)]
struct OpsState {
    config: Arc<OpsConfig>,
    client: reqwest::Client,
}

pub fn build_router(config: OpsConfig) -> Router {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default();
    let state = OpsState {
        config: Arc::new(config),
        client,
    };
    Router::new()
        .route("/ops/fetch-media", post(fetch_media))
        .route("/ops/html-to-image", post(html_to_image))
        .route("/ops/html-to-pdf", post(html_to_pdf))
        .route("/ops/restart-service", post(restart_service))
        .route("/ops/http-proxy", post(http_proxy))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(state)
}

pub async fn run_ops(config: OpsConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(config);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind ops server on {addr}"))?;
    tracing::info!("ops server listening on {addr}");
    axum::serve(listener, app)
        .await
        .context("ops server exited")?;
    Ok(())
}

async fn fetch_media(
    State(state): State<OpsState>,
    Json(request): Json<FetchMediaRequest>,
) -> Json<OpsResponse> {
    Json(actions::fetch_media(&state.config, &state.client, &request).await)
}

async fn html_to_image(
    State(state): State<OpsState>,
    Json(request): Json<HtmlRenderRequest>,
) -> Json<OpsResponse> {
    Json(actions::render_html(&state.config, &request, actions::RenderTarget::Image).await)
}

async fn html_to_pdf(
    State(state): State<OpsState>,
    Json(request): Json<HtmlRenderRequest>,
) -> Json<OpsResponse> {
    Json(actions::render_html(&state.config, &request, actions::RenderTarget::Pdf).await)
}

async fn restart_service(
    State(state): State<OpsState>,
    Json(request): Json<RestartServiceRequest>,
) -> Json<OpsResponse> {
    Json(actions::restart_service(&state.config, &request).await)
}

async fn http_proxy(
    State(state): State<OpsState>,
    Json(request): Json<HttpProxyRequest>,
) -> Json<OpsResponse> {
    Json(actions::http_proxy(&state.client, &request).await)
}
