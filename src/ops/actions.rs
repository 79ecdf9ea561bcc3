//! Implementations of the host-automation operations: shell and HTTP
//! wrappers with per-call bounds, no internal coordination.

use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

use super::{
    FetchMediaRequest, HtmlRenderRequest, HttpProxyRequest, OpsResponse, RestartServiceRequest,
};
use crate::config::OpsConfig;

#[derive(Debug, Clone, Copy)]
pub(super) enum RenderTarget {
    Image,
    Pdf,
}

impl RenderTarget {
    fn binary(self) -> &'static str {
        match self {
            Self::Image => "wkhtmltoimage",
            Self::Pdf => "wkhtmltopdf",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Image => "png",
            Self::Pdf => "pdf",
        }
    }
}

fn sanitize_extension(raw: &str) -> Option<&str> {
    let ext = raw.trim().trim_start_matches('.');
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

async fn run_bounded(mut command: Command, timeout: Duration) -> Result<(), OpsResponse> {
    let status = tokio::time::timeout(timeout, async {
        command
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|err| OpsResponse::error(500, format!("spawn failed: {err}")))
    })
    .await
    .map_err(|_| OpsResponse::error(504, "operation timed out"))??;

    if status.success() {
        Ok(())
    } else {
        Err(OpsResponse::error(
            500,
            format!("command exited with {status}"),
        ))
    }
}

/// Download a remote file into the artifact dir and transcode it with ffmpeg.
pub(super) async fn fetch_media(
    config: &OpsConfig,
    client: &reqwest::Client,
    request: &FetchMediaRequest,
) -> OpsResponse {
    let Some(format) = sanitize_extension(&request.format) else {
        return OpsResponse::error(400, "invalid target format");
    };
    if let Err(err) = tokio::fs::create_dir_all(&config.artifact_dir).await {
        return OpsResponse::error(500, format!("artifact dir unavailable: {err}"));
    }

    let download = match client.get(&request.url).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            return OpsResponse::error(502, format!("download failed: {}", response.status()))
        }
        Err(err) => return OpsResponse::error(502, format!("download failed: {err}")),
    };
    let bytes = match download.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return OpsResponse::error(502, format!("download read failed: {err}")),
    };

    let stem = Uuid::new_v4().to_string();
    let source_path = config.artifact_dir.join(format!("{stem}.src"));
    let target_path = config.artifact_dir.join(format!("{stem}.{format}"));
    if let Err(err) = tokio::fs::write(&source_path, &bytes).await {
        return OpsResponse::error(500, format!("artifact write failed: {err}"));
    }

    let mut command = Command::new("ffmpeg");
    command
        .arg("-y")
        .arg("-i")
        .arg(&source_path)
        .arg(&target_path);
    if let Err(response) =
        run_bounded(command, Duration::from_secs(config.timeout_secs.max(1))).await
    {
        return response;
    }
    remove_quietly(&source_path).await;

    OpsResponse::ok(json!({
        "path": target_path.to_string_lossy(),
        "source_bytes": bytes.len(),
    }))
}

/// Render a URL to an image or PDF with the matching wkhtmlto* binary.
pub(super) async fn render_html(
    config: &OpsConfig,
    request: &HtmlRenderRequest,
    target: RenderTarget,
) -> OpsResponse {
    if !request.url.starts_with("http://") && !request.url.starts_with("https://") {
        return OpsResponse::error(400, "url must be http(s)");
    }
    if let Err(err) = tokio::fs::create_dir_all(&config.artifact_dir).await {
        return OpsResponse::error(500, format!("artifact dir unavailable: {err}"));
    }

    let out_path = config
        .artifact_dir
        .join(format!("{}.{}", Uuid::new_v4(), target.extension()));
    let mut command = Command::new(target.binary());
    command.arg(&request.url).arg(&out_path);
    if let Err(response) =
        run_bounded(command, Duration::from_secs(config.timeout_secs.max(1))).await
    {
        return response;
    }

    OpsResponse::ok(json!({"path": out_path.to_string_lossy()}))
}

/// Restart a local service. Only allow-listed names are accepted; the name is
/// substituted into the configured command, never interpreted by a shell.
pub(super) async fn restart_service(
    config: &OpsConfig,
    request: &RestartServiceRequest,
) -> OpsResponse {
    let name = request.name.trim();
    if !config.restart_allowlist.iter().any(|s| s == name) {
        return OpsResponse::error(403, format!("service '{name}' is not allow-listed"));
    }

    let rendered = config.restart_command.replace("{name}", name);
    let mut parts = rendered.split_whitespace();
    let Some(program) = parts.next() else {
        return OpsResponse::error(500, "restart command is empty");
    };
    let mut command = Command::new(program);
    command.args(parts);
    if let Err(response) =
        run_bounded(command, Duration::from_secs(config.timeout_secs.max(1))).await
    {
        return response;
    }

    OpsResponse::ok(json!({"restarted": name}))
}

/// Best-effort cleanup of an intermediate artifact. A missing file is fine;
/// anything else is logged and the response proceeds.
async fn remove_quietly(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("artifact cleanup failed for {}: {err}", path.display());
        }
    }
}

/// Forward an arbitrary HTTP request and relay status, content type, and body.
pub(super) async fn http_proxy(
    client: &reqwest::Client,
    request: &HttpProxyRequest,
) -> OpsResponse {
    let method = match request.method.parse::<reqwest::Method>() {
        Ok(method) => method,
        Err(_) => return OpsResponse::error(400, "invalid http method"),
    };

    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => return OpsResponse::error(504, "proxy target timed out"),
        Err(err) => return OpsResponse::error(502, format!("proxy request failed: {err}")),
    };

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = response.text().await.unwrap_or_default();
    OpsResponse::ok(json!({
        "status": status,
        "content_type": content_type,
        "body": body,
    }))
}
