use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use super::errors::ApiError;
use super::types::*;
use super::validators::{download_path, validate_content, validate_filename, validate_s3_uri};
use super::ServerState;

/// Directory under the server root that S3 objects are downloaded into.
pub(super) const S3_DOWNLOADS_DIR: &str = "s3_downloads";

pub(super) async fn widget_enabled(State(state): State<Arc<ServerState>>) -> Json<EnabledResponse> {
    Json(EnabledResponse {
        enabled: state.config.onyx_credentials().is_some(),
    })
}

pub(super) async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Forward `GET <domain>/<route>` to Onyx and relay the answer unchanged.
pub(super) async fn reroute(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RerouteQuery>,
) -> Result<Response, ApiError> {
    let (domain, token) = state.config.onyx_credentials().ok_or_else(|| {
        ApiError::Authentication(
            "Cannot connect to Onyx: JupyterLab environment does not have credentials".into(),
        )
    })?;
    let route = query
        .route
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::Validation("Route is required".into()))?;

    let url = format!(
        "{}/{}",
        domain.trim_end_matches('/'),
        route.trim_start_matches('/')
    );
    tracing::debug!(%url, "Rerouting request to Onyx");

    let upstream = state
        .client
        .get(&url)
        .header("Authorization", format!("Token {token}"))
        .send()
        .await
        .map_err(onyx_error)?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let body = upstream.bytes().await.map_err(onyx_error)?;

    Ok((status, [(header::CONTENT_TYPE, content_type)], body).into_response())
}

fn onyx_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::GatewayTimeout("Failed to connect to Onyx: Gateway timeout".into())
    } else if e.is_connect() {
        ApiError::BadGateway("Failed to connect to Onyx: Connection refused".into())
    } else {
        ApiError::BadGateway(format!("Failed to connect to Onyx: {e}"))
    }
}

/// Download an S3 object under the server root and return its relative path.
pub(super) async fn s3_download(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<S3Query>,
) -> Result<Json<PathResponse>, ApiError> {
    let (bucket, key) = validate_s3_uri(query.uri.as_deref())?;
    let credentials = state.config.s3_credentials().ok_or_else(|| {
        ApiError::Authentication(
            "Cannot connect to S3: JupyterLab environment does not have credentials".into(),
        )
    })?;
    let relative = download_path(S3_DOWNLOADS_DIR, &key)?;

    let object = state.objects.fetch(&credentials, &bucket, &key).await?;

    let target = state.config.root_dir.join(&relative);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, &object).await?;
    tracing::info!(bucket = %bucket, key = %key, bytes = object.len(), "Downloaded S3 object");

    Ok(Json(PathResponse { path: relative }))
}

/// Write `{"content": ...}` to `<root>/<path>`.
pub(super) async fn file_write(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<FileWriteQuery>,
    body: Bytes,
) -> Result<Json<PathResponse>, ApiError> {
    let filename = validate_filename(query.path.as_deref())?;
    let body: Option<serde_json::Value> = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&body)
                .map_err(|_| ApiError::Validation("Invalid JSON in body of request".into()))?,
        )
    };
    let content = validate_content(body.as_ref())?;

    tokio::fs::write(state.config.root_dir.join(filename), content).await?;
    tracing::info!(file = filename, "Wrote file");

    Ok(Json(PathResponse {
        path: filename.to_string(),
    }))
}
