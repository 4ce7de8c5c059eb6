use crate::command::MASK;
use crate::error::{ApiError, IpatoolWebError};
use crate::manifest::ARTIFACT_ROUTE;
use crate::service::{LoginOutcome, Orchestrator};
use crate::store::DIR_PREFIX;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::info;

type AppState = Arc<Orchestrator>;

const CERT_DOWNLOAD_NAME: &str = "ipatool-web.crt";

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub direct_download: bool,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/status", get(auth_status))
        .route("/api/search", post(search))
        .route("/api/download", post(download))
        .route("/api/manifest/{bundle_id}", get(manifest))
        .route("/api/manifest/{bundle_id}/debug", get(manifest_debug))
        .route(&format!("{}/{{filename}}", ARTIFACT_ROUTE), get(download_file))
        .route("/ssl/cert.pem", get(certificate))
        .with_state(orchestrator)
}

/// Answers everything with a 301 to the same path on the HTTPS port.
pub fn redirect_router(https_port: u16) -> Router {
    Router::new().fallback(move |headers: HeaderMap, uri: Uri| async move {
        redirect_to_https(&headers, &uri, https_port)
    })
}

fn redirect_to_https(headers: &HeaderMap, uri: &Uri, https_port: u16) -> Response {
    let host = strip_port(request_host(headers).unwrap_or("localhost"));
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let location = if https_port == 443 {
        format!("https://{}{}", host, path)
    } else {
        format!("https://{}:{}{}", host, https_port, path)
    };

    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

fn strip_port(host: &str) -> &str {
    match host.rfind(':') {
        Some(i) if !host[i..].contains(']') && host[i + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            &host[..i]
        }
        _ => host,
    }
}

fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| ApiError::InvalidInput(rejection.body_text()))
}

fn email_hint(email: Option<&str>) -> String {
    match email {
        Some(email) if !email.is_empty() => {
            format!("{}{}", email.chars().take(3).collect::<String>(), MASK)
        }
        _ => "none".to_string(),
    }
}

async fn attachment(path: &Path, download_name: &str, content_type: &str) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ApiError::Internal(IpatoolWebError::Io(e)))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(IpatoolWebError::Io(e)))?
        .len();
    info!(path = %path.display(), size, "sending file");

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download_name.replace('"', "_")),
            ),
        ],
        body,
    )
        .into_response())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn login(
    State(app): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request = body(payload)?;
    info!(
        email = %email_hint(request.email.as_deref()),
        has_password = request.password.as_deref().is_some_and(|p| !p.is_empty()),
        has_code = request.code.as_deref().is_some_and(|c| !c.is_empty()),
        "POST /api/auth/login"
    );

    let outcome = app
        .authenticate(
            request.email.as_deref().unwrap_or_default(),
            request.password.as_deref().unwrap_or_default(),
            request.code.as_deref(),
        )
        .await?;

    Ok(Json(match outcome {
        LoginOutcome::Authenticated => json!({
            "success": true,
            "message": "Authentication successful",
        }),
        LoginOutcome::TwoFactorRequired => json!({
            "success": false,
            "requiresTwoFactor": true,
            "message": "Two-factor authentication code required",
        }),
    }))
}

async fn auth_status(State(app): State<AppState>) -> Json<Value> {
    info!("GET /api/auth/status");
    if app.auth_status().await {
        Json(json!({ "authenticated": true, "message": "User is authenticated" }))
    } else {
        Json(json!({ "authenticated": false, "message": "User is not authenticated" }))
    }
}

async fn search(
    State(app): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request = body(payload)?;
    let query = request.query.unwrap_or_default();
    info!(query = %query, "POST /api/search");

    let apps = app.search(&query).await?;
    Ok(Json(json!({ "success": true, "apps": apps })))
}

async fn download(
    State(app): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body(payload)?;
    let bundle_id = request.bundle_id.unwrap_or_default();
    info!(bundle_id = %bundle_id, direct = request.direct_download, "POST /api/download");

    let artifact = app.acquire(&bundle_id).await?;

    if request.direct_download {
        return attachment(&artifact.path(), &artifact.file_name, "application/octet-stream").await;
    }

    Ok(Json(json!({
        "success": true,
        "filename": artifact.file_name,
        "bundleId": bundle_id,
        "downloadUrl": format!("{}/{}", ARTIFACT_ROUTE, artifact.file_name),
        "manifestUrl": format!("/api/manifest/{}", bundle_id),
        "message": "IPA ready for installation",
    }))
    .into_response())
}

async fn manifest(
    State(app): State<AppState>,
    UrlPath(bundle_id): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    info!(bundle_id = %bundle_id, "GET /api/manifest");
    let host = app.public_host(request_host(&headers));
    let xml = app.manifest(&bundle_id, &host).await?;
    Ok(([(header::CONTENT_TYPE, "application/xml")], xml).into_response())
}

async fn manifest_debug(
    State(app): State<AppState>,
    UrlPath(bundle_id): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    info!(bundle_id = %bundle_id, "GET /api/manifest/debug");
    let host = app.public_host(request_host(&headers));
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(if app.config().tls_enabled { "https" } else { "http" });

    let plain_text = [(header::CONTENT_TYPE, "text/plain; charset=utf-8")];
    match app.manifest_debug(&bundle_id, &host, scheme).await {
        Ok(text) => (plain_text, text).into_response(),
        Err(ApiError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            plain_text,
            format!(
                "No IPA file found for bundle ID: {}\n\nChecked directories in {} starting with '{}'",
                bundle_id,
                app.store().root().display(),
                DIR_PREFIX
            ),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn download_file(
    State(app): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Result<Response, ApiError> {
    info!(filename = %filename, "GET /api/download-file");
    let path = app.locate_artifact(&filename).await?;
    attachment(&path, &filename, "application/octet-stream").await
}

async fn certificate(State(app): State<AppState>) -> Result<Response, ApiError> {
    let cert = app.config().cert_path();
    if !cert.is_file() {
        return Err(ApiError::NotFound("Certificate not found"));
    }
    attachment(&cert, CERT_DOWNLOAD_NAME, "application/x-x509-ca-cert").await
}
