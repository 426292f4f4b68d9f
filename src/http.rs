//! HTTP front end.
//!
//! Routes:
//! - `POST /api/v1/convert` submit a build and answer when it is finished
//! - `POST /api/v1/builds` submit a build and answer immediately (202)
//! - `GET /api/v1/builds/:buildId` build status
//! - `GET /builds/:buildId/:platform/:file...` artifact download
//! - `GET /healthz`
//!
//! Failures are answered as `{ "success": false, "error": "..." }` with a
//! short fixed message; internal details only go to the log.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::artifact::ArtifactLocator;
use crate::backend::ExecutionBackend;
use crate::controller::BuildController;
use crate::job::{AppConfig, BuildId, BuildJob, BuildRequest, JobState};

/// Response body: small JSON documents or streamed files.
pub type Body = UnsyncBoxBody<Bytes, std::io::Error>;

/// Upper bound on request bodies.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const MISSING_FIELDS: &str = "URL and app name are required";
const BUILD_FAILED: &str = "Build failed";
const FILE_NOT_FOUND: &str = "Build file not found";

/// Shared state for request handlers.
pub struct AppState<B> {
    controller: Arc<BuildController<B>>,
    artifacts: ArtifactLocator,
}

impl<B: ExecutionBackend + 'static> AppState<B> {
    pub const fn new(controller: Arc<BuildController<B>>, artifacts: ArtifactLocator) -> Self {
        Self {
            controller,
            artifacts,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertBody {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    app_name: Option<String>,
    #[serde(default)]
    config: Option<AppConfig>,
}

#[derive(Debug, Serialize)]
struct DownloadLinks {
    android: String,
    ios: String,
}

impl DownloadLinks {
    fn for_build(id: &BuildId) -> Self {
        Self {
            android: format!("/builds/{id}/android/app-release.apk"),
            ios: format!("/builds/{id}/ios/build/App.ipa"),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    success: bool,
    build_id: BuildId,
    status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_links: Option<DownloadLinks>,
}

impl From<&BuildJob> for StatusBody {
    fn from(job: &BuildJob) -> Self {
        Self {
            success: true,
            build_id: job.id.clone(),
            status: job.state,
            exit_code: job.exit_code,
            error: job.error.as_ref().map(ToString::to_string),
            download_links: (job.state == JobState::Succeeded)
                .then(|| DownloadLinks::for_build(&job.id)),
        }
    }
}

/// Accept connections until the listener fails fatally.
pub async fn serve<B: ExecutionBackend + 'static>(
    addr: SocketAddr,
    state: Arc<AppState<B>>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Accept error");
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(handle(&*state, req).await) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, error = %e, "Connection ended with error");
            }
        });
    }
}

async fn handle<B: ExecutionBackend + 'static>(
    state: &AppState<B>,
    req: Request<Incoming>,
) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let body = if method == Method::POST {
        match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!(error = %e, "Rejected request body");
                return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
        }
    } else {
        Bytes::new()
    };

    let response = route(state, &method, &path, &body).await;
    debug!(%method, %path, status = response.status().as_u16(), "Handled request");
    response
}

/// Dispatch a request by method and path.
pub async fn route<B: ExecutionBackend + 'static>(
    state: &AppState<B>,
    method: &Method,
    path: &str,
    body: &[u8],
) -> Response<Body> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        (&Method::POST, ["api", "v1", "convert"]) => convert(state, body).await,
        (&Method::POST, ["api", "v1", "builds"]) => submit(state, body).await,
        (&Method::GET, ["api", "v1", "builds", id]) => status(state, id).await,
        (&Method::GET, ["builds", id, platform, file @ ..]) if !file.is_empty() => {
            download(state, id, platform, &file.join("/")).await
        }
        (&Method::GET, ["healthz"]) => json_response(StatusCode::OK, &json!({ "success": true })),
        _ => error_response(StatusCode::NOT_FOUND, "Not found"),
    }
}

/// Parse and validate a build submission. No resources are touched here.
fn parse_request(body: &[u8]) -> Result<BuildRequest, Response<Body>> {
    // An absent body or `null` counts as an empty object.
    let parsed: ConvertBody = if body.iter().all(u8::is_ascii_whitespace) {
        ConvertBody::default()
    } else {
        serde_json::from_slice::<Option<ConvertBody>>(body)
            .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid request body"))?
            .unwrap_or_default()
    };

    let url = parsed.url.filter(|u| !u.trim().is_empty());
    let app_name = parsed.app_name.filter(|n| !n.trim().is_empty());
    let (Some(source_url), Some(app_name)) = (url, app_name) else {
        return Err(error_response(StatusCode::BAD_REQUEST, MISSING_FIELDS));
    };

    let app_config = parsed.config.unwrap_or_else(|| AppConfig {
        name: app_name.clone(),
        ..AppConfig::default()
    });
    Ok(BuildRequest {
        source_url,
        app_name,
        app_config,
    })
}

async fn convert<B: ExecutionBackend + 'static>(state: &AppState<B>, body: &[u8]) -> Response<Body> {
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.controller.build(request).await {
        Ok(job) if job.state == JobState::Succeeded => json_response(
            StatusCode::OK,
            &json!({
                "success": true,
                "buildId": job.id,
                "downloadLinks": DownloadLinks::for_build(&job.id),
            }),
        ),
        Ok(job) => {
            warn!(
                build_id = %job.id,
                error = %job.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                "Build failed"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, BUILD_FAILED)
        }
        Err(e) => {
            error!(error = %e, "Build submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, BUILD_FAILED)
        }
    }
}

async fn submit<B: ExecutionBackend + 'static>(state: &AppState<B>, body: &[u8]) -> Response<Body> {
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.controller.spawn_build(request).await {
        Ok(id) => json_response(
            StatusCode::ACCEPTED,
            &json!({
                "success": true,
                "buildId": id,
                "status": JobState::Created,
                "statusUrl": format!("/api/v1/builds/{id}"),
            }),
        ),
        Err(e) => {
            error!(error = %e, "Build submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, BUILD_FAILED)
        }
    }
}

async fn status<B: ExecutionBackend + 'static>(state: &AppState<B>, id: &str) -> Response<Body> {
    let job = match BuildId::parse(id) {
        Some(id) => state.controller.tracker().get(&id).await,
        None => None,
    };
    match job {
        Some(job) => json_response(StatusCode::OK, &StatusBody::from(&job)),
        None => error_response(StatusCode::NOT_FOUND, "Build not found"),
    }
}

async fn download<B: ExecutionBackend + 'static>(
    state: &AppState<B>,
    id: &str,
    platform: &str,
    file: &str,
) -> Response<Body> {
    let path = match state.artifacts.resolve(id, platform, file).await {
        Ok(path) => path,
        Err(e) => {
            debug!(build_id = %id, platform, file, error = %e, "Artifact lookup failed");
            return error_response(StatusCode::NOT_FOUND, FILE_NOT_FOUND);
        }
    };

    let opened = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to open artifact");
            return error_response(StatusCode::NOT_FOUND, FILE_NOT_FOUND);
        }
    };
    let len = opened.metadata().await.map(|m| m.len()).ok();
    let filename = file.rsplit('/').next().unwrap_or(file);

    let stream = ReaderStream::new(opened).map_ok(Frame::data);
    let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    if let Some(len) = len {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let bytes = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(full(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, &json!({ "success": false, "error": message }))
}

fn full(bytes: Vec<u8>) -> Body {
    Full::new(Bytes::from(bytes))
        .map_err(|never| match never {})
        .boxed_unsync()
}
