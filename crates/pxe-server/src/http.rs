//! HTTP responder
//!
//! GET and HEAD only. `/profiles/<slug>/<category>[/<file>]` is rendered
//! through the artifact service; every other path is streamed from the HTTP
//! root by `ServeDir`, which also answers range requests.

use crate::artifacts::{is_profile_path, ArtifactService};
use crate::error::{PxeError, Result};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const OCTET_STREAM: &str = "application/octet-stream";

/// Shared handler state
#[derive(Debug)]
pub struct HttpState {
    pub artifacts: Arc<ArtifactService>,
    pub root: PathBuf,
}

/// Build the responder's router.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .fallback(serve_path)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `listener` until `shutdown` flips to true.
pub async fn serve(router: Router, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP responder started");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("HTTP responder shutting down");
        })
        .await?;
    Ok(())
}

/// Rooted, `/`-separated path with `.`, `..` and empty segments resolved.
/// `..` never climbs above the root.
pub fn clean_path(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

fn octet_stream(body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, OCTET_STREAM)], body).into_response()
}

fn failure(path: &str, err: PxeError) -> Response {
    if err.is_not_found() {
        return (StatusCode::NOT_FOUND, err.to_string()).into_response();
    }
    error!(path, error = %err, "HTTP request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

async fn serve_path(State(state): State<Arc<HttpState>>, request: Request) -> Response {
    let method = request.method();
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path = clean_path(request.uri().path());
    if path == "/" {
        return StatusCode::NOT_FOUND.into_response();
    }

    if is_profile_path(&path) {
        return match state.artifacts.profile_file(&path).await {
            Ok(body) => octet_stream(body),
            Err(e) => failure(&path, e),
        };
    }

    serve_static(&state.root, &path, request).await
}

/// Stream `path` from `root`. Directories are never listed.
async fn serve_static(root: &Path, path: &str, request: Request) -> Response {
    let Ok(uri) = Uri::try_from(path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let (mut parts, body) = request.into_parts();
    parts.uri = uri;

    let files = ServeDir::new(root).append_index_html_on_directories(false);
    match files.oneshot(Request::from_parts(parts, body)).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
