//! Static responder for the bundled web client.

use std::path::{Component, Path, PathBuf};

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::server::AppState;

/// Fallback handler: any route not claimed elsewhere resolves against the
/// configured asset root.
pub(crate) async fn serve_asset(uri: Uri, State(state): State<AppState>) -> Response {
    match load(&state.public_dir, uri.path()).await {
        Some((content_type, body)) => {
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        None => {
            debug!(path = uri.path(), "asset not found");
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
    }
}

async fn load(root: &Path, request_path: &str) -> Option<(&'static str, Vec<u8>)> {
    let rel = sanitize(request_path)?;
    let path = root.join(rel);
    let body = tokio::fs::read(&path).await.ok()?;
    Some((content_type_for(&path), body))
}

/// Map a request path to a file path relative to the asset root. `/` means
/// the default document; anything that could escape the root is refused.
fn sanitize(request_path: &str) -> Option<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    let rel = if trimmed.is_empty() { "index.html" } else { trimmed };
    let rel = Path::new(rel);
    if rel.components().all(|c| matches!(c, Component::Normal(_))) {
        Some(rel.to_path_buf())
    } else {
        None
    }
}

/// Content type by extension. Unknown extensions are served as opaque bytes.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        _ => "application/octet-stream",
    }
}
