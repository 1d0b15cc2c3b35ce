use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;
use tower_http::services::ServeDir;

use super::ServeError;
use super::reload::inject_script;
use crate::engine::{POLL, Shutdown};

/// Binds the HTTP port up front, so a taken port fails the task instead of
/// the background thread.
pub(crate) fn bind(port: u16) -> Result<std::net::TcpListener, ServeError> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    std::net::TcpListener::bind(address).map_err(|source| ServeError::Bind { port, source })
}

/// Serves `dist` until `shutdown` is triggered. Blocks the calling thread.
pub(crate) fn serve(
    listener: std::net::TcpListener,
    dist: Utf8PathBuf,
    script: Arc<str>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    listener.set_nonblocking(true)?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener)?;

            let router = Router::new()
                // path to the dist directory with generated website
                .fallback_service(ServeDir::new(dist))
                .layer(middleware::map_response(move |response: Response| {
                    let script = script.clone();
                    async move { inject(response, &script).await }
                }));

            axum::serve(listener, router)
                .with_graceful_shutdown(stopped(shutdown))
                .await?;

            Ok(())
        })
}

async fn stopped(shutdown: Shutdown) {
    while !shutdown.is_triggered() {
        tokio::time::sleep(POLL).await;
    }
}

/// Adds the reload script to HTML responses.
async fn inject(response: Response, script: &str) -> Response {
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("couldn't read response body: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes), script);
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}
