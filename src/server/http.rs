use std::sync::Arc;
use std::thread;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::middleware;
use axum::response::Response;
use camino::Utf8PathBuf;
use tower_http::services::ServeDir;

use crate::error::ServerError;

/// Runs the static server on its own thread with a single-threaded runtime.
pub(super) fn spawn(listener: std::net::TcpListener, root: Utf8PathBuf, script: String) {
    thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::from)
            .and_then(|rt| rt.block_on(serve(listener, root, script)));

        if let Err(e) = result {
            tracing::error!("HTTP server stopped: {e}");
        }
    });
}

async fn serve(
    listener: std::net::TcpListener,
    root: Utf8PathBuf,
    script: String,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    let script: Arc<str> = script.into();

    let router = Router::new()
        .fallback_service(ServeDir::new(root))
        .layer(middleware::map_response_with_state(script, inject));

    axum::serve(listener, router).await?;

    Ok(())
}

async fn inject(State(script): State<Arc<str>>, response: Response) -> Response {
    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
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
            return Response::from_parts(parts, Body::empty());
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes), &script);
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

/// Places the script right before the last `</body>`, or at the very end
/// when there is none.
fn inject_script(html: &str, script: &str) -> String {
    let tag = format!("<script>{script}</script>");

    match html.rfind("</body>") {
        Some(i) => format!("{}{tag}{}", &html[..i], &html[i..]),
        None => format!("{html}{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_before_body_end() {
        assert_eq!(
            inject_script("<html><body><p>x</p></body></html>", "go()"),
            "<html><body><p>x</p><script>go()</script></body></html>"
        );
    }

    #[test]
    fn test_inject_without_body() {
        assert_eq!(inject_script("<p>x</p>", "go()"), "<p>x</p><script>go()</script>");
    }
}
