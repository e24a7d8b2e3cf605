//! One structured log line per request. Query strings are scrubbed and
//! the caller appears only as an opaque hash.

use axum::{extract::Request, middleware::Next, response::Response};

use crate::{auth, scrub};

fn workspace_from_path(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    loop {
        match segments.next() {
            Some("workspaces") => return segments.next(),
            Some(_) => continue,
            None => return None,
        }
    }
}

pub async fn middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = scrub::scrub_path_and_query(
        req.uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| req.uri().path()),
    );
    let caller = auth::bearer_from_headers(req.headers())
        .map(|token| auth::caller_hash(&token))
        .unwrap_or_else(|| "anonymous".to_string());
    let workspace = workspace_from_path(req.uri().path()).map(str::to_string);
    let request_bytes = req
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let start = std::time::Instant::now();
    let span = tracing::info_span!(
        "http.request",
        method = %method,
        path = %path,
        workspace = workspace.as_deref().unwrap_or(""),
    );
    let response = {
        use tracing::Instrument;
        next.run(req).instrument(span).await
    };
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    tracing::info!(
        target: "http.access",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        caller = %caller,
        workspace = workspace.as_deref().unwrap_or(""),
        request_bytes,
        "request"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_workspace_segment() {
        assert_eq!(
            workspace_from_path("/api/workspaces/alpha/sessions"),
            Some("alpha")
        );
        assert_eq!(workspace_from_path("/api/workspaces"), None);
        assert_eq!(workspace_from_path("/health"), None);
    }
}
