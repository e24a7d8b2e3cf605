use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use base64::Engine;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use ambient_common::{
    access_log,
    auth::Bearer,
    error::{ApiError, ApiResult},
    headers,
    metrics::{MetricsLayer, prometheus_handle},
    pagination::{Page, PageQuery},
    rate_limit::{RateLimiter, middleware::RateLimitLayer},
};
use ambient_types::Session;
use ambient_types::validation::FieldError;

use crate::{
    app::App,
    args::Cli,
    models::{CreateSessionRequest, SessionListResponse, SessionResponse, from_session},
};

/// Namespace claim carried by service-account JWTs. The payload is
/// decoded without verification; the backend's cluster verifies the
/// signature, we only route.
pub fn namespace_claim(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    if let Some(namespace) = claims
        .get("kubernetes.io")
        .and_then(|k| k.get("namespace"))
        .and_then(|v| v.as_str())
    {
        return Some(namespace.to_string());
    }
    claims
        .get("kubernetes.io/serviceaccount/namespace")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Project selection: explicit header, or the credential's namespace
/// claim. When both are present they must agree.
pub fn resolve_project(header: Option<&str>, claim: Option<&str>) -> Result<String, ApiError> {
    match (header, claim) {
        (Some(header), Some(claim)) if header != claim => {
            Err(ApiError::Validation(vec![FieldError {
                field: headers::PROJECT.to_string(),
                message: format!(
                    "header names project {header:?} but the credential belongs to {claim:?}"
                ),
            }]))
        }
        (Some(project), _) | (None, Some(project)) => Ok(project.to_string()),
        (None, None) => Err(ApiError::Validation(vec![FieldError {
            field: headers::PROJECT.to_string(),
            message: "project is required: set the header or use a namespaced credential"
                .to_string(),
        }])),
    }
}

fn project_from(request_headers: &HeaderMap, token: &str) -> Result<String, ApiError> {
    let header = request_headers
        .get(headers::PROJECT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    let claim = namespace_claim(token);
    resolve_project(header, claim.as_deref())
}

/// Non-2xx backend responses pass through with their status and body;
/// the public gateway adds nothing and hides nothing.
fn passthrough(status: reqwest::StatusCode, body: serde_json::Value) -> Response {
    let status =
        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

async fn backend_json(response: reqwest::Response) -> Result<serde_json::Value, ApiError> {
    response
        .json()
        .await
        .map_err(|e| ApiError::Upstream(format!("invalid backend response: {e}")))
}

enum Upstream {
    Ok(serde_json::Value),
    Error(Response),
}

async fn check(response: reqwest::Response) -> Result<Upstream, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(Upstream::Ok(backend_json(response).await?))
    } else {
        let body = backend_json(response)
            .await
            .unwrap_or_else(|_| json!({"reason": status.to_string()}));
        Ok(Upstream::Error(passthrough(status, body)))
    }
}

fn upstream_failure(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::UpstreamTimeout(e.to_string())
    } else {
        ApiError::Upstream(e.to_string())
    }
}

async fn list_sessions(
    State(app): State<App>,
    Bearer(token): Bearer,
    request_headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ApiResult<Response> {
    let project = project_from(&request_headers, &token)?;
    let (offset, limit) = query.clamp();
    let url = format!(
        "{}/api/workspaces/{project}/sessions?limit={limit}&offset={offset}",
        app.backend_url
    );
    let response = app
        .http
        .get(url)
        .bearer_auth(&token)
        .send()
        .await
        .map_err(upstream_failure)?;
    let page: Page<serde_json::Value> = match check(response).await? {
        Upstream::Ok(value) => serde_json::from_value(value)
            .map_err(|e| ApiError::Upstream(format!("unexpected backend page shape: {e}")))?,
        Upstream::Error(response) => return Ok(response),
    };

    let sessions: Vec<SessionResponse> = page
        .items
        .iter()
        .map(|item| SessionResponse {
            id: item["name"].as_str().unwrap_or_default().to_string(),
            status: crate::models::simplify_phase(
                item["phase"]
                    .as_str()
                    .unwrap_or("Pending")
                    .parse()
                    .unwrap_or_default(),
            )
            .to_string(),
            task: item["initialPrompt"]
                .as_str()
                .filter(|p| !p.is_empty())
                .or_else(|| item["displayName"].as_str())
                .unwrap_or_default()
                .to_string(),
            model: item["model"].as_str().map(str::to_string),
            created_at: item["createdAt"].as_str().map(str::to_string),
            completed_at: item["completionTime"].as_str().map(str::to_string),
            result: None,
            error: None,
        })
        .collect();

    Ok(Json(SessionListResponse {
        sessions,
        total: page.total_count,
    })
    .into_response())
}

async fn create_session(
    State(app): State<App>,
    Bearer(token): Bearer,
    request_headers: HeaderMap,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Response> {
    let project = project_from(&request_headers, &token)?;

    let mut body = json!({
        "displayName": request.task.chars().take(50).collect::<String>(),
        "initialPrompt": request.task,
        "repos": request.repos,
    });
    if let Some(timeout) = request.timeout {
        body["timeout"] = json!(timeout);
    }
    if let Some(model) = &request.model {
        // Temperature and token budget stay on workspace defaults for
        // the simplified surface.
        body["llmSettings"] = json!({
            "model": model,
            "temperature": 0.7,
            "maxTokens": 4096,
        });
    }

    let url = format!("{}/api/workspaces/{project}/sessions", app.backend_url);
    let response = app
        .http
        .post(url)
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .map_err(upstream_failure)?;
    match check(response).await? {
        Upstream::Ok(value) => Ok((StatusCode::CREATED, Json(value)).into_response()),
        Upstream::Error(response) => Ok(response),
    }
}

async fn get_session(
    State(app): State<App>,
    Bearer(token): Bearer,
    request_headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let project = project_from(&request_headers, &token)?;
    let url = format!("{}/api/workspaces/{project}/sessions/{id}", app.backend_url);
    let response = app
        .http
        .get(url)
        .bearer_auth(&token)
        .send()
        .await
        .map_err(upstream_failure)?;
    match check(response).await? {
        Upstream::Ok(value) => {
            let session: Session = serde_json::from_value(value)
                .map_err(|e| ApiError::Upstream(format!("unexpected backend session: {e}")))?;
            Ok(Json(from_session(&session)).into_response())
        }
        Upstream::Error(response) => Ok(response),
    }
}

async fn delete_session(
    State(app): State<App>,
    Bearer(token): Bearer,
    request_headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let project = project_from(&request_headers, &token)?;
    let url = format!("{}/api/workspaces/{project}/sessions/{id}", app.backend_url);
    let response = app
        .http
        .delete(url)
        .bearer_auth(&token)
        .send()
        .await
        .map_err(upstream_failure)?;
    let status = response.status();
    if status.is_success() {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        let body = backend_json(response)
            .await
            .unwrap_or_else(|_| json!({"reason": status.to_string()}));
        Ok(passthrough(status, body))
    }
}

pub async fn run_server(args: Cli, app: App) -> Result<()> {
    let cors = ambient_common::cors::layer(&args.cors.cors_allowed_origins)
        .context("invalid CORS configuration")?;
    let limiter = RateLimiter::new(args.rate.clone().into());
    let handle = prometheus_handle().clone();

    let router: Router<()> = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .layer(cors)
        .layer(RateLimitLayer::new(limiter))
        .layer(MetricsLayer::new("public-gateway"))
        // Outermost, so limited requests are logged too.
        .layer(middleware::from_fn(access_log::middleware))
        .with_state(app);

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        ambient_common::shutdown::shutdown_signal().await;
        cancel_signal.cancel();
    });

    let addr = format!("0.0.0.0:{}", args.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind public gateway")?;
    tracing::info!(%addr, "starting public gateway");
    ambient_common::signal_ready();

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("public gateway failed")?;

    tracing::info!("public gateway stopped gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_payload(payload: serde_json::Value) -> String {
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&payload).unwrap());
        format!("header.{encoded}.signature")
    }

    #[test]
    fn reads_bound_token_namespace_claim() {
        let token = jwt_with_payload(json!({
            "kubernetes.io": {"namespace": "alpha"}
        }));
        assert_eq!(namespace_claim(&token).as_deref(), Some("alpha"));
    }

    #[test]
    fn reads_legacy_namespace_claim() {
        let token = jwt_with_payload(json!({
            "kubernetes.io/serviceaccount/namespace": "beta"
        }));
        assert_eq!(namespace_claim(&token).as_deref(), Some("beta"));
    }

    #[test]
    fn opaque_tokens_have_no_claim() {
        assert_eq!(namespace_claim("not-a-jwt"), None);
        assert_eq!(namespace_claim("a.b.c"), None);
    }

    #[test]
    fn header_and_claim_must_agree() {
        assert!(resolve_project(Some("alpha"), Some("beta")).is_err());
        assert_eq!(
            resolve_project(Some("alpha"), Some("alpha")).unwrap(),
            "alpha"
        );
        assert_eq!(resolve_project(Some("alpha"), None).unwrap(), "alpha");
        assert_eq!(resolve_project(None, Some("beta")).unwrap(), "beta");
        assert!(resolve_project(None, None).is_err());
    }
}
