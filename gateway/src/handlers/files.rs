//! Workspace file I/O, proxied to the runner's localhost side channel
//! through the cluster's pod-proxy subresource. The runner is never
//! reachable from outside; these endpoints are the only way in, and
//! they ride the caller's own credential end to end.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, api::ListParams};
use serde_json::json;

use ambient_common::{
    access::ReviewTuple,
    auth::{Bearer, caller_hash},
    error::{ApiError, ApiResult},
    runner,
};

use crate::server::{AppState, GROUP};

async fn authorize(
    state: &AppState,
    client: &Client,
    caller: &str,
    workspace: &str,
) -> Result<(), ApiError> {
    state
        .gate
        .ensure(
            client,
            caller,
            &ReviewTuple::namespaced(workspace, GROUP, "sessions", "get"),
        )
        .await?;
    // Reaching into the pod is the same privilege class as exec.
    state
        .gate
        .ensure(
            client,
            caller,
            &ReviewTuple::namespaced(workspace, "", "pods", "create").with_subresource("exec"),
        )
        .await
}

/// The runner pod of a session, which must be running for the side
/// channel to answer.
async fn running_pod(client: &Client, workspace: &str, session: &str) -> Result<String, ApiError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), workspace);
    let selector = format!("job-name={session}");
    let list = pods
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(ApiError::from)?;
    list.items
        .iter()
        .find(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running"))
        .and_then(|p| p.metadata.name.clone())
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "session {session} has no running pod; workspace files are reachable only while it runs"
            ))
        })
}

fn proxy_uri(workspace: &str, pod: &str, path: &str) -> String {
    format!(
        "/api/v1/namespaces/{workspace}/pods/{pod}:{port}/proxy/files/{path}",
        port = runner::SIDE_CHANNEL_PORT,
        path = path.trim_start_matches('/'),
    )
}

pub async fn read(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path((workspace, session, path)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let client = state.proxy_factory.for_token(&token)?;
    let caller = caller_hash(&token);
    authorize(&state, &client, &caller, &workspace).await?;

    let pod = running_pod(&client, &workspace, &session).await?;
    let request = http::Request::get(proxy_uri(&workspace, &pod, &path))
        .body(Vec::new())
        .map_err(|e| ApiError::Internal(format!("failed to build proxy request: {e}")))?;
    let content = client.request_text(request).await.map_err(ApiError::from)?;
    Ok(content)
}

pub async fn write(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path((workspace, session, path)): Path<(String, String, String)>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let client = state.proxy_factory.for_token(&token)?;
    let caller = caller_hash(&token);
    authorize(&state, &client, &caller, &workspace).await?;

    let pod = running_pod(&client, &workspace, &session).await?;
    let request = http::Request::builder()
        .method(http::Method::PUT)
        .uri(proxy_uri(&workspace, &pod, &path))
        .body(body.to_vec())
        .map_err(|e| ApiError::Internal(format!("failed to build proxy request: {e}")))?;
    client.request_text(request).await.map_err(ApiError::from)?;
    Ok(Json(json!({"path": path, "written": true})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_uri_targets_the_side_channel() {
        assert_eq!(
            proxy_uri("alpha", "fix-ci-abc12", "repos/widget/README.md"),
            "/api/v1/namespaces/alpha/pods/fix-ci-abc12:8787/proxy/files/repos/widget/README.md"
        );
        // Leading slashes collapse instead of escaping the path.
        assert_eq!(
            proxy_uri("alpha", "p", "/etc/config"),
            "/api/v1/namespaces/alpha/pods/p:8787/proxy/files/etc/config"
        );
    }
}
