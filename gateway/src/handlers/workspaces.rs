use std::collections::BTreeMap;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use k8s_openapi::api::{
    core::v1::Namespace,
    rbac::v1::{RoleBinding, RoleRef, Subject},
};
use kube::{
    Api,
    api::{ListParams, ObjectMeta, PostParams},
};

use ambient_common::{
    access::ReviewTuple,
    auth::{Bearer, caller_hash},
    error::{ApiError, ApiResult},
    headers, labels,
};
use ambient_types::{WorkspaceSettings, WorkspaceSettingsSpec, validation};

use crate::{
    models::{CreateWorkspaceRequest, WorkspaceSummary},
    server::{AppState, whoami},
};

fn summarize(namespace: &Namespace) -> WorkspaceSummary {
    WorkspaceSummary {
        name: namespace.metadata.name.clone().unwrap_or_default(),
        display_name: namespace
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ambient_common::annotations::DISPLAY_NAME))
            .cloned(),
        created_at: namespace.metadata.creation_timestamp.clone(),
        status: namespace
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Active".to_string()),
    }
}

/// Lists the workspaces visible to the caller. Callers without
/// cluster-wide namespace list fall back to the single workspace they
/// name in the project header, if they can read it.
pub async fn list(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    request_headers: HeaderMap,
) -> ApiResult<Json<Vec<WorkspaceSummary>>> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);

    let cluster_list = ReviewTuple::cluster("", "namespaces", "list");
    if state.gate.can(&client, &caller, &cluster_list).await? {
        let api: Api<Namespace> = Api::all(client);
        let selector = format!("{}=true", labels::WORKSPACE);
        let namespaces = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(ApiError::from)?;
        let mut summaries: Vec<_> = namespaces.items.iter().map(summarize).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        return Ok(Json(summaries));
    }

    let Some(project) = request_headers
        .get(headers::PROJECT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return Ok(Json(Vec::new()));
    };
    let per_namespace = ReviewTuple::namespaced(project, "", "namespaces", "get");
    if !state.gate.can(&client, &caller, &per_namespace).await? {
        return Ok(Json(Vec::new()));
    }
    let api: Api<Namespace> = Api::all(client);
    let namespace = api.get(project).await.map_err(ApiError::from)?;
    Ok(Json(vec![summarize(&namespace)]))
}

pub async fn create(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Json(request): Json<CreateWorkspaceRequest>,
) -> ApiResult<(StatusCode, Json<WorkspaceSummary>)> {
    validation::validate_session_name(&request.name)
        .map_err(|e| ApiError::Validation(vec![e]))?;

    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(&client, &caller, &ReviewTuple::cluster("", "namespaces", "create"))
        .await?;

    let user = whoami(&client).await?;

    let mut annotations = BTreeMap::new();
    if let Some(display_name) = &request.display_name {
        annotations.insert(
            ambient_common::annotations::DISPLAY_NAME.to_string(),
            display_name.clone(),
        );
    }
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(request.name.clone()),
            labels: Some(BTreeMap::from([(
                labels::WORKSPACE.to_string(),
                "true".to_string(),
            )])),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        ..Default::default()
    };
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let created = namespaces
        .create(&PostParams::default(), &namespace)
        .await
        .map_err(ApiError::from)?;

    // Default settings object; admins tune it afterwards.
    let settings = WorkspaceSettings::new(
        ambient_types::WORKSPACE_SETTINGS_NAME,
        WorkspaceSettingsSpec::default(),
    );
    let settings_api: Api<WorkspaceSettings> = Api::namespaced(client.clone(), &request.name);
    match settings_api.create(&PostParams::default(), &settings).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => return Err(e.into()),
    }

    // The creator administers their workspace; sessions grants ride on
    // the cluster admin aggregate plus the group's own resources.
    if !user.user_id.is_empty() {
        let binding = RoleBinding {
            metadata: ObjectMeta {
                name: Some("ambient-workspace-admin".to_string()),
                namespace: Some(request.name.clone()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: "admin".to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "User".to_string(),
                name: user.user_id.clone(),
                api_group: Some("rbac.authorization.k8s.io".to_string()),
                ..Default::default()
            }]),
        };
        let bindings: Api<RoleBinding> = Api::namespaced(client, &request.name);
        match bindings.create(&PostParams::default(), &binding).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 409 => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok((StatusCode::CREATED, Json(summarize(&created))))
}
