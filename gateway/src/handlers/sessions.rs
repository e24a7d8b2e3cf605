use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use kube::{Api, api::PostParams};
use uuid::Uuid;

use ambient_common::{
    access::ReviewTuple,
    auth::{Bearer, caller_hash},
    error::{ApiError, ApiResult},
    pagination::{Page, PageQuery},
};
use ambient_types::{Session, validation};

use crate::{
    models::{
        CreateSessionRequest, SessionCreated, SessionSummary, UpdateSessionRequest, matches_search,
        session_sort_key, summarize,
    },
    server::{AppState, GROUP, whoami},
};

fn sessions_tuple(workspace: &str, verb: &str) -> ReviewTuple {
    ReviewTuple::namespaced(workspace, GROUP, "sessions", verb)
}

pub async fn list(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path(workspace): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<SessionSummary>>> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(&client, &caller, &sessions_tuple(&workspace, "list"))
        .await?;

    let api: Api<Session> = Api::namespaced(client, &workspace);
    let mut sessions = api
        .list(&Default::default())
        .await
        .map_err(ApiError::from)?
        .items;

    let search = query.search.clone().unwrap_or_default();
    sessions.retain(|s| matches_search(s, &search));
    sessions.sort_by_key(session_sort_key);

    let (offset, limit) = query.clamp();
    let summaries: Vec<SessionSummary> = sessions.iter().map(summarize).collect();
    Ok(Json(Page::paginate(summaries, offset, limit)))
}

pub async fn create(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path(workspace): Path<String>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionCreated>)> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(&client, &caller, &sessions_tuple(&workspace, "create"))
        .await?;

    let name = request.name.clone().unwrap_or_else(|| {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("session-{}", &suffix[..8])
    });
    validation::validate_session_name(&name).map_err(|e| ApiError::Validation(vec![e]))?;

    // Workspace defaults freeze into the spec here; the identity comes
    // from the credential, never the body.
    let settings = super::workspace_settings(&client, &workspace).await?;
    let user = whoami(&client).await?;
    let spec = request.into_spec(&settings, Some(user));
    validation::validate_session_spec(&spec).map_err(ApiError::Validation)?;

    let mut session = Session::new(&name, spec);
    session.metadata.namespace = Some(workspace.clone());

    let api: Api<Session> = Api::namespaced(client, &workspace);
    let created = api
        .create(&PostParams::default(), &session)
        .await
        .map_err(ApiError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            name,
            uid: created.metadata.uid.unwrap_or_default(),
        }),
    ))
}

pub async fn get_one(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path((workspace, session)): Path<(String, String)>,
) -> ApiResult<Json<Session>> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(&client, &caller, &sessions_tuple(&workspace, "get"))
        .await?;

    let api: Api<Session> = Api::namespaced(client, &workspace);
    let found = api.get(&session).await.map_err(ApiError::from)?;
    Ok(Json(found))
}

/// Spec-only replacement under optimistic concurrency. The caller's
/// resource version rides on the write; the store rejects stale ones
/// with 409 and the loser re-reads.
pub async fn update(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path((workspace, session)): Path<(String, String)>,
    Json(request): Json<UpdateSessionRequest>,
) -> ApiResult<Json<Session>> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(&client, &caller, &sessions_tuple(&workspace, "update"))
        .await?;

    let api: Api<Session> = Api::namespaced(client, &workspace);
    let current = api.get(&session).await.map_err(ApiError::from)?;

    let mut spec = request.spec;
    // Frozen at create time; not user-editable.
    spec.user_context = current.spec.user_context.clone();
    validation::validate_session_spec(&spec).map_err(ApiError::Validation)?;

    let mut updated = current.clone();
    updated.spec = spec;
    if let Some(resource_version) = request.resource_version {
        updated.metadata.resource_version = Some(resource_version);
    }

    let replaced = api
        .replace(&session, &PostParams::default(), &updated)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(replaced))
}

pub async fn delete(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path((workspace, session)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(&client, &caller, &sessions_tuple(&workspace, "delete"))
        .await?;

    let api: Api<Session> = Api::namespaced(client, &workspace);
    // Children go with the session via owner references.
    api.delete(&session, &Default::default())
        .await
        .map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
