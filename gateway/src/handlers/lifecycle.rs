//! Stop, resume, and clone. The gateway validates the transition and
//! records the request on the object; the controller owns the actual
//! teardown and rebuild, so these requests are honored exactly once
//! even when replayed.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use k8s_openapi::jiff::Timestamp;
use kube::{
    Api,
    api::{Patch, PatchParams, PostParams},
};
use serde_json::json;
use uuid::Uuid;

use ambient_common::{
    access::ReviewTuple,
    annotations,
    auth::{Bearer, caller_hash},
    error::{ApiError, ApiResult},
};
use ambient_types::{Session, SessionPhase, validation};

use crate::{
    models::{CloneSessionRequest, LifecycleResponse, SessionCreated, clone_name},
    server::{AppState, GROUP, whoami},
};

fn sessions_tuple(workspace: &str, verb: &str) -> ReviewTuple {
    ReviewTuple::namespaced(workspace, GROUP, "sessions", verb)
}

fn current_phase(session: &Session) -> SessionPhase {
    session
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or_default()
}

pub async fn stop(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path((workspace, session)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<LifecycleResponse>)> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(&client, &caller, &sessions_tuple(&workspace, "update"))
        .await?;

    let api: Api<Session> = Api::namespaced(client, &workspace);
    let found = api.get(&session).await.map_err(ApiError::from)?;
    let phase = current_phase(&found);
    if !phase.stoppable() {
        return Err(ApiError::Conflict(format!(
            "cannot stop session in phase {phase}"
        )));
    }

    let patch = json!({
        "metadata": {
            "annotations": {
                (annotations::STOP_REQUESTED): Timestamp::now().to_string(),
                (annotations::RESUME_REQUESTED): null,
            }
        }
    });
    api.patch(&session, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(ApiError::from)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(LifecycleResponse {
            name: session,
            requested: "stop".to_string(),
            phase: phase.to_string(),
        }),
    ))
}

pub async fn resume(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path((workspace, session)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<LifecycleResponse>)> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(&client, &caller, &sessions_tuple(&workspace, "update"))
        .await?;

    let api: Api<Session> = Api::namespaced(client, &workspace);
    let found = api.get(&session).await.map_err(ApiError::from)?;
    let phase = current_phase(&found);
    if !phase.resumable(found.spec.interactive) {
        return Err(ApiError::Conflict(format!(
            "cannot resume session in phase {phase}{}",
            if phase == SessionPhase::Completed {
                " (only interactive sessions resume from Completed)"
            } else {
                ""
            }
        )));
    }

    let patch = json!({
        "metadata": {
            "annotations": {
                (annotations::RESUME_REQUESTED): Timestamp::now().to_string(),
                (annotations::STOP_REQUESTED): null,
            }
        }
    });
    api.patch(&session, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(ApiError::from)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(LifecycleResponse {
            name: session,
            requested: "resume".to_string(),
            phase: phase.to_string(),
        }),
    ))
}

/// A clone is a brand-new session with the same spec: fresh name,
/// fresh children, fresh credential, the cloner as owner.
pub async fn clone_session(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path((workspace, session)): Path<(String, String)>,
    Json(request): Json<CloneSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionCreated>)> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(&client, &caller, &sessions_tuple(&workspace, "get"))
        .await?;

    let target = request
        .target_workspace
        .clone()
        .unwrap_or_else(|| workspace.clone());
    state
        .gate
        .ensure(&client, &caller, &sessions_tuple(&target, "create"))
        .await?;

    let source_api: Api<Session> = Api::namespaced(client.clone(), &workspace);
    let source = source_api.get(&session).await.map_err(ApiError::from)?;

    let name = request.name.clone().unwrap_or_else(|| {
        let suffix = Uuid::new_v4().simple().to_string();
        clone_name(&session, &suffix[..5])
    });
    validation::validate_session_name(&name).map_err(|e| ApiError::Validation(vec![e]))?;

    let mut spec = source.spec.clone();
    spec.user_context = Some(whoami(&client).await?);

    let mut cloned = Session::new(&name, spec);
    cloned.metadata.namespace = Some(target.clone());

    let target_api: Api<Session> = Api::namespaced(client, &target);
    let created = target_api
        .create(&PostParams::default(), &cloned)
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
