use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
};
use k8s_openapi::api::core::v1::Secret;
use kube::Api;

use ambient_common::{
    access::ReviewTuple,
    auth::{Bearer, caller_hash},
    error::{ApiError, ApiResult},
};

use crate::{
    models::{IntegrationStatus, integration_statuses},
    server::AppState,
};

/// Presence and validity of the workspace's integration tokens. Values
/// never leave the handler; only booleans go out.
pub async fn status(
    State(state): State<AppState>,
    Bearer(token): Bearer,
    Path(workspace): Path<String>,
) -> ApiResult<Json<BTreeMap<String, IntegrationStatus>>> {
    let client = state.factory.for_token(&token)?;
    let caller = caller_hash(&token);
    state
        .gate
        .ensure(
            &client,
            &caller,
            &ReviewTuple::namespaced(&workspace, "", "secrets", "list"),
        )
        .await?;

    let settings = super::workspace_settings(&client, &workspace).await?;
    let secrets: Api<Secret> = Api::namespaced(client, &workspace);
    let entries: BTreeMap<String, Vec<u8>> =
        match secrets.get(&settings.integration_secret_name).await {
            Ok(secret) => secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect(),
            Err(kube::Error::Api(ae)) if ae.code == 404 => BTreeMap::new(),
            Err(e) => return Err(ApiError::from(e)),
        };

    Ok(Json(integration_statuses(&entries)))
}
