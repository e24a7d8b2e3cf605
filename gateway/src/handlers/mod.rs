pub mod files;
pub mod integrations;
pub mod lifecycle;
pub mod sessions;
pub mod workspaces;

use ambient_common::error::ApiError;
use ambient_types::{WorkspaceSettings, WorkspaceSettingsSpec};
use kube::{Api, Client};

/// Workspace settings with 404 falling back to defaults; a workspace
/// without explicit settings still gets sane sessions.
pub(crate) async fn workspace_settings(
    client: &Client,
    workspace: &str,
) -> Result<WorkspaceSettingsSpec, ApiError> {
    let api: Api<WorkspaceSettings> = Api::namespaced(client.clone(), workspace);
    match api.get(ambient_types::WORKSPACE_SETTINGS_NAME).await {
        Ok(settings) => Ok(settings.spec),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(WorkspaceSettingsSpec::default()),
        Err(e) => Err(e.into()),
    }
}
