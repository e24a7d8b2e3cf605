use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub mod defaults;
pub mod validation;

/// Condition types maintained on a `Session` by the controller.
pub mod conditions {
    pub const WORKLOAD_READY: &str = "WorkloadReady";
    pub const WORKSPACE_READY: &str = "WorkspaceReady";
    pub const CREDENTIALS_READY: &str = "CredentialsReady";
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: i64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoRef {
    pub url: String,
    pub branch: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOverrides {
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub storage: Option<String>,
    pub storage_class_name: Option<String>,
    pub priority_class_name: Option<String>,
}

/// Identity of the user that created the session. Stamped by the gateway
/// from the caller credential; never taken from the request body.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRef {
    pub git_url: String,
    pub branch: Option<String>,
    pub path: Option<String>,
}

fn default_timeout_seconds() -> i64 {
    14_400
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "ambient-code.io",
    version = "v1",
    kind = "Session",
    plural = "sessions",
    derive = "PartialEq",
    status = "SessionStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    /// Prompt the runner starts from. May be empty for interactive sessions.
    #[serde(default)]
    pub initial_prompt: String,
    #[serde(default)]
    pub display_name: String,
    /// Interactive sessions keep the runner alive waiting for user input
    /// over the side channel instead of exiting after the initial prompt.
    #[serde(default)]
    pub interactive: bool,
    /// Hard upper bound on runner duration, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout: i64,
    #[serde(default)]
    pub llm_settings: LlmSettings,
    #[serde(default)]
    pub repos: Vec<RepoRef>,
    /// Runner-scoped environment. Not a place for secrets; those travel
    /// in the per-session credential.
    #[serde(default)]
    pub environment_variables: std::collections::BTreeMap<String, String>,
    pub resource_overrides: Option<ResourceOverrides>,
    pub user_context: Option<UserContext>,
    pub active_workflow: Option<WorkflowRef>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum RepoClonePhase {
    #[default]
    Pending,
    Cloned,
    Failed,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub url: String,
    pub branch: Option<String>,
    #[serde(default)]
    pub status: RepoClonePhase,
    pub cloned_at: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    pub git_url: String,
    #[serde(default)]
    pub status: RepoClonePhase,
    pub cloned_at: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    #[serde(default)]
    pub phase: SessionPhase,
    /// Last spec generation the controller fully converged on.
    #[serde(default)]
    pub observed_generation: i64,
    pub start_time: Option<Time>,
    pub completion_time: Option<Time>,
    /// Echo of the last honored resume request; replayed requests with
    /// the same value are no-ops.
    pub last_resumed_at: Option<String>,
    #[serde(default)]
    pub reconciled_repos: Vec<RepoStatus>,
    pub reconciled_workflow: Option<WorkflowStatus>,
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum SessionPhase {
    #[default]
    Pending,
    Creating,
    Running,
    Stopped,
    Completed,
    Failed,
    Timeout,
}

impl SessionPhase {
    /// Terminal phases are sticky; only an explicit resume leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Failed | SessionPhase::Timeout
        )
    }

    /// Phases from which a stop request is honored.
    pub fn stoppable(&self) -> bool {
        matches!(
            self,
            SessionPhase::Pending | SessionPhase::Creating | SessionPhase::Running
        )
    }

    /// `Stopped` always resumes; `Completed` resumes only for
    /// interactive sessions.
    pub fn resumable(&self, interactive: bool) -> bool {
        match self {
            SessionPhase::Stopped => true,
            SessionPhase::Completed => interactive,
            _ => false,
        }
    }
}

impl FromStr for SessionPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SessionPhase::Pending),
            "Creating" => Ok(SessionPhase::Creating),
            "Running" => Ok(SessionPhase::Running),
            "Stopped" => Ok(SessionPhase::Stopped),
            "Completed" => Ok(SessionPhase::Completed),
            "Failed" => Ok(SessionPhase::Failed),
            "Timeout" => Ok(SessionPhase::Timeout),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Pending => write!(f, "Pending"),
            SessionPhase::Creating => write!(f, "Creating"),
            SessionPhase::Running => write!(f, "Running"),
            SessionPhase::Stopped => write!(f, "Stopped"),
            SessionPhase::Completed => write!(f, "Completed"),
            SessionPhase::Failed => write!(f, "Failed"),
            SessionPhase::Timeout => write!(f, "Timeout"),
        }
    }
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

fn default_runner_secret_name() -> String {
    "ambient-runner-secret".to_string()
}

fn default_integration_secret_name() -> String {
    "ambient-integrations".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageDefaults {
    #[serde(default = "default_storage_size")]
    pub size: String,
    pub storage_class_name: Option<String>,
}

impl Default for StorageDefaults {
    fn default() -> Self {
        Self {
            size: default_storage_size(),
            storage_class_name: None,
        }
    }
}

/// Per-workspace configuration. One object per workspace namespace,
/// conventionally named `workspace-settings`. Holds only references to
/// secrets, never secret material.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "ambient-code.io",
    version = "v1",
    kind = "WorkspaceSettings",
    plural = "workspacesettings",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSettingsSpec {
    #[serde(default)]
    pub default_llm_settings: LlmSettings,
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout: i64,
    #[serde(default)]
    pub default_storage: StorageDefaults,
    #[serde(default = "default_runner_secret_name")]
    pub runner_secret_name: String,
    #[serde(default = "default_integration_secret_name")]
    pub integration_secret_name: String,
    pub runner_image: Option<String>,
}

impl Default for WorkspaceSettingsSpec {
    fn default() -> Self {
        Self {
            default_llm_settings: LlmSettings::default(),
            default_timeout: default_timeout_seconds(),
            default_storage: StorageDefaults::default(),
            runner_secret_name: default_runner_secret_name(),
            integration_secret_name: default_integration_secret_name(),
            runner_image: None,
        }
    }
}

/// Conventional name of the singleton `WorkspaceSettings` object.
pub const WORKSPACE_SETTINGS_NAME: &str = "workspace-settings";

/// Name of the per-session credential secret.
pub fn credential_name(session: &str) -> String {
    format!("session-{session}")
}

/// Name of the per-session workspace volume claim.
pub fn volume_name(session: &str) -> String {
    format!("ws-{session}")
}

/// Feature branch the hydrate step checks out in every cloned repo.
pub fn feature_branch(session: &str) -> String {
    format!("ambient/{session}")
}
