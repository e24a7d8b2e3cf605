use std::collections::BTreeMap;

use ambient_types::{
    LlmSettings, RepoRef, ResourceOverrides, Session, SessionSpec, UserContext, WorkflowRef,
    WorkspaceSettingsSpec, defaults,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

// =============================================================================
// Workspaces
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Time>,
    pub status: String,
}

// =============================================================================
// Sessions
// =============================================================================

/// Request to create a session. Missing LLM settings and timeout
/// inherit the workspace defaults at creation and are frozen into the
/// stored spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub initial_prompt: String,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub llm_settings: Option<LlmSettings>,
    #[serde(default)]
    pub repos: Vec<RepoRef>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_overrides: Option<ResourceOverrides>,
    #[serde(default)]
    pub active_workflow: Option<WorkflowRef>,
}

impl CreateSessionRequest {
    /// Materializes the stored spec: workspace defaults are resolved
    /// here exactly once and the caller identity is stamped in.
    pub fn into_spec(
        self,
        settings: &WorkspaceSettingsSpec,
        user: Option<UserContext>,
    ) -> SessionSpec {
        SessionSpec {
            initial_prompt: self.initial_prompt,
            display_name: self.display_name,
            interactive: self.interactive,
            timeout: defaults::resolve_timeout(self.timeout, settings),
            llm_settings: defaults::resolve_llm(self.llm_settings, settings),
            repos: self.repos,
            environment_variables: self.environment_variables,
            resource_overrides: self.resource_overrides,
            user_context: user,
            active_workflow: self.active_workflow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub name: String,
    pub uid: String,
}

/// Spec-only update with optimistic concurrency. The resource version
/// must match the stored object or the write is rejected with 409.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub resource_version: Option<String>,
    pub spec: SessionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloneSessionRequest {
    #[serde(default)]
    pub target_workspace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleResponse {
    pub name: String,
    pub requested: String,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub name: String,
    pub display_name: String,
    pub initial_prompt: String,
    pub phase: String,
    pub interactive: bool,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn summarize(session: &Session) -> SessionSummary {
    let status = session.status.clone().unwrap_or_default();
    SessionSummary {
        name: session.metadata.name.clone().unwrap_or_default(),
        display_name: session.spec.display_name.clone(),
        initial_prompt: session.spec.initial_prompt.clone(),
        phase: status.phase.to_string(),
        interactive: session.spec.interactive,
        model: session.spec.llm_settings.model.clone(),
        created_at: session.metadata.creation_timestamp.clone(),
        start_time: status.start_time,
        completion_time: status.completion_time,
        message: status.message,
    }
}

/// Case-insensitive substring match against name and display name.
pub fn matches_search(session: &Session, search: &str) -> bool {
    if search.is_empty() {
        return true;
    }
    let needle = search.to_lowercase();
    session
        .metadata
        .name
        .as_deref()
        .unwrap_or_default()
        .to_lowercase()
        .contains(&needle)
        || session.spec.display_name.to_lowercase().contains(&needle)
}

/// Stable ordering for pagination: newest first, name as tiebreak.
pub fn session_sort_key(session: &Session) -> (i64, String) {
    let created = session
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| -t.0.as_second())
        .unwrap_or(0);
    (created, session.metadata.name.clone().unwrap_or_default())
}

/// Name for a cloned session, kept within the DNS label budget.
pub fn clone_name(source: &str, suffix: &str) -> String {
    let budget = ambient_types::validation::MAX_NAME_LEN - "-clone-".len() - suffix.len();
    let base: String = source.chars().take(budget).collect();
    let base = base.trim_end_matches('-');
    format!("{base}-clone-{suffix}")
}

// =============================================================================
// Integrations
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrationStatus {
    pub configured: bool,
    pub valid: bool,
}

/// Which workspace integration-secret keys feed which integration.
const INTEGRATION_KEYS: &[(&str, &[&str])] = &[
    ("github", &["GITHUB_TOKEN", "GIT_TOKEN", "GIT_TOKEN_GITHUB"]),
    ("jira", &["JIRA_TOKEN", "JIRA_API_TOKEN"]),
    ("drive", &["GOOGLE_DRIVE_TOKEN", "DRIVE_TOKEN"]),
    ("anthropic", &["ANTHROPIC_API_KEY"]),
];

/// Presence/validity booleans only; secret values never leave this
/// function's input.
pub fn integration_statuses(
    entries: &BTreeMap<String, Vec<u8>>,
) -> BTreeMap<String, IntegrationStatus> {
    INTEGRATION_KEYS
        .iter()
        .map(|(name, keys)| {
            let matching: Vec<_> = keys.iter().filter_map(|k| entries.get(*k)).collect();
            let configured = !matching.is_empty();
            let valid = matching.iter().any(|v| !v.is_empty());
            (
                name.to_string(),
                IntegrationStatus { configured, valid },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambient_types::{SessionPhase, SessionStatus};

    fn session(name: &str, display: &str, phase: SessionPhase) -> Session {
        let mut s = Session::new(
            name,
            SessionSpec {
                display_name: display.to_string(),
                ..Default::default()
            },
        );
        s.status = Some(SessionStatus {
            phase,
            ..Default::default()
        });
        s
    }

    #[test]
    fn summary_reflects_phase_and_model() {
        let mut s = session("fix-ci", "Fix CI", SessionPhase::Running);
        s.spec.llm_settings = LlmSettings::default();
        let summary = summarize(&s);
        assert_eq!(summary.name, "fix-ci");
        assert_eq!(summary.phase, "Running");
        assert_eq!(summary.model, "claude-sonnet-4-5");
    }

    #[test]
    fn search_matches_name_and_display_name() {
        let s = session("fix-ci", "Repair the pipeline", SessionPhase::Pending);
        assert!(matches_search(&s, "fix"));
        assert!(matches_search(&s, "PIPELINE"));
        assert!(matches_search(&s, ""));
        assert!(!matches_search(&s, "deploy"));
    }

    #[test]
    fn clone_names_stay_dns_safe() {
        let n = clone_name("fix-ci", "a1b2c");
        assert_eq!(n, "fix-ci-clone-a1b2c");
        let long = "x".repeat(63);
        let n = clone_name(&long, "a1b2c");
        assert!(n.len() <= ambient_types::validation::MAX_NAME_LEN);
        assert!(ambient_types::validation::validate_session_name(&n).is_ok());
    }

    #[test]
    fn defaults_freeze_into_created_spec() {
        let settings = WorkspaceSettingsSpec {
            default_timeout: 7200,
            ..Default::default()
        };
        let request = CreateSessionRequest {
            name: None,
            display_name: "d".to_string(),
            initial_prompt: "p".to_string(),
            interactive: false,
            timeout: None,
            llm_settings: None,
            repos: Vec::new(),
            environment_variables: Default::default(),
            resource_overrides: None,
            active_workflow: None,
        };
        let spec = request.into_spec(&settings, None);
        assert_eq!(spec.timeout, 7200);
        assert_eq!(spec.llm_settings, settings.default_llm_settings);
    }

    #[test]
    fn integration_statuses_carry_no_values() {
        let entries = BTreeMap::from([
            ("GITHUB_TOKEN".to_string(), b"ghp_xyz".to_vec()),
            ("JIRA_TOKEN".to_string(), Vec::new()),
        ]);
        let statuses = integration_statuses(&entries);
        assert_eq!(
            statuses["github"],
            IntegrationStatus {
                configured: true,
                valid: true
            }
        );
        // Present but empty: configured, not valid.
        assert_eq!(
            statuses["jira"],
            IntegrationStatus {
                configured: true,
                valid: false
            }
        );
        assert_eq!(
            statuses["drive"],
            IntegrationStatus {
                configured: false,
                valid: false
            }
        );
        let serialized = serde_json::to_string(&statuses).unwrap();
        assert!(!serialized.contains("ghp_xyz"));
    }
}
