//! The narrowed DTO surface. Internal phases collapse to four states;
//! everything the simplified clients don't need stays behind the
//! internal gateway.

use ambient_types::{Session, SessionPhase};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub status: String,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub sessions: Vec<SessionResponse>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repo {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub task: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub repos: Vec<Repo>,
}

/// Public status values: pending, running, completed, failed.
/// A stopped session did not finish its task, so it reports failed
/// with the distinction carried in `error`.
pub fn simplify_phase(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Pending | SessionPhase::Creating => "pending",
        SessionPhase::Running => "running",
        SessionPhase::Completed => "completed",
        SessionPhase::Stopped | SessionPhase::Failed | SessionPhase::Timeout => "failed",
    }
}

pub fn from_session(session: &Session) -> SessionResponse {
    let status = session.status.clone().unwrap_or_default();
    let simplified = simplify_phase(status.phase);
    let (result, error) = match status.phase {
        SessionPhase::Completed => (status.message.clone(), None),
        SessionPhase::Failed => (None, status.message.clone()),
        SessionPhase::Timeout => (None, Some("session timed out".to_string())),
        SessionPhase::Stopped => (None, Some("session stopped".to_string())),
        _ => (None, None),
    };
    SessionResponse {
        id: session.metadata.name.clone().unwrap_or_default(),
        status: simplified.to_string(),
        task: if session.spec.initial_prompt.is_empty() {
            session.spec.display_name.clone()
        } else {
            session.spec.initial_prompt.clone()
        },
        model: Some(session.spec.llm_settings.model.clone()),
        created_at: session
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.to_string()),
        completed_at: status.completion_time.as_ref().map(|t| t.0.to_string()),
        result,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambient_types::{SessionSpec, SessionStatus};

    fn session(phase: SessionPhase, message: Option<&str>) -> Session {
        let mut s = Session::new(
            "fix-ci",
            SessionSpec {
                initial_prompt: "fix the build".to_string(),
                display_name: "Fix CI".to_string(),
                ..Default::default()
            },
        );
        s.status = Some(SessionStatus {
            phase,
            message: message.map(str::to_string),
            ..Default::default()
        });
        s
    }

    #[test]
    fn phases_collapse_to_public_states() {
        assert_eq!(simplify_phase(SessionPhase::Pending), "pending");
        assert_eq!(simplify_phase(SessionPhase::Creating), "pending");
        assert_eq!(simplify_phase(SessionPhase::Running), "running");
        assert_eq!(simplify_phase(SessionPhase::Completed), "completed");
        assert_eq!(simplify_phase(SessionPhase::Failed), "failed");
        assert_eq!(simplify_phase(SessionPhase::Timeout), "failed");
        assert_eq!(simplify_phase(SessionPhase::Stopped), "failed");
    }

    #[test]
    fn completed_sessions_carry_result_not_error() {
        let response = from_session(&session(SessionPhase::Completed, Some("done")));
        assert_eq!(response.status, "completed");
        assert_eq!(response.result.as_deref(), Some("done"));
        assert_eq!(response.error, None);
    }

    #[test]
    fn failed_and_timed_out_sessions_carry_error() {
        let response = from_session(&session(SessionPhase::Failed, Some("exit 1")));
        assert_eq!(response.error.as_deref(), Some("exit 1"));
        assert_eq!(response.result, None);

        let response = from_session(&session(SessionPhase::Timeout, None));
        assert_eq!(response.status, "failed");
        assert_eq!(response.error.as_deref(), Some("session timed out"));
    }

    #[test]
    fn task_falls_back_to_display_name() {
        let mut s = session(SessionPhase::Pending, None);
        s.spec.initial_prompt = String::new();
        assert_eq!(from_session(&s).task, "Fix CI");
    }
}
