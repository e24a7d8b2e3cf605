//! Pure decision logic for the session state machine. The reconcile
//! read phase projects the Session and its observed children into the
//! small structs here; `decide` names the single next action. Keeping
//! this free of cluster calls lets every transition rule be exercised
//! directly.

use std::time::Duration;

use ambient_types::SessionPhase;

/// What the controller observed about the live session object.
#[derive(Clone, Debug, Default)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub generation: i64,
    pub observed_generation: i64,
    pub interactive: bool,
    pub timeout_seconds: i64,
    pub being_deleted: bool,
    pub stop_requested: bool,
    /// Value of the resume-requested annotation, if any.
    pub resume_requested: Option<String>,
    /// Last resume the controller honored (from status).
    pub last_resumed_at: Option<String>,
    pub status_start_time_unix: Option<i64>,
}

/// What the controller observed about the session's child objects.
#[derive(Clone, Debug, Default)]
pub struct ChildrenView {
    /// Spec-hash annotation of the credential secret; `None` if the
    /// secret does not exist, `Some(None)` if it exists unannotated.
    pub credential_hash: Option<Option<String>>,
    pub volume_exists: bool,
    pub workload: Option<WorkloadView>,
}

#[derive(Clone, Debug, Default)]
pub struct WorkloadView {
    pub spec_hash: Option<String>,
    pub succeeded: bool,
    pub failed: bool,
    pub failure_message: Option<String>,
    /// Unrecoverable container/image error observed on the pod.
    pub fatal_reason: Option<String>,
    pub pod_running: bool,
    pub pod_start_unix: Option<i64>,
}

/// Action to be taken upon a `Session` during reconciliation.
#[derive(Debug, PartialEq, Clone)]
pub enum SessionAction {
    Requeue(Duration),

    /// Honor a fresh resume request: rotate children, reset status.
    Resume { requested_at: String },

    /// Honor a stop request (or finish an interrupted teardown).
    Stop { reason: String },

    EnsureCredential,

    EnsureVolume,

    CreateWorkload,

    /// The pending workload's pod template drifted; replace it.
    ReplaceWorkload { reason: String },

    MarkCreating { reason: String },

    MarkRunning { started_at_unix: i64 },

    MarkCompleted,

    MarkFailed { message: String },

    /// Runner exceeded `spec.timeout`; tear down and mark.
    MarkTimeout,

    /// Children converged on the current generation; record it.
    AdvanceGeneration,

    /// The session is in desired state and requires no actions.
    NoOp,
}

impl SessionAction {
    pub fn to_str(&self) -> &str {
        match self {
            SessionAction::Requeue(_) => "Requeue",
            SessionAction::Resume { .. } => "Resume",
            SessionAction::Stop { .. } => "Stop",
            SessionAction::EnsureCredential => "EnsureCredential",
            SessionAction::EnsureVolume => "EnsureVolume",
            SessionAction::CreateWorkload => "CreateWorkload",
            SessionAction::ReplaceWorkload { .. } => "ReplaceWorkload",
            SessionAction::MarkCreating { .. } => "MarkCreating",
            SessionAction::MarkRunning { .. } => "MarkRunning",
            SessionAction::MarkCompleted => "MarkCompleted",
            SessionAction::MarkFailed { .. } => "MarkFailed",
            SessionAction::MarkTimeout => "MarkTimeout",
            SessionAction::AdvanceGeneration => "AdvanceGeneration",
            SessionAction::NoOp => "NoOp",
        }
    }
}

/// A resume request is fresh when its token differs from the last one
/// the controller honored.
fn fresh_resume(session: &SessionView) -> Option<&str> {
    let requested = session.resume_requested.as_deref()?;
    if session.last_resumed_at.as_deref() == Some(requested) {
        return None;
    }
    session
        .phase
        .resumable(session.interactive)
        .then_some(requested)
}

pub fn decide(
    desired_credential_hash: &str,
    desired_workload_hash: &str,
    session: &SessionView,
    children: &ChildrenView,
    now_unix: i64,
) -> SessionAction {
    // Don't do anything while being deleted; owner-links tear the
    // children down.
    if session.being_deleted {
        return SessionAction::Requeue(Duration::from_secs(2));
    }

    if let Some(requested_at) = fresh_resume(session) {
        return SessionAction::Resume {
            requested_at: requested_at.to_string(),
        };
    }

    // Terminal phases are sticky: nothing but the explicit resume above
    // moves them, not even later spec edits.
    if session.phase.is_terminal() {
        return SessionAction::NoOp;
    }

    if session.stop_requested && session.phase.stoppable() {
        return SessionAction::Stop {
            reason: "stop requested".to_string(),
        };
    }

    if session.phase == SessionPhase::Stopped {
        return if children.workload.is_some() {
            // A previous teardown did not finish; delete the workload.
            SessionAction::Stop {
                reason: "completing interrupted stop".to_string(),
            }
        } else {
            SessionAction::NoOp
        };
    }

    // Children are built in dependency order: credential, volume,
    // workload. An earlier child missing blocks the later ones.
    match &children.credential_hash {
        None => return SessionAction::EnsureCredential,
        Some(hash) if hash.as_deref() != Some(desired_credential_hash) => {
            return SessionAction::EnsureCredential;
        }
        Some(_) => {}
    }

    if !children.volume_exists {
        return SessionAction::EnsureVolume;
    }

    let Some(workload) = &children.workload else {
        return SessionAction::CreateWorkload;
    };

    if let Some(reason) = &workload.fatal_reason {
        return SessionAction::MarkFailed {
            message: reason.clone(),
        };
    }
    if workload.succeeded {
        return SessionAction::MarkCompleted;
    }
    if workload.failed {
        return SessionAction::MarkFailed {
            message: workload
                .failure_message
                .clone()
                .unwrap_or_else(|| "runner exited non-zero".to_string()),
        };
    }

    if workload.pod_running {
        let started = workload
            .pod_start_unix
            .or(session.status_start_time_unix)
            .unwrap_or(now_unix);
        if now_unix.saturating_sub(started) >= session.timeout_seconds {
            return SessionAction::MarkTimeout;
        }
        if session.phase != SessionPhase::Running || session.status_start_time_unix.is_none() {
            return SessionAction::MarkRunning {
                started_at_unix: started,
            };
        }
        // Spec edits while running are queued, never applied in place;
        // the generation is recorded only once the live workload
        // matches the desired one.
        if session.observed_generation != session.generation
            && workload.spec_hash.as_deref() == Some(desired_workload_hash)
        {
            return SessionAction::AdvanceGeneration;
        }
        return SessionAction::NoOp;
    }

    // Workload exists but no pod is running yet.
    if workload.spec_hash.as_deref() != Some(desired_workload_hash)
        && matches!(session.phase, SessionPhase::Pending | SessionPhase::Creating)
    {
        return SessionAction::ReplaceWorkload {
            reason: "pod template drifted from desired spec".to_string(),
        };
    }
    if session.phase != SessionPhase::Creating {
        return SessionAction::MarkCreating {
            reason: "waiting for runner pod to be scheduled".to_string(),
        };
    }
    SessionAction::NoOp
}

/// Requeue interval while a session runs: probe well before the
/// timeout expires.
pub fn running_requeue(
    timeout_seconds: i64,
    started_at_unix: i64,
    now_unix: i64,
    probe: Duration,
) -> Duration {
    let remaining = timeout_seconds.saturating_sub(now_unix.saturating_sub(started_at_unix));
    if remaining <= 0 {
        return Duration::from_secs(1);
    }
    probe.min(Duration::from_secs(remaining as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CRED: &str = "cred-hash";
    const WORK: &str = "work-hash";
    const NOW: i64 = 1_700_000_000;

    fn session(phase: SessionPhase) -> SessionView {
        SessionView {
            phase,
            generation: 1,
            observed_generation: 1,
            interactive: false,
            timeout_seconds: 3600,
            ..Default::default()
        }
    }

    fn converged_children() -> ChildrenView {
        ChildrenView {
            credential_hash: Some(Some(CRED.to_string())),
            volume_exists: true,
            workload: Some(WorkloadView {
                spec_hash: Some(WORK.to_string()),
                pod_running: true,
                pod_start_unix: Some(NOW - 60),
                ..Default::default()
            }),
        }
    }

    fn decide_now(session: &SessionView, children: &ChildrenView) -> SessionAction {
        decide(CRED, WORK, session, children, NOW)
    }

    #[test]
    fn builds_children_in_dependency_order() {
        let s = session(SessionPhase::Pending);
        let mut children = ChildrenView::default();
        assert_eq!(decide_now(&s, &children), SessionAction::EnsureCredential);
        children.credential_hash = Some(Some(CRED.to_string()));
        assert_eq!(decide_now(&s, &children), SessionAction::EnsureVolume);
        children.volume_exists = true;
        assert_eq!(decide_now(&s, &children), SessionAction::CreateWorkload);
    }

    #[test]
    fn drifted_credential_is_rebuilt() {
        let s = session(SessionPhase::Pending);
        let mut children = converged_children();
        children.credential_hash = Some(Some("stale".to_string()));
        assert_eq!(decide_now(&s, &children), SessionAction::EnsureCredential);
        children.credential_hash = Some(None);
        assert_eq!(decide_now(&s, &children), SessionAction::EnsureCredential);
    }

    #[test]
    fn converged_running_session_is_noop() {
        let mut s = session(SessionPhase::Running);
        s.status_start_time_unix = Some(NOW - 60);
        assert_eq!(decide_now(&s, &converged_children()), SessionAction::NoOp);
    }

    #[test]
    fn reconcile_is_idempotent_on_converged_state() {
        let mut s = session(SessionPhase::Running);
        s.status_start_time_unix = Some(NOW - 60);
        let children = converged_children();
        let first = decide_now(&s, &children);
        let second = decide_now(&s, &children);
        assert_eq!(first, SessionAction::NoOp);
        assert_eq!(first, second);
    }

    #[test]
    fn running_pod_marks_running_with_pod_start_time() {
        let s = session(SessionPhase::Creating);
        assert_eq!(
            decide_now(&s, &converged_children()),
            SessionAction::MarkRunning {
                started_at_unix: NOW - 60
            }
        );
    }

    #[test]
    fn workload_without_pod_marks_creating_then_waits() {
        let mut children = converged_children();
        children.workload = Some(WorkloadView {
            spec_hash: Some(WORK.to_string()),
            ..Default::default()
        });
        let s = session(SessionPhase::Pending);
        assert!(matches!(
            decide_now(&s, &children),
            SessionAction::MarkCreating { .. }
        ));
        assert_eq!(
            decide_now(&session(SessionPhase::Creating), &children),
            SessionAction::NoOp
        );
    }

    #[test]
    fn succeeded_workload_completes_session() {
        let mut children = converged_children();
        children.workload.as_mut().unwrap().succeeded = true;
        children.workload.as_mut().unwrap().pod_running = false;
        let mut s = session(SessionPhase::Running);
        s.status_start_time_unix = Some(NOW - 60);
        assert_eq!(decide_now(&s, &children), SessionAction::MarkCompleted);
    }

    #[test]
    fn failed_workload_fails_session_with_message() {
        let mut children = converged_children();
        {
            let w = children.workload.as_mut().unwrap();
            w.failed = true;
            w.pod_running = false;
            w.failure_message = Some("BackoffLimitExceeded".to_string());
        }
        assert_eq!(
            decide_now(&session(SessionPhase::Running), &children),
            SessionAction::MarkFailed {
                message: "BackoffLimitExceeded".to_string()
            }
        );
    }

    #[test]
    fn fatal_image_error_fails_without_waiting_for_backoff() {
        let mut children = converged_children();
        {
            let w = children.workload.as_mut().unwrap();
            w.pod_running = false;
            w.fatal_reason = Some("ImageUnavailable: ErrImagePull".to_string());
        }
        assert!(matches!(
            decide_now(&session(SessionPhase::Creating), &children),
            SessionAction::MarkFailed { .. }
        ));
    }

    #[test]
    fn timeout_fires_once_deadline_reached() {
        let mut s = session(SessionPhase::Running);
        s.timeout_seconds = 60;
        s.status_start_time_unix = Some(NOW - 60);
        let mut children = converged_children();
        children.workload.as_mut().unwrap().pod_start_unix = Some(NOW - 60);
        assert_eq!(decide_now(&s, &children), SessionAction::MarkTimeout);

        // One second earlier it is still running.
        children.workload.as_mut().unwrap().pod_start_unix = Some(NOW - 59);
        s.status_start_time_unix = Some(NOW - 59);
        assert_eq!(decide_now(&s, &children), SessionAction::NoOp);
    }

    #[test]
    fn terminal_phases_are_sticky() {
        for phase in [
            SessionPhase::Completed,
            SessionPhase::Failed,
            SessionPhase::Timeout,
        ] {
            // Even with no children and a bumped generation, a terminal
            // session is untouched without a resume.
            let mut s = session(phase);
            s.generation = 5;
            assert_eq!(decide_now(&s, &ChildrenView::default()), SessionAction::NoOp);
        }
    }

    #[test]
    fn stop_request_honored_from_running_phases() {
        for phase in [
            SessionPhase::Pending,
            SessionPhase::Creating,
            SessionPhase::Running,
        ] {
            let mut s = session(phase);
            s.stop_requested = true;
            assert!(matches!(
                decide_now(&s, &converged_children()),
                SessionAction::Stop { .. }
            ));
        }
    }

    #[test]
    fn stop_request_ignored_once_terminal() {
        let mut s = session(SessionPhase::Completed);
        s.stop_requested = true;
        assert_eq!(decide_now(&s, &converged_children()), SessionAction::NoOp);
    }

    #[test]
    fn stopped_session_finishes_interrupted_teardown() {
        let s = session(SessionPhase::Stopped);
        assert!(matches!(
            decide_now(&s, &converged_children()),
            SessionAction::Stop { .. }
        ));
        let mut children = converged_children();
        children.workload = None;
        assert_eq!(decide_now(&s, &children), SessionAction::NoOp);
    }

    #[test]
    fn resume_honored_from_stopped() {
        let mut s = session(SessionPhase::Stopped);
        s.resume_requested = Some("2026-01-01T00:00:00Z".to_string());
        assert_eq!(
            decide_now(&s, &ChildrenView::default()),
            SessionAction::Resume {
                requested_at: "2026-01-01T00:00:00Z".to_string()
            }
        );
    }

    #[test]
    fn resume_from_completed_requires_interactive() {
        let mut s = session(SessionPhase::Completed);
        s.resume_requested = Some("t1".to_string());
        assert_eq!(decide_now(&s, &ChildrenView::default()), SessionAction::NoOp);
        s.interactive = true;
        assert!(matches!(
            decide_now(&s, &ChildrenView::default()),
            SessionAction::Resume { .. }
        ));
    }

    #[test]
    fn replayed_resume_is_a_noop() {
        let mut s = session(SessionPhase::Stopped);
        s.resume_requested = Some("t1".to_string());
        s.last_resumed_at = Some("t1".to_string());
        let mut children = converged_children();
        children.workload = None;
        assert_eq!(decide_now(&s, &children), SessionAction::NoOp);
    }

    #[test]
    fn drift_replaces_workload_only_before_it_runs() {
        let mut children = converged_children();
        {
            let w = children.workload.as_mut().unwrap();
            w.spec_hash = Some("stale".to_string());
            w.pod_running = false;
        }
        assert!(matches!(
            decide_now(&session(SessionPhase::Creating), &children),
            SessionAction::ReplaceWorkload { .. }
        ));

        // While running, the drift is queued, not applied.
        let mut running = converged_children();
        running.workload.as_mut().unwrap().spec_hash = Some("stale".to_string());
        let mut s = session(SessionPhase::Running);
        s.status_start_time_unix = Some(NOW - 60);
        assert_eq!(decide_now(&s, &running), SessionAction::NoOp);
    }

    #[test]
    fn generation_advances_only_when_live_matches_desired() {
        let mut s = session(SessionPhase::Running);
        s.status_start_time_unix = Some(NOW - 60);
        s.generation = 3;
        s.observed_generation = 2;
        assert_eq!(
            decide_now(&s, &converged_children()),
            SessionAction::AdvanceGeneration
        );

        let mut stale = converged_children();
        stale.workload.as_mut().unwrap().spec_hash = Some("stale".to_string());
        assert_eq!(decide_now(&s, &stale), SessionAction::NoOp);
    }

    #[test]
    fn deletion_defers_to_owner_links() {
        let mut s = session(SessionPhase::Running);
        s.being_deleted = true;
        assert_eq!(
            decide_now(&s, &converged_children()),
            SessionAction::Requeue(Duration::from_secs(2))
        );
    }

    #[test]
    fn running_requeue_tracks_remaining_timeout() {
        let probe = Duration::from_secs(30);
        assert_eq!(running_requeue(3600, NOW - 60, NOW, probe), probe);
        assert_eq!(
            running_requeue(70, NOW - 60, NOW, probe),
            Duration::from_secs(10)
        );
        assert_eq!(
            running_requeue(60, NOW - 60, NOW, probe),
            Duration::from_secs(1)
        );
    }
}
