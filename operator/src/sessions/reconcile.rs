use ambient_common::annotations;
use ambient_types::{Session, SessionPhase, WorkspaceSettings, WorkspaceSettingsSpec};
use futures::stream::StreamExt;
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{PersistentVolumeClaim, Pod, Secret},
};
use k8s_openapi::jiff::Timestamp;
use kube::{
    Api, ResourceExt,
    api::ListParams,
    client::Client,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::Instant,
};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    actions, credentials,
    planner::{self, ChildrenView, SessionAction, SessionView, WorkloadView},
    workload,
};
use crate::util::{self, Error, PROBE_INTERVAL, RECONCILE_DEADLINE};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Lease coordinates for active/standby replicas. Renewal runs at a
/// third of the TTL so a healthy holder never comes close to expiry.
const LEASE_NAME: &str = "ambient-session-controller";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW: Duration = Duration::from_secs(5);

/// The name this replica claims the lease under: the Downward-API pod
/// name in-cluster, a random suffix when run from a workstation.
fn replica_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("session-controller-{}", uuid::Uuid::new_v4()))
}

/// Starts the watch-driven controller loop. Sessions are watched
/// across every workspace namespace; their Jobs feed back as owned
/// children, so runner completion surfaces without polling.
fn spawn_controller(client: Client, context: Arc<ContextData>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let sessions: Api<Session> = Api::all(client.clone());
        let jobs: Api<Job> = Api::all(client);
        println!("{}", "🚀 Session controller running".green());
        Controller::new(sessions, Default::default())
            .owns(jobs, Default::default())
            .run(reconcile, on_error, context)
            .for_each(|_res| async {})
            .await;
    })
}

/// Runs the session controller for as long as this replica holds the
/// lease. Losing the lease, or failing to prove we still hold it,
/// pauses reconciles until it is reacquired; only ever one replica
/// drives sessions at a time.
pub async fn run(client: Client) -> Result<(), Error> {
    let context = Arc::new(ContextData::new(client.clone()));

    // The lease lives in the operator's own namespace, separate from
    // the workspaces it manages.
    let operator_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let lease = LeaseLock::new(
        client.clone(),
        &operator_namespace,
        LeaseLockParams {
            holder_id: replica_identity(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            ambient_common::shutdown::shutdown_signal().await;
            shutdown.cancel();
        });
    }
    ambient_common::signal_ready();
    println!("{}", "⚙️ Session operator standing by for leadership".green());

    let mut worker: Option<tokio::task::JoinHandle<()>> = None;
    let mut renew = tokio::time::interval(LEASE_RENEW);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = worker.take() {
                    task.abort();
                    task.await.ok();
                }
                return Ok(());
            }
            _ = renew.tick() => {}
        }

        match lease.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                if worker.is_none() {
                    println!("{}", "👑 Holding the session-controller lease".green());
                    worker = Some(spawn_controller(client.clone(), context.clone()));
                }
            }
            Ok(_) => {
                if let Some(task) = worker.take() {
                    tracing::warn!("lease held elsewhere; pausing reconciles");
                    task.abort();
                }
            }
            Err(e) => {
                // Unable to prove we still hold the lease; stop driving
                // the cluster until the apiserver answers again.
                tracing::warn!(error = %e, "lease renewal failed");
                if let Some(task) = worker.take() {
                    task.abort();
                }
            }
        }
    }
}

type SessionKey = (String, String);

/// Per-session bookkeeping carried between reconciles: when an action
/// was last logged (so steady states don't spam) and how many times in
/// a row this session has failed (feeds the backoff).
struct SessionBook {
    last_logged: Option<(SessionAction, Instant)>,
    failures: u32,
    touched: Instant,
}

/// Shared across every reconcile and error callback.
struct ContextData {
    client: Client,

    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,

    sessions: StdMutex<HashMap<SessionKey, SessionBook>>,
}

// Bound on tracked sessions before idle books get swept.
const MAX_BOOKS: usize = 4096;
const BOOK_IDLE: Duration = Duration::from_secs(3600);
const LOG_REPEAT_AFTER: Duration = Duration::from_secs(300);

impl ContextData {
    fn new(client: Client) -> Self {
        Self {
            client,
            #[cfg(feature = "metrics")]
            metrics: ControllerMetrics::new("sessions"),
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    fn with_book<R>(&self, key: &SessionKey, f: impl FnOnce(&mut SessionBook) -> R) -> R {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        if sessions.len() >= MAX_BOOKS && !sessions.contains_key(key) {
            sessions.retain(|_, book| now.duration_since(book.touched) < BOOK_IDLE);
        }
        let book = sessions.entry(key.clone()).or_insert(SessionBook {
            last_logged: None,
            failures: 0,
            touched: now,
        });
        book.touched = now;
        f(book)
    }

    /// True when this action deserves a log line: it differs from the
    /// last one, or the same line is older than five minutes.
    fn should_log(&self, key: &SessionKey, action: &SessionAction) -> bool {
        self.with_book(key, |book| {
            let repeat = book
                .last_logged
                .as_ref()
                .is_some_and(|(last, at)| last == action && at.elapsed() < LOG_REPEAT_AFTER);
            if !repeat {
                book.last_logged = Some((action.clone(), Instant::now()));
            }
            !repeat
        })
    }

    fn clear_failures(&self, key: &SessionKey) {
        self.with_book(key, |book| book.failures = 0);
    }

    /// Returns the failure streak before this one; the backoff grows
    /// from it.
    fn count_failure(&self, key: &SessionKey) -> u32 {
        self.with_book(key, |book| {
            let streak = book.failures;
            book.failures = book.failures.saturating_add(1);
            streak
        })
    }
}

/// Everything the read phase decided, handed to the write phase.
struct Decision {
    action: SessionAction,
    view: SessionView,
    settings: WorkspaceSettingsSpec,
}

/// One level-triggered pass over a single session: project the current
/// state, pick the single next action, perform it. Both phases run
/// under the reconcile deadline.
async fn reconcile(instance: Arc<Session>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client: Client = context.client.clone();

    // The namespace is the workspace; a session without one is not ours
    // to fix.
    let Some(namespace) = instance.namespace() else {
        return Err(Error::UserInput(
            "Session has no namespace; every session lives inside a workspace".to_string(),
        ));
    };
    let name = instance.name_any();
    let key = (namespace.clone(), name.clone());

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let span = tracing::info_span!("reconcile", workspace = %namespace, session = %name);

    // Read phase: observe everything, decide on one action.
    let decision = match tokio::time::timeout(
        RECONCILE_DEADLINE,
        determine_action(client.clone(), &name, &namespace, &instance).instrument(span.clone()),
    )
    .await
    {
        Ok(decision) => decision?,
        Err(_) => {
            tracing::warn!(session = %name, workspace = %namespace, "reconcile read phase exceeded deadline");
            return Ok(Action::requeue(Duration::from_secs(5)));
        }
    };
    let action = decision.action.clone();

    if action != SessionAction::NoOp && context.should_log(&key, &action) {
        println!(
            "🔧 {}{}{}{}{}",
            namespace.cyan(),
            "/".dimmed(),
            name.cyan(),
            " ACTION: ".dimmed(),
            format!("{:?}", action).cyan(),
        );
    }

    #[cfg(feature = "metrics")]
    context
        .metrics
        .read_histogram
        .with_label_values(&[&name, &namespace, action.to_str()])
        .observe(start.elapsed().as_secs_f64());

    #[cfg(feature = "metrics")]
    context
        .metrics
        .action_counter
        .with_label_values(&[&name, &namespace, action.to_str()])
        .inc();

    #[cfg(feature = "metrics")]
    let timer = match action {
        SessionAction::NoOp => None,
        _ => Some(
            context
                .metrics
                .write_histogram
                .with_label_values(&[&name, &namespace, action.to_str()])
                .start_timer(),
        ),
    };

    #[cfg(feature = "metrics")]
    if let Some(phase) = phase_written_by(&action) {
        context
            .metrics
            .phase_counter
            .with_label_values(&[&namespace, &phase.to_string()])
            .inc();
    }

    // Write phase: perform the single action the read phase decided on.
    let result = match tokio::time::timeout(
        RECONCILE_DEADLINE,
        dispatch(client, &instance, &decision).instrument(span),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(session = %name, workspace = %namespace, "reconcile write phase exceeded deadline");
            Action::requeue(Duration::from_secs(5))
        }
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    context.clear_failures(&key);
    Ok(result)
}

#[cfg(feature = "metrics")]
fn phase_written_by(action: &SessionAction) -> Option<SessionPhase> {
    match action {
        SessionAction::Resume { .. } => Some(SessionPhase::Pending),
        SessionAction::Stop { .. } => Some(SessionPhase::Stopped),
        SessionAction::MarkCreating { .. } => Some(SessionPhase::Creating),
        SessionAction::MarkRunning { .. } => Some(SessionPhase::Running),
        SessionAction::MarkCompleted => Some(SessionPhase::Completed),
        SessionAction::MarkFailed { .. } => Some(SessionPhase::Failed),
        SessionAction::MarkTimeout => Some(SessionPhase::Timeout),
        _ => None,
    }
}

async fn dispatch(client: Client, instance: &Session, decision: &Decision) -> Result<Action, Error> {
    let now_unix = Timestamp::now().as_second();
    let running_requeue = || {
        let started = decision
            .view
            .status_start_time_unix
            .unwrap_or(now_unix);
        Action::requeue(planner::running_requeue(
            decision.view.timeout_seconds,
            started,
            now_unix,
            PROBE_INTERVAL,
        ))
    };
    Ok(match &decision.action {
        SessionAction::Requeue(duration) => Action::requeue(*duration),
        SessionAction::Resume { requested_at } => {
            actions::resume(client, instance, requested_at.clone()).await?;
            Action::requeue(Duration::from_secs(1))
        }
        SessionAction::Stop { reason } => {
            actions::stop(client, instance, reason.clone()).await?;
            Action::await_change()
        }
        SessionAction::EnsureCredential => {
            if actions::ensure_credential(client, instance, &decision.settings).await? {
                Action::requeue(Duration::from_secs(1))
            } else {
                // Blocked on workspace secrets; only user action fixes it.
                Action::requeue(Duration::from_secs(60))
            }
        }
        SessionAction::EnsureVolume => {
            actions::ensure_volume(client, instance, &decision.settings).await?;
            Action::requeue(Duration::from_secs(1))
        }
        SessionAction::CreateWorkload => {
            actions::create_workload(client, instance, &decision.settings).await?;
            Action::requeue(Duration::from_secs(2))
        }
        SessionAction::ReplaceWorkload { reason } => {
            actions::replace_workload(client, instance, reason.clone()).await?;
            Action::requeue(Duration::from_secs(1))
        }
        SessionAction::MarkCreating { reason } => {
            actions::mark_creating(client, instance, reason.clone()).await?;
            Action::requeue(Duration::from_secs(5))
        }
        SessionAction::MarkRunning { started_at_unix } => {
            actions::mark_running(client, instance, *started_at_unix).await?;
            Action::requeue(planner::running_requeue(
                decision.view.timeout_seconds,
                *started_at_unix,
                now_unix,
                PROBE_INTERVAL,
            ))
        }
        SessionAction::MarkCompleted => {
            actions::mark_completed(client, instance).await?;
            Action::await_change()
        }
        SessionAction::MarkFailed { message } => {
            actions::mark_failed(client, instance, message.clone()).await?;
            Action::await_change()
        }
        SessionAction::MarkTimeout => {
            actions::mark_timeout(client, instance).await?;
            Action::await_change()
        }
        SessionAction::AdvanceGeneration => {
            actions::advance_generation(client, instance).await?;
            Action::requeue(PROBE_INTERVAL)
        }
        SessionAction::NoOp => {
            if decision.view.phase == SessionPhase::Running {
                running_requeue()
            } else {
                Action::requeue(PROBE_INTERVAL)
            }
        }
    })
}

/// Read phase: project the session and its children, then let the
/// planner name the next action.
async fn determine_action(
    client: Client,
    name: &str,
    namespace: &str,
    instance: &Session,
) -> Result<Decision, Error> {
    let settings = fetch_settings(client.clone(), namespace).await?;
    let view = session_view(instance);

    // Deletion is handled by owner-links; don't race the teardown.
    if view.being_deleted {
        return Ok(Decision {
            action: SessionAction::Requeue(Duration::from_secs(2)),
            view,
            settings,
        });
    }

    let children = observe_children(client.clone(), name, namespace).await?;

    let desired_credential_hash =
        desired_credential_hash(client, namespace, instance, &settings).await?;
    let desired_job = workload::build_job(instance, &settings)?;
    let desired_workload_hash = workload::hash_job(&desired_job);

    let action = planner::decide(
        &desired_credential_hash,
        &desired_workload_hash,
        &view,
        &children,
        Timestamp::now().as_second(),
    );
    Ok(Decision {
        action,
        view,
        settings,
    })
}

/// Hash of the credential bundle the session should currently carry.
/// Depends on the workspace secrets and the restart epoch; an absent
/// runner secret yields an unknown hash and the ensure path reports
/// the condition.
async fn desired_credential_hash(
    client: Client,
    namespace: &str,
    instance: &Session,
    settings: &WorkspaceSettingsSpec,
) -> Result<String, Error> {
    let secrets: Api<Secret> = Api::namespaced(client, namespace);
    let runner_secret = match secrets.get(&settings.runner_secret_name).await {
        Ok(secret) => Some(secret),
        Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(String::new()),
        Err(e) => return Err(e.into()),
    };
    let integration_secret = match secrets.get(&settings.integration_secret_name).await {
        Ok(secret) => Some(secret),
        Err(kube::Error::Api(ae)) if ae.code == 404 => None,
        Err(e) => return Err(e.into()),
    };
    let data = credentials::assemble_data(runner_secret.as_ref(), integration_secret.as_ref());
    Ok(credentials::hash_credential(
        &data,
        &workload::restart_epoch(instance),
    ))
}

async fn fetch_settings(client: Client, namespace: &str) -> Result<WorkspaceSettingsSpec, Error> {
    let api: Api<WorkspaceSettings> = Api::namespaced(client, namespace);
    match api.get(ambient_types::WORKSPACE_SETTINGS_NAME).await {
        Ok(settings) => Ok(settings.spec),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(WorkspaceSettingsSpec::default()),
        Err(e) => Err(e.into()),
    }
}

fn session_view(instance: &Session) -> SessionView {
    let status = instance.status.clone().unwrap_or_default();
    let annotations = instance.metadata.annotations.clone().unwrap_or_default();
    SessionView {
        phase: status.phase,
        generation: instance.metadata.generation.unwrap_or_default(),
        observed_generation: status.observed_generation,
        interactive: instance.spec.interactive,
        timeout_seconds: instance.spec.timeout,
        being_deleted: instance.metadata.deletion_timestamp.is_some(),
        stop_requested: annotations.contains_key(annotations::STOP_REQUESTED),
        resume_requested: annotations.get(annotations::RESUME_REQUESTED).cloned(),
        last_resumed_at: status.last_resumed_at,
        status_start_time_unix: status.start_time.map(|t| t.0.as_second()),
    }
}

async fn observe_children(
    client: Client,
    name: &str,
    namespace: &str,
) -> Result<ChildrenView, Error> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let credential_hash = match secrets.get(&ambient_types::credential_name(name)).await {
        Ok(secret) => Some(
            secret
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(annotations::SPEC_HASH))
                .cloned(),
        ),
        Err(kube::Error::Api(ae)) if ae.code == 404 => None,
        Err(e) => return Err(e.into()),
    };

    let claims: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let volume_exists = match claims.get(&ambient_types::volume_name(name)).await {
        Ok(_) => true,
        Err(kube::Error::Api(ae)) if ae.code == 404 => false,
        Err(e) => return Err(e.into()),
    };

    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let job = match jobs.get(name).await {
        Ok(job) => Some(job),
        Err(kube::Error::Api(ae)) if ae.code == 404 => None,
        Err(e) => return Err(e.into()),
    };

    let workload = match &job {
        Some(job) => {
            let pods: Api<Pod> = Api::namespaced(client, namespace);
            let selector = format!("job-name={name}");
            let pod_list = pods.list(&ListParams::default().labels(&selector)).await?;
            let pod = pick_pod(&pod_list.items);
            Some(workload_view(job, pod))
        }
        None => None,
    };

    Ok(ChildrenView {
        credential_hash,
        volume_exists,
        workload,
    })
}

/// Prefer a running pod; otherwise the most recently created one, which
/// carries the freshest failure detail.
fn pick_pod(pods: &[Pod]) -> Option<&Pod> {
    pods.iter()
        .find(|p| {
            p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
        })
        .or_else(|| {
            pods.iter().max_by_key(|p| {
                p.metadata
                    .creation_timestamp
                    .as_ref()
                    .map(|t| t.0.as_second())
                    .unwrap_or(i64::MIN)
            })
        })
}

/// Waiting reasons that no amount of retrying fixes.
const FATAL_WAITING: &[&str] = &[
    "ImagePullBackOff",
    "ErrImageNeverPull",
    "RegistryUnavailable",
    "ErrImagePull",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
    "RunContainerError",
];

fn pod_fatal_reason(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;
    let statuses = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten());
    for container_status in statuses {
        if let Some(state) = &container_status.state
            && let Some(waiting) = &state.waiting
        {
            let reason = waiting.reason.as_deref().unwrap_or("");
            if FATAL_WAITING.contains(&reason) {
                return Some(format!(
                    "ImageUnavailable: container '{}' is in unrecoverable waiting state: {}",
                    container_status.name, reason,
                ));
            }
        }
    }
    None
}

fn job_spec_hash(job: &Job) -> Option<String> {
    job.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::SPEC_HASH))
        .cloned()
}

fn job_condition(job: &Job, type_: &str) -> Option<String> {
    job.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == type_ && c.status == "True")
        .map(|c| {
            c.message
                .clone()
                .or_else(|| c.reason.clone())
                .unwrap_or_else(|| type_.to_string())
        })
}

pub(crate) fn workload_view(job: &Job, pod: Option<&Pod>) -> WorkloadView {
    let succeeded = job
        .status
        .as_ref()
        .and_then(|s| s.succeeded)
        .unwrap_or_default()
        > 0
        || job_condition(job, "Complete").is_some();
    let failure_message = job_condition(job, "Failed");
    let pod_running =
        pod.and_then(|p| p.status.as_ref()).and_then(|s| s.phase.as_deref()) == Some("Running");
    WorkloadView {
        spec_hash: job_spec_hash(job),
        succeeded,
        failed: failure_message.is_some(),
        failure_message,
        fatal_reason: pod.and_then(pod_fatal_reason),
        pod_running,
        pod_start_unix: pod
            .and_then(|p| p.status.as_ref())
            .and_then(|s| s.start_time.as_ref())
            .map(|t| t.0.as_second()),
    }
}

/// Failed reconciles requeue on an exponential, jittered schedule
/// keyed by the session's failure streak, so one broken session backs
/// off on its own without throttling its neighbors.
fn on_error(instance: Arc<Session>, error: &Error, context: Arc<ContextData>) -> Action {
    let key = (
        instance.namespace().unwrap_or_default(),
        instance.name_any(),
    );
    let streak = context.count_failure(&key);
    let jitter = (rand::random::<f64>() - 0.5) * 0.4;
    let delay = util::backoff_duration(streak, jitter);
    tracing::warn!(
        workspace = %key.0,
        session = %key.1,
        streak,
        retry_in = ?delay,
        error = ?error,
        "reconcile failed"
    );
    eprintln!(
        "{}",
        format!("❌ {}/{} reconcile failed, retrying in {:.1?}", key.0, key.1, delay).red()
    );
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting, ContainerStatus, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn job_with_status(status: JobStatus) -> Job {
        Job {
            metadata: Default::default(),
            spec: None,
            status: Some(status),
        }
    }

    fn pod_with_phase(phase: &str, start_unix: i64) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                start_time: Some(Time(Timestamp::from_second(start_unix).unwrap())),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn waiting_pod(reason: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "runner".to_string(),
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some(reason.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn succeeded_job_projects_success() {
        let job = job_with_status(JobStatus {
            succeeded: Some(1),
            ..Default::default()
        });
        let view = workload_view(&job, None);
        assert!(view.succeeded);
        assert!(!view.failed);
    }

    #[test]
    fn failed_condition_carries_message() {
        let job = job_with_status(JobStatus {
            conditions: Some(vec![k8s_openapi::api::batch::v1::JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                message: Some("BackoffLimitExceeded".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        });
        let view = workload_view(&job, None);
        assert!(view.failed);
        assert_eq!(view.failure_message.as_deref(), Some("BackoffLimitExceeded"));
    }

    #[test]
    fn running_pod_projects_start_time() {
        let job = job_with_status(JobStatus::default());
        let pod = pod_with_phase("Running", 1_700_000_000);
        let view = workload_view(&job, Some(&pod));
        assert!(view.pod_running);
        assert_eq!(view.pod_start_unix, Some(1_700_000_000));
    }

    #[test]
    fn image_errors_are_fatal_others_are_not() {
        assert!(pod_fatal_reason(&waiting_pod("ErrImagePull")).is_some());
        assert!(pod_fatal_reason(&waiting_pod("ImagePullBackOff")).is_some());
        assert!(pod_fatal_reason(&waiting_pod("ContainerCreating")).is_none());
    }

    #[test]
    fn prefers_running_pod_over_newer_dead_one() {
        let mut old_running = pod_with_phase("Running", 100);
        old_running.metadata.creation_timestamp = Some(Time(Timestamp::from_second(100).unwrap()));
        let mut new_failed = pod_with_phase("Failed", 200);
        new_failed.metadata.creation_timestamp = Some(Time(Timestamp::from_second(200).unwrap()));
        let pods = vec![new_failed, old_running];
        let picked = pick_pod(&pods).unwrap();
        assert_eq!(
            picked.status.as_ref().unwrap().phase.as_deref(),
            Some("Running")
        );
    }
}
