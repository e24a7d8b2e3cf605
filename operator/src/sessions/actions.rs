//! Write phase of session reconciliation: child creation/teardown and
//! status projection. Every status write goes through the status
//! subresource with a bounded conflict retry; spec fields are never
//! touched here.

use ambient_common::annotations;
use ambient_types::{
    RepoStatus, Session, SessionPhase, SessionStatus, WorkspaceSettingsSpec, conditions,
};
use k8s_openapi::{
    api::{batch::v1::Job, core::v1::{PersistentVolumeClaim, Secret}},
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    jiff::Timestamp,
};
use kube::{Api, Client, api::{DeleteParams, PostParams, Resource}};

use super::{credentials, workload};
use crate::util::{Error, patch::patch_status_with_retry};

fn instance_name(instance: &Session) -> Result<&str, Error> {
    instance
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("Session is missing metadata.name".to_string()))
}

fn instance_namespace(instance: &Session) -> Result<&str, Error> {
    instance
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("Session is missing metadata.namespace".to_string()))
}

fn now() -> Time {
    Time::from(Timestamp::now())
}

fn time_from_unix(seconds: i64) -> Time {
    Time::from(Timestamp::from_second(seconds).unwrap_or_else(|_| Timestamp::now()))
}

/// Upserts one condition, moving `lastTransitionTime` only when the
/// condition's truth value actually changes.
pub fn set_condition(
    status: &mut SessionStatus,
    type_: &str,
    value: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
    at: Time,
) {
    let existing = status.conditions.iter_mut().find(|c| c.type_ == type_);
    match existing {
        Some(condition) => {
            if condition.status != value {
                condition.last_transition_time = at;
            }
            condition.status = value.to_string();
            condition.reason = reason.to_string();
            condition.message = message.to_string();
            condition.observed_generation = observed_generation;
        }
        None => status.conditions.push(Condition {
            type_: type_.to_string(),
            status: value.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: at,
            observed_generation,
        }),
    }
}

/// Per-repo statuses start out Pending; the runner upgrades them from
/// the hydrate report through its own credential.
fn initial_repo_statuses(instance: &Session) -> Vec<RepoStatus> {
    instance
        .spec
        .repos
        .iter()
        .map(|repo| RepoStatus {
            url: repo.url.clone(),
            branch: repo.branch.clone(),
            status: Default::default(),
            cloned_at: None,
        })
        .collect()
}

async fn delete_ignoring_absent<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn create_ignoring_conflict<K>(api: &Api<K>, object: &K) -> Result<(), Error>
where
    K: Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.create(&PostParams::default(), object).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(object) => Ok(Some(object)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Builds (or rotates) the per-session credential from the workspace
/// secrets. Returns false when blocked on a missing workspace runner
/// secret: the condition goes False and the periodic resync picks it
/// back up once the user rotates secrets.
pub async fn ensure_credential(
    client: Client,
    instance: &Session,
    settings: &WorkspaceSettingsSpec,
) -> Result<bool, Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let runner_secret = get_opt(&secrets, &settings.runner_secret_name).await?;
    if runner_secret.is_none() {
        let reason_message = format!(
            "workspace runner secret {:?} not found",
            settings.runner_secret_name
        );
        patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
            set_condition(
                status,
                conditions::CREDENTIALS_READY,
                "False",
                "MissingWorkspaceSecret",
                &reason_message,
                generation,
                now(),
            );
        })
        .await?;
        return Ok(false);
    }
    let integration_secret = get_opt(&secrets, &settings.integration_secret_name).await?;

    let desired = credentials::build_credential(
        instance,
        runner_secret.as_ref(),
        integration_secret.as_ref(),
    )?;
    let desired_name = ambient_types::credential_name(name);
    let desired_hash = desired
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::SPEC_HASH))
        .cloned();

    if let Some(existing) = get_opt(&secrets, &desired_name).await? {
        let existing_hash = existing
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::SPEC_HASH))
            .cloned();
        if existing_hash != desired_hash {
            // Rotation: replace, never patch secret material in place.
            delete_ignoring_absent(&secrets, &desired_name).await?;
            create_ignoring_conflict(&secrets, &desired).await?;
        }
    } else {
        create_ignoring_conflict(&secrets, &desired).await?;
    }

    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        set_condition(
            status,
            conditions::CREDENTIALS_READY,
            "True",
            "CredentialAssembled",
            "per-session credential is in place",
            generation,
            now(),
        );
    })
    .await?;
    Ok(true)
}

pub async fn ensure_volume(
    client: Client,
    instance: &Session,
    settings: &WorkspaceSettingsSpec,
) -> Result<(), Error> {
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;
    let desired = workload::build_pvc(instance, settings)?;
    let claims: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    create_ignoring_conflict(&claims, &desired).await?;

    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        set_condition(
            status,
            conditions::WORKSPACE_READY,
            "True",
            "VolumeProvisioned",
            "workspace volume claim is in place",
            generation,
            now(),
        );
    })
    .await?;
    Ok(())
}

pub async fn create_workload(
    client: Client,
    instance: &Session,
    settings: &WorkspaceSettingsSpec,
) -> Result<(), Error> {
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;
    let mut desired = workload::build_job(instance, settings)?;
    let hash = workload::hash_job(&desired);
    desired
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(annotations::SPEC_HASH.to_string(), hash);

    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    create_ignoring_conflict(&jobs, &desired).await?;

    let repos = initial_repo_statuses(instance);
    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        if status.reconciled_repos.is_empty() {
            status.reconciled_repos = repos.clone();
        }
        set_condition(
            status,
            conditions::WORKLOAD_READY,
            "False",
            "WorkloadCreated",
            "runner workload created, waiting for pod",
            generation,
            now(),
        );
    })
    .await?;
    Ok(())
}

/// Pod templates are immutable; a drifted workload is deleted and the
/// next reconcile recreates it from the current spec.
pub async fn replace_workload(
    client: Client,
    instance: &Session,
    reason: String,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    tracing::info!(session = %name, %reason, "replacing runner workload");
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    delete_ignoring_absent(&jobs, name).await?;
    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        status.message = Some(format!("rebuilding runner workload: {reason}"));
    })
    .await?;
    Ok(())
}

pub async fn stop(client: Client, instance: &Session, reason: String) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    delete_ignoring_absent(&jobs, name).await?;

    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        status.phase = SessionPhase::Stopped;
        if status.completion_time.is_none() {
            status.completion_time = Some(now());
        }
        status.message = Some(reason.clone());
        set_condition(
            status,
            conditions::WORKLOAD_READY,
            "False",
            "Stopped",
            "workload deleted on stop request",
            generation,
            now(),
        );
    })
    .await?;
    Ok(())
}

/// Honors a resume request: the workload and credential rotate (their
/// hashes include the restart epoch), the volume stays, and status is
/// reset so the normal create path rebuilds everything.
pub async fn resume(
    client: Client,
    instance: &Session,
    requested_at: String,
) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    delete_ignoring_absent(&jobs, name).await?;
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    delete_ignoring_absent(&secrets, &ambient_types::credential_name(name)).await?;

    let repos = initial_repo_statuses(instance);
    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        status.phase = SessionPhase::Pending;
        status.start_time = None;
        status.completion_time = None;
        status.last_resumed_at = Some(requested_at.clone());
        status.reconciled_repos = repos.clone();
        status.message = Some("resumed; rebuilding session children".to_string());
        set_condition(
            status,
            conditions::WORKLOAD_READY,
            "False",
            "Resumed",
            "session resumed, children rebuilding",
            generation,
            now(),
        );
    })
    .await?;
    Ok(())
}

pub async fn mark_creating(
    client: Client,
    instance: &Session,
    reason: String,
) -> Result<(), Error> {
    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        status.phase = SessionPhase::Creating;
        status.message = Some(reason.clone());
    })
    .await?;
    Ok(())
}

pub async fn mark_running(
    client: Client,
    instance: &Session,
    started_at_unix: i64,
) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        status.phase = SessionPhase::Running;
        status.start_time = Some(time_from_unix(started_at_unix));
        status.message = Some("runner pod is running".to_string());
        set_condition(
            status,
            conditions::WORKLOAD_READY,
            "True",
            "PodRunning",
            "runner pod is running",
            generation,
            now(),
        );
    })
    .await?;
    Ok(())
}

pub async fn mark_completed(client: Client, instance: &Session) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        status.phase = SessionPhase::Completed;
        if status.completion_time.is_none() {
            status.completion_time = Some(now());
        }
        status.observed_generation = generation.unwrap_or_default();
        status.message = Some("runner exited successfully".to_string());
        set_condition(
            status,
            conditions::WORKLOAD_READY,
            "False",
            "PodSucceeded",
            "runner exited 0",
            generation,
            now(),
        );
    })
    .await?;
    Ok(())
}

pub async fn mark_failed(client: Client, instance: &Session, message: String) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    let reason = if message.starts_with("ImageUnavailable") {
        "ImageUnavailable"
    } else {
        "RunnerFailed"
    };
    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        status.phase = SessionPhase::Failed;
        if status.completion_time.is_none() {
            status.completion_time = Some(now());
        }
        status.observed_generation = generation.unwrap_or_default();
        status.message = Some(message.clone());
        set_condition(
            status,
            conditions::WORKLOAD_READY,
            "False",
            reason,
            &message,
            generation,
            now(),
        );
    })
    .await?;
    Ok(())
}

/// Deadline enforcement: delete the workload, then mark.
pub async fn mark_timeout(client: Client, instance: &Session) -> Result<(), Error> {
    let name = instance_name(instance)?;
    let namespace = instance_namespace(instance)?;
    let generation = instance.metadata.generation;
    let timeout = instance.spec.timeout;
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    delete_ignoring_absent(&jobs, name).await?;

    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        status.phase = SessionPhase::Timeout;
        if status.completion_time.is_none() {
            status.completion_time = Some(now());
        }
        status.observed_generation = generation.unwrap_or_default();
        status.message = Some(format!("runner exceeded timeout of {timeout} seconds"));
        set_condition(
            status,
            conditions::WORKLOAD_READY,
            "False",
            "DeadlineExceeded",
            "workload deleted after timeout",
            generation,
            now(),
        );
    })
    .await?;
    Ok(())
}

/// Records that the live children match the current spec generation.
pub async fn advance_generation(client: Client, instance: &Session) -> Result<(), Error> {
    let generation = instance.metadata.generation.unwrap_or_default();
    patch_status_with_retry(client, instance, move |status: &mut SessionStatus| {
        if status.observed_generation < generation {
            status.observed_generation = generation;
        }
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(seconds: i64) -> Time {
        time_from_unix(seconds)
    }

    #[test]
    fn set_condition_inserts_then_updates() {
        let mut status = SessionStatus::default();
        set_condition(
            &mut status,
            conditions::WORKLOAD_READY,
            "False",
            "WorkloadCreated",
            "waiting",
            Some(1),
            time(100),
        );
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, "False");

        set_condition(
            &mut status,
            conditions::WORKLOAD_READY,
            "True",
            "PodRunning",
            "running",
            Some(1),
            time(200),
        );
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, "True");
        assert_eq!(status.conditions[0].last_transition_time, time(200));
    }

    #[test]
    fn transition_time_is_sticky_while_value_unchanged() {
        let mut status = SessionStatus::default();
        set_condition(
            &mut status,
            conditions::CREDENTIALS_READY,
            "True",
            "CredentialAssembled",
            "ok",
            Some(1),
            time(100),
        );
        set_condition(
            &mut status,
            conditions::CREDENTIALS_READY,
            "True",
            "CredentialAssembled",
            "ok again",
            Some(2),
            time(500),
        );
        assert_eq!(status.conditions[0].last_transition_time, time(100));
        assert_eq!(status.conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn conditions_of_different_types_coexist() {
        let mut status = SessionStatus::default();
        set_condition(
            &mut status,
            conditions::WORKSPACE_READY,
            "True",
            "VolumeProvisioned",
            "",
            None,
            time(1),
        );
        set_condition(
            &mut status,
            conditions::WORKLOAD_READY,
            "False",
            "WorkloadCreated",
            "",
            None,
            time(1),
        );
        assert_eq!(status.conditions.len(), 2);
    }
}
