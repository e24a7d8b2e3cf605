//! Desired-child builders: the runner workload (the contract the runner
//! pod relies on) and the workspace volume claim. Everything here is a
//! pure function of the `Session` and its workspace settings, so the
//! same inputs always produce the same objects and the same drift hash.

use std::collections::BTreeMap;

use ambient_common::{annotations, labels, runner};
use ambient_types::{RepoRef, Session, WorkflowRef, WorkspaceSettingsSpec, defaults};
use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{
            Container, EmptyDirVolumeSource, EnvFromSource, EnvVar, ExecAction, Lifecycle,
            LifecycleHandler, PersistentVolumeClaim, PersistentVolumeClaimSpec,
            PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec, PodTemplateSpec,
            ResourceRequirements, SecretEnvSource, SecretVolumeSource, SecurityContext, Volume,
            VolumeMount, VolumeResourceRequirements,
        },
    },
    apimachinery::pkg::api::resource::Quantity,
};
use kube::api::{ObjectMeta, Resource};

use crate::util::{self, Error};

pub const DEFAULT_RUNNER_IMAGE: &str = "ghcr.io/ambient-code/runner:latest";

const WORKSPACE_VOLUME: &str = "workspace";
const CREDENTIALS_VOLUME: &str = "credentials";
const SCRATCH_VOLUME: &str = "scratch";

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

fn owner_ref(instance: &Session) -> Result<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference, Error> {
    instance
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("Session is missing identity for owner reference".to_string()))
}

/// The restart epoch folds the last honored resume into the pod
/// template, so a resumed session hashes differently and the old
/// workload gets replaced instead of reused.
pub fn restart_epoch(instance: &Session) -> String {
    instance
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::RESUME_REQUESTED))
        .cloned()
        .unwrap_or_else(|| "0".to_string())
}

pub fn runner_image(settings: &WorkspaceSettingsSpec) -> String {
    settings
        .runner_image
        .clone()
        .unwrap_or_else(|| DEFAULT_RUNNER_IMAGE.to_string())
}

/// Directory name a repo is cloned into, derived from the URL's last
/// path segment without the `.git` suffix.
pub fn derive_repo_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches(".git");
    let name: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if name.is_empty() { "repo".to_string() } else { name }
}

/// Shell script run by the hydrate init step. Clones every repo onto
/// the session feature branch, hydrates the workflow, fixes ownership
/// for the non-root runner, and leaves a structured report behind.
pub fn hydrate_script(session: &str, repos: &[RepoRef], workflow: Option<&WorkflowRef>) -> String {
    let branch = ambient_types::feature_branch(session);
    let mut script = String::from("set -e\n");
    script.push_str("mkdir -p /workspace/repos /workspace/workflows /workspace/artifacts /workspace/file-uploads /workspace/.ambient\n");
    script.push_str(&format!(
        "report={}\nprintf '{{\"repos\":[' > \"$report.tmp\"\n",
        runner::HYDRATE_REPORT_PATH
    ));
    for (i, repo) in repos.iter().enumerate() {
        let name = derive_repo_name(&repo.url);
        let dest = format!("/workspace/repos/{name}");
        let branch_flag = repo
            .branch
            .as_deref()
            .map(|b| format!("--branch '{b}' "))
            .unwrap_or_default();
        if i > 0 {
            script.push_str("printf ',' >> \"$report.tmp\"\n");
        }
        script.push_str(&format!(
            "if git clone --depth 1 {branch_flag}'{url}' '{dest}' && git -C '{dest}' checkout -b '{branch}'; then\n  printf '{{\"url\":\"{url}\",\"status\":\"Cloned\"}}' >> \"$report.tmp\"\nelse\n  printf '{{\"url\":\"{url}\",\"status\":\"Failed\"}}' >> \"$report.tmp\"\nfi\n",
            url = repo.url,
        ));
    }
    script.push_str("printf ']' >> \"$report.tmp\"\n");
    if let Some(workflow) = workflow {
        let name = derive_repo_name(&workflow.git_url);
        let branch_flag = workflow
            .branch
            .as_deref()
            .map(|b| format!("--branch '{b}' "))
            .unwrap_or_default();
        script.push_str(&format!(
            "if git clone --depth 1 {branch_flag}'{url}' '/workspace/workflows/{name}'; then\n  printf ',\"workflow\":\"Cloned\"' >> \"$report.tmp\"\nelse\n  printf ',\"workflow\":\"Failed\"' >> \"$report.tmp\"\nfi\n",
            url = workflow.git_url,
        ));
    }
    script.push_str("printf '}' >> \"$report.tmp\"\nmv \"$report.tmp\" \"$report\"\n");
    // Best-effort chown for the non-root runner; hosts that forbid
    // chown get widened permissions instead.
    script.push_str(&format!(
        "chown -R {uid}:{uid} /workspace 2>/dev/null || chmod -R a+rwX /workspace\n",
        uid = runner::UID
    ));
    script
}

/// Runner environment: workspace metadata first, user variables overlaid
/// on top, session identity last so it can never be shadowed.
pub fn build_env(session: &Session, settings: &WorkspaceSettingsSpec) -> Vec<EnvVar> {
    let name = session.meta().name.as_deref().unwrap_or_default();
    let namespace = session.meta().namespace.as_deref().unwrap_or_default();
    let spec = &session.spec;

    let mut env: BTreeMap<String, String> = BTreeMap::new();
    env.insert("AMBIENT_WORKSPACE".to_string(), namespace.to_string());
    env.insert(
        "AMBIENT_RUNNER_SECRET_REF".to_string(),
        settings.runner_secret_name.clone(),
    );

    for (key, value) in &spec.environment_variables {
        env.insert(key.clone(), value.clone());
    }

    env.insert("AMBIENT_SESSION_NAME".to_string(), name.to_string());
    env.insert(
        "AMBIENT_INITIAL_PROMPT".to_string(),
        spec.initial_prompt.clone(),
    );
    env.insert(
        "AMBIENT_INTERACTIVE".to_string(),
        spec.interactive.to_string(),
    );
    env.insert("AMBIENT_TIMEOUT_SECONDS".to_string(), spec.timeout.to_string());
    env.insert(
        "AMBIENT_LLM_MODEL".to_string(),
        spec.llm_settings.model.clone(),
    );
    env.insert(
        "AMBIENT_LLM_TEMPERATURE".to_string(),
        format!("{}", spec.llm_settings.temperature),
    );
    env.insert(
        "AMBIENT_LLM_MAX_TOKENS".to_string(),
        spec.llm_settings.max_tokens.to_string(),
    );
    env.insert(
        "AMBIENT_SIDE_CHANNEL_PORT".to_string(),
        runner::SIDE_CHANNEL_PORT.to_string(),
    );
    env.insert(
        "AMBIENT_CREDENTIALS_PATH".to_string(),
        runner::CREDENTIALS_MOUNT.to_string(),
    );

    env.into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            value_from: None,
        })
        .collect()
}

fn resource_requirements(session: &Session) -> Option<ResourceRequirements> {
    let overrides = session.spec.resource_overrides.as_ref()?;
    let mut requests = BTreeMap::new();
    if let Some(cpu) = &overrides.cpu {
        requests.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &overrides.memory {
        requests.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if requests.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        limits: Some(requests.clone()),
        requests: Some(requests),
        ..Default::default()
    })
}

/// The single-shot runner workload. Never updated in place: drift is
/// detected by comparing `hash_job` against the stored annotation and
/// resolved by delete + recreate.
pub fn build_job(session: &Session, settings: &WorkspaceSettingsSpec) -> Result<Job, Error> {
    let name = instance_name(session)?.to_string();
    let namespace = instance_namespace(session)?.to_string();
    let credential = ambient_types::credential_name(&name);
    let image = runner_image(settings);
    let epoch = restart_epoch(session);

    let workspace_mounts = vec![
        VolumeMount {
            name: WORKSPACE_VOLUME.to_string(),
            mount_path: runner::WORKSPACE_MOUNT.to_string(),
            ..Default::default()
        },
        // Workflows are hydrated by the init step and read-only to the
        // runner itself.
        VolumeMount {
            name: WORKSPACE_VOLUME.to_string(),
            mount_path: format!("{}/workflows", runner::WORKSPACE_MOUNT),
            sub_path: Some("workflows".to_string()),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: CREDENTIALS_VOLUME.to_string(),
            mount_path: runner::CREDENTIALS_MOUNT.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: SCRATCH_VOLUME.to_string(),
            mount_path: runner::SCRATCH_MOUNT.to_string(),
            ..Default::default()
        },
    ];

    let hydrate = Container {
        name: "hydrate".to_string(),
        image: Some(image.clone()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![hydrate_script(
            &name,
            &session.spec.repos,
            session.spec.active_workflow.as_ref(),
        )]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: credential.clone(),
                optional: Some(false),
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: WORKSPACE_VOLUME.to_string(),
            mount_path: runner::WORKSPACE_MOUNT.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let runner_container = Container {
        name: "runner".to_string(),
        image: Some(image),
        env: Some(build_env(session, settings)),
        volume_mounts: Some(workspace_mounts),
        resources: resource_requirements(session),
        security_context: Some(SecurityContext {
            run_as_user: Some(runner::UID),
            run_as_non_root: Some(true),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        // Token refresh needs writable credential files; the mounted
        // secret is read-only by contract.
        lifecycle: Some(Lifecycle {
            post_start: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        format!(
                            "cp -a {} {}/credentials && chmod -R u+rw {}/credentials",
                            runner::CREDENTIALS_MOUNT,
                            runner::SCRATCH_MOUNT,
                            runner::SCRATCH_MOUNT
                        ),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let template_annotations = BTreeMap::from([(
        annotations::RESTART_EPOCH.to_string(),
        epoch,
    )]);
    let labels = BTreeMap::from([
        ("app".to_string(), "ambient-runner".to_string()),
        (labels::SESSION.to_string(), name.clone()),
    ]);

    let job = Job {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            owner_references: Some(vec![owner_ref(session)?]),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                annotations::CREATED_BY.to_string(),
                util::MANAGER_NAME.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(2),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(template_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    init_containers: Some(vec![hydrate]),
                    containers: vec![runner_container],
                    priority_class_name: session
                        .spec
                        .resource_overrides
                        .as_ref()
                        .and_then(|o| o.priority_class_name.clone()),
                    security_context: Some(PodSecurityContext {
                        fs_group: Some(runner::UID),
                        ..Default::default()
                    }),
                    volumes: Some(vec![
                        Volume {
                            name: WORKSPACE_VOLUME.to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: ambient_types::volume_name(&name),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: CREDENTIALS_VOLUME.to_string(),
                            secret: Some(SecretVolumeSource {
                                secret_name: Some(credential),
                                default_mode: Some(0o400),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: SCRATCH_VOLUME.to_string(),
                            empty_dir: Some(EmptyDirVolumeSource {
                                medium: Some("Memory".to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };
    Ok(job)
}

/// Canonical drift hash over everything that defines the pod the
/// runner gets.
pub fn hash_job(job: &Job) -> String {
    util::hash_spec(&job.spec)
}

/// Workspace volume claim. Sized from overrides or workspace defaults;
/// deliberately excluded from the restart epoch so resumed interactive
/// sessions keep their state.
pub fn build_pvc(
    session: &Session,
    settings: &WorkspaceSettingsSpec,
) -> Result<PersistentVolumeClaim, Error> {
    let name = instance_name(session)?.to_string();
    let namespace = instance_namespace(session)?.to_string();
    let (size, storage_class_name) =
        defaults::resolve_storage(session.spec.resource_overrides.as_ref(), settings);
    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(ambient_types::volume_name(&name)),
            namespace: Some(namespace),
            owner_references: Some(vec![owner_ref(session)?]),
            labels: Some(BTreeMap::from([(
                labels::SESSION.to_string(),
                name.clone(),
            )])),
            annotations: Some(BTreeMap::from([(
                annotations::CREATED_BY.to_string(),
                util::MANAGER_NAME.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name,
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambient_types::{LlmSettings, ResourceOverrides, SessionSpec, StorageDefaults};
    use kube::api::ObjectMeta;

    fn session() -> Session {
        let mut session = Session::new(
            "fix-ci",
            SessionSpec {
                initial_prompt: "fix the flaky test".to_string(),
                display_name: "Fix CI".to_string(),
                interactive: false,
                timeout: 3600,
                llm_settings: LlmSettings::default(),
                repos: vec![
                    RepoRef {
                        url: "https://example.com/org/widget.git".to_string(),
                        branch: Some("main".to_string()),
                    },
                    RepoRef {
                        url: "git+ssh://git@example.com/org/gadget".to_string(),
                        branch: None,
                    },
                ],
                environment_variables: BTreeMap::from([(
                    "CI_PROVIDER".to_string(),
                    "tekton".to_string(),
                )]),
                resource_overrides: None,
                user_context: None,
                active_workflow: None,
            },
        );
        session.metadata = ObjectMeta {
            name: Some("fix-ci".to_string()),
            namespace: Some("alpha".to_string()),
            uid: Some("0000-1111".to_string()),
            ..Default::default()
        };
        session
    }

    fn settings() -> WorkspaceSettingsSpec {
        WorkspaceSettingsSpec::default()
    }

    #[test]
    fn same_input_same_hash() {
        let a = build_job(&session(), &settings()).unwrap();
        let b = build_job(&session(), &settings()).unwrap();
        assert_eq!(hash_job(&a), hash_job(&b));
    }

    #[test]
    fn spec_change_changes_hash() {
        let base = build_job(&session(), &settings()).unwrap();
        let mut edited = session();
        edited.spec.initial_prompt = "do something else".to_string();
        let changed = build_job(&edited, &settings()).unwrap();
        assert_ne!(hash_job(&base), hash_job(&changed));
    }

    #[test]
    fn resume_epoch_changes_hash_but_not_volume() {
        let base = session();
        let mut resumed = session();
        resumed.metadata.annotations = Some(BTreeMap::from([(
            ambient_common::annotations::RESUME_REQUESTED.to_string(),
            "2026-02-01T00:00:00Z".to_string(),
        )]));
        assert_ne!(
            hash_job(&build_job(&base, &settings()).unwrap()),
            hash_job(&build_job(&resumed, &settings()).unwrap())
        );
        assert_eq!(
            build_pvc(&base, &settings()).unwrap(),
            build_pvc(&resumed, &settings()).unwrap()
        );
    }

    #[test]
    fn job_is_single_shot_and_owner_linked() {
        let job = build_job(&session(), &settings()).unwrap();
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(2));
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let owners = job.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Session");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn runner_mounts_follow_the_contract() {
        let job = build_job(&session(), &settings()).unwrap();
        let pod = job.spec.unwrap().template.spec.unwrap();
        let runner_container = &pod.containers[0];
        let mounts = runner_container.volume_mounts.as_ref().unwrap();
        let by_path: BTreeMap<_, _> = mounts
            .iter()
            .map(|m| (m.mount_path.as_str(), m.read_only.unwrap_or(false)))
            .collect();
        assert_eq!(by_path["/workspace"], false);
        assert_eq!(by_path["/workspace/workflows"], true);
        assert_eq!(by_path["/var/run/ambient/credentials"], true);
        assert_eq!(by_path["/tmp/agent-state"], false);

        let volumes = pod.volumes.unwrap();
        let secret = volumes
            .iter()
            .find_map(|v| v.secret.as_ref())
            .expect("credential volume");
        assert_eq!(secret.secret_name.as_deref(), Some("session-fix-ci"));
        assert_eq!(secret.default_mode, Some(0o400));
    }

    #[test]
    fn user_env_cannot_shadow_session_identity() {
        let mut s = session();
        s.spec
            .environment_variables
            .insert("AMBIENT_SESSION_NAME".to_string(), "spoofed".to_string());
        let env = build_env(&s, &settings());
        let name = env
            .iter()
            .find(|e| e.name == "AMBIENT_SESSION_NAME")
            .and_then(|e| e.value.as_deref());
        assert_eq!(name, Some("fix-ci"));
        // The user's own variable still rides along.
        assert!(env.iter().any(|e| e.name == "CI_PROVIDER"));
    }

    #[test]
    fn hydrate_clones_on_the_feature_branch() {
        let script = hydrate_script("fix-ci", &session().spec.repos, None);
        assert!(script.contains("git clone --depth 1 --branch 'main' 'https://example.com/org/widget.git' '/workspace/repos/widget'"));
        assert!(script.contains("'/workspace/repos/gadget'"));
        assert!(script.contains("checkout -b 'ambient/fix-ci'"));
        assert!(script.contains("/workspace/.ambient/hydrate-report.json"));
        assert!(script.contains("chown -R 1001:1001 /workspace"));
    }

    #[test]
    fn repo_names_derive_from_url() {
        assert_eq!(derive_repo_name("https://example.com/o/widget.git"), "widget");
        assert_eq!(derive_repo_name("git+ssh://git@example.com/o/gadget"), "gadget");
        assert_eq!(derive_repo_name("https://example.com/o/r.git/"), "r");
        assert_eq!(derive_repo_name("https://example.com/"), "example.com");
    }

    #[test]
    fn overrides_flow_into_resources_and_pvc() {
        let mut s = session();
        s.spec.resource_overrides = Some(ResourceOverrides {
            cpu: Some("2".to_string()),
            memory: Some("4Gi".to_string()),
            storage: Some("50Gi".to_string()),
            storage_class_name: Some("fast".to_string()),
            priority_class_name: Some("batch-low".to_string()),
        });
        let job = build_job(&s, &settings()).unwrap();
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.priority_class_name.as_deref(), Some("batch-low"));
        let resources = pod.containers[0].resources.as_ref().unwrap();
        assert_eq!(
            resources.requests.as_ref().unwrap()["cpu"],
            Quantity("2".to_string())
        );

        let pvc = build_pvc(&s, &settings()).unwrap();
        let pvc_spec = pvc.spec.unwrap();
        assert_eq!(pvc_spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(
            pvc_spec.resources.unwrap().requests.unwrap()["storage"],
            Quantity("50Gi".to_string())
        );
    }

    #[test]
    fn pvc_defaults_come_from_workspace_settings() {
        let mut ws = settings();
        ws.default_storage = StorageDefaults {
            size: "25Gi".to_string(),
            storage_class_name: Some("standard".to_string()),
        };
        let pvc = build_pvc(&session(), &ws).unwrap();
        assert_eq!(pvc.metadata.name.as_deref(), Some("ws-fix-ci"));
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap()["storage"],
            Quantity("25Gi".to_string())
        );
    }
}
