//! Per-session credential assembly. The controller reads the
//! workspace-level secrets and cuts a session-scoped bundle: the LLM
//! key, git tokens for the hydrate step, and whatever integration
//! tokens the workspace carries. The bundle is owner-linked to the
//! session and rotated whenever its inputs or the restart epoch change.

use std::collections::BTreeMap;

use ambient_common::{annotations, labels};
use ambient_types::Session;
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::api::{ObjectMeta, Resource};

use crate::util::{self, Error};

/// Keys lifted from the workspace runner secret. Git tokens use a
/// `GIT_TOKEN` prefix so per-provider variants (`GIT_TOKEN_GITHUB`,
/// `GIT_TOKEN_GITLAB`) travel too.
const RUNNER_KEY_PREFIXES: &[&str] = &["ANTHROPIC_API_KEY", "GIT_TOKEN", "SSH_"];

fn wanted_runner_key(key: &str) -> bool {
    RUNNER_KEY_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Merges workspace secret material into the per-session bundle.
/// Integration tokens are taken wholesale; the runner secret is
/// filtered to the keys the runner actually consumes.
pub fn assemble_data(
    runner_secret: Option<&Secret>,
    integration_secret: Option<&Secret>,
) -> BTreeMap<String, ByteString> {
    let mut data = BTreeMap::new();
    if let Some(secret) = integration_secret
        && let Some(entries) = &secret.data
    {
        for (key, value) in entries {
            data.insert(key.clone(), value.clone());
        }
    }
    if let Some(secret) = runner_secret
        && let Some(entries) = &secret.data
    {
        for (key, value) in entries {
            if wanted_runner_key(key) {
                data.insert(key.clone(), value.clone());
            }
        }
    }
    data
}

/// Hash covering the bundle contents and the restart epoch; stored as
/// an annotation so drift (rotated workspace secrets, resume) replaces
/// the credential without ever comparing values field by field.
pub fn hash_credential(data: &BTreeMap<String, ByteString>, epoch: &str) -> String {
    util::hash_spec(&(data, epoch))
}

pub fn build_credential(
    session: &Session,
    runner_secret: Option<&Secret>,
    integration_secret: Option<&Secret>,
) -> Result<Secret, Error> {
    let name = session
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("Session is missing metadata.name".to_string()))?;
    let namespace = session
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("Session is missing metadata.namespace".to_string()))?;
    let owner = session
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("Session is missing identity for owner reference".to_string()))?;

    let data = assemble_data(runner_secret, integration_secret);
    let epoch = super::workload::restart_epoch(session);
    let hash = hash_credential(&data, &epoch);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(ambient_types::credential_name(name)),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner]),
            labels: Some(BTreeMap::from([(
                labels::SESSION.to_string(),
                name.to_string(),
            )])),
            annotations: Some(BTreeMap::from([
                (annotations::SPEC_HASH.to_string(), hash),
                (
                    annotations::CREATED_BY.to_string(),
                    util::MANAGER_NAME.to_string(),
                ),
            ])),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}
