//! Status writes. The controller owns exactly one thing on a session,
//! its status subresource; spec and metadata belong to the user and the
//! gateway. Writes are expressed as a JSON-Patch diff between the
//! object that was read and the mutated copy, so only the fields the
//! mutation touched (plus the `lastUpdated` stamp) travel to the store.

use ambient_types::{Session, SessionStatus};
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
use kube::{
    Api, Client,
    api::{Patch, PatchParams},
};

use crate::util::{Error, MANAGER_NAME};

const STATUS_RETRY_BUDGET: usize = 3;

fn identity(session: &Session) -> Result<(String, String), Error> {
    let name = session
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("Session is missing metadata.name".to_string()))?;
    let namespace = session
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| Error::UserInput("Session is missing metadata.namespace".to_string()))?;
    Ok((namespace, name))
}

/// Single status write: run `mutate` against a copy of the status (an
/// absent status starts from its defaults), stamp `lastUpdated`, and
/// send the resulting diff through the status subresource.
pub async fn patch_status(
    client: Client,
    session: &Session,
    mutate: impl FnOnce(&mut SessionStatus),
) -> Result<Session, Error> {
    let (namespace, name) = identity(session)?;

    let mut updated = session.clone();
    let status = updated.status.get_or_insert_with(SessionStatus::default);
    mutate(status);
    status.last_updated = Some(Time::from(Timestamp::now()));

    let diff = json_patch::diff(
        &serde_json::to_value(session)?,
        &serde_json::to_value(&updated)?,
    );
    let api: Api<Session> = Api::namespaced(client, &namespace);
    Ok(api
        .patch_status(&name, &PatchParams::apply(MANAGER_NAME), &Patch::Json::<Session>(diff))
        .await?)
}

/// A 409 here means someone else wrote status between our read and our
/// write, usually the runner reporting repo progress under its own
/// credential. Re-read and replay the mutation against the fresh
/// object, a bounded number of times.
pub async fn patch_status_with_retry(
    client: Client,
    session: &Session,
    mutate: impl Fn(&mut SessionStatus) + Clone,
) -> Result<Session, Error> {
    let (namespace, name) = identity(session)?;

    let mut current = session.clone();
    for attempt in 0..STATUS_RETRY_BUDGET {
        match patch_status(client.clone(), &current, mutate.clone()).await {
            Ok(written) => return Ok(written),
            Err(Error::Kube {
                source: kube::Error::Api(ae),
            }) if ae.code == 409 && attempt + 1 < STATUS_RETRY_BUDGET => {
                let api: Api<Session> = Api::namespaced(client.clone(), &namespace);
                current = api.get(&name).await?;
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::StatusConflict(format!("{namespace}/{name}")))
}
