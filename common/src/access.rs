//! Authorization gate backed by the cluster's self-subject access
//! review. The answer comes from the cluster, never from caller-supplied
//! claims; errors propagate as unavailable, never as allowed.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::{Api, Client, api::PostParams};
use tokio::sync::Mutex;

use crate::error::ApiError;

/// One RBAC question: may the caller perform `verb` on
/// `group/resource[/subresource]` in `namespace`?
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReviewTuple {
    pub namespace: Option<String>,
    pub group: String,
    pub resource: String,
    pub verb: String,
    pub subresource: Option<String>,
    pub name: Option<String>,
}

impl ReviewTuple {
    pub fn namespaced(namespace: &str, group: &str, resource: &str, verb: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            group: group.to_string(),
            resource: resource.to_string(),
            verb: verb.to_string(),
            subresource: None,
            name: None,
        }
    }

    pub fn cluster(group: &str, resource: &str, verb: &str) -> Self {
        Self {
            namespace: None,
            group: group.to_string(),
            resource: resource.to_string(),
            verb: verb.to_string(),
            subresource: None,
            name: None,
        }
    }

    pub fn with_subresource(mut self, subresource: &str) -> Self {
        self.subresource = Some(subresource.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

impl std::fmt::Display for ReviewTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}/{}{}{}",
            self.verb,
            if self.group.is_empty() { "core" } else { &self.group },
            self.resource,
            self.subresource
                .as_deref()
                .map(|s| format!("/{s}"))
                .unwrap_or_default(),
            self.namespace
                .as_deref()
                .map(|ns| format!(" in {ns}"))
                .unwrap_or_else(|| " at cluster scope".to_string()),
        )
    }
}

/// Short-lived cache of denials only. Allows are never cached: a grant
/// must be re-proven on every request.
pub(crate) struct DenyCache {
    entries: HashMap<(String, ReviewTuple), Instant>,
    ttl: Duration,
}

impl DenyCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    fn is_denied(&self, caller: &str, tuple: &ReviewTuple, now: Instant) -> bool {
        self.entries
            .get(&(caller.to_string(), tuple.clone()))
            .is_some_and(|at| now.duration_since(*at) < self.ttl)
    }

    fn insert(&mut self, caller: &str, tuple: &ReviewTuple, now: Instant) {
        // Expired entries pile up only under churn; sweep opportunistically.
        if self.entries.len() >= 4096 {
            let ttl = self.ttl;
            self.entries.retain(|_, at| now.duration_since(*at) < ttl);
        }
        self.entries.insert((caller.to_string(), tuple.clone()), now);
    }
}

#[derive(Clone)]
pub struct AccessGate {
    denied: Arc<Mutex<DenyCache>>,
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGate {
    pub const DENY_TTL: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            denied: Arc::new(Mutex::new(DenyCache::new(Self::DENY_TTL))),
        }
    }

    /// Asks the cluster whether the client's credential may perform the
    /// reviewed action. `caller` is an opaque hash keying the negative
    /// cache; it never reaches the cluster.
    pub async fn can(
        &self,
        client: &Client,
        caller: &str,
        tuple: &ReviewTuple,
    ) -> Result<bool, ApiError> {
        let now = Instant::now();
        {
            let cache = self.denied.lock().await;
            if cache.is_denied(caller, tuple, now) {
                return Ok(false);
            }
        }

        let review = SelfSubjectAccessReview {
            metadata: Default::default(),
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: tuple.namespace.clone(),
                    group: Some(tuple.group.clone()),
                    resource: Some(tuple.resource.clone()),
                    verb: Some(tuple.verb.clone()),
                    subresource: tuple.subresource.clone(),
                    name: tuple.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            status: None,
        };
        let api: Api<SelfSubjectAccessReview> = Api::all(client.clone());
        let created = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| ApiError::Upstream(format!("access review failed: {e}")))?;
        let allowed = created.status.map(|s| s.allowed).unwrap_or(false);

        if !allowed {
            let mut cache = self.denied.lock().await;
            cache.insert(caller, tuple, Instant::now());
        }
        Ok(allowed)
    }

    /// `can` that turns a denial into `403 Forbidden`.
    pub async fn ensure(
        &self,
        client: &Client,
        caller: &str,
        tuple: &ReviewTuple,
    ) -> Result<(), ApiError> {
        if self.can(client, caller, tuple).await? {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("not allowed to {tuple}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> ReviewTuple {
        ReviewTuple::namespaced("alpha", "ambient-code.io", "sessions", "list")
    }

    #[test]
    fn denials_expire_after_ttl() {
        let mut cache = DenyCache::new(Duration::from_secs(5));
        let t0 = Instant::now();
        cache.insert("caller", &tuple(), t0);
        assert!(cache.is_denied("caller", &tuple(), t0 + Duration::from_secs(4)));
        assert!(!cache.is_denied("caller", &tuple(), t0 + Duration::from_secs(6)));
    }

    #[test]
    fn denials_are_scoped_per_caller_and_tuple() {
        let mut cache = DenyCache::new(Duration::from_secs(5));
        let t0 = Instant::now();
        cache.insert("caller-a", &tuple(), t0);
        assert!(!cache.is_denied("caller-b", &tuple(), t0));
        let other = ReviewTuple::namespaced("beta", "ambient-code.io", "sessions", "list");
        assert!(!cache.is_denied("caller-a", &other, t0));
    }

    #[test]
    fn tuple_display_names_the_action() {
        let t = ReviewTuple::namespaced("alpha", "", "pods", "get").with_subresource("proxy");
        assert_eq!(t.to_string(), "get core/pods/proxy in alpha");
    }
}
