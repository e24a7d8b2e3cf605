//! Per-request cluster clients bound to the caller's bearer credential.
//! There is deliberately no way to get a privileged client out of this
//! module; a request without a token gets an error, never a fallback.

use std::time::Duration;

use anyhow::{Context, Result};
use kube::{Client, Config, config::AuthInfo};

use crate::error::ApiError;

#[derive(Clone)]
pub struct ClientFactory {
    base: Config,
}

impl ClientFactory {
    /// Captures the cluster connection details (API server URL, CA
    /// bundle, default namespace) once at startup. The ambient identity
    /// of the pod is discarded; only the connection parameters survive.
    pub async fn infer() -> Result<Self> {
        let base = Config::infer()
            .await
            .context("failed to infer cluster configuration")?;
        Ok(Self::new(base))
    }

    pub fn new(mut base: Config) -> Self {
        base.auth_info = AuthInfo::default();
        Self { base }
    }

    /// Deadline applied to every call made through clients built here.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.base.connect_timeout = Some(timeout);
        self.base.read_timeout = Some(timeout);
        self.base.write_timeout = Some(timeout);
        self
    }

    /// Builds a client that authenticates as exactly the given bearer
    /// token. Typed, dynamic, and access-review calls all go through
    /// the one client.
    pub fn for_token(&self, token: &str) -> Result<Client, ApiError> {
        if token.is_empty() {
            return Err(ApiError::Unauthenticated(
                "missing bearer credential".to_string(),
            ));
        }
        let mut config = self.base.clone();
        config.auth_info = AuthInfo {
            token: Some(token.to_string().into()),
            ..AuthInfo::default()
        };
        Client::try_from(config)
            .map_err(|e| ApiError::Upstream(format!("failed to build cluster client: {e}")))
    }

    pub fn default_namespace(&self) -> &str {
        &self.base.default_namespace
    }
}
