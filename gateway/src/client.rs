use anyhow::{Context, Result, bail};
use reqwest::Client;

use ambient_common::pagination::Page;
use ambient_types::Session;

use crate::models::{CreateSessionRequest, LifecycleResponse, SessionCreated, SessionSummary};

/// Client for the gateway HTTP API. Used by the CLI subcommands and by
/// operational tooling; every call carries the caller's bearer token.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Check if the service is healthy.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to send health request")?;

        if resp.status().is_success() {
            Ok(())
        } else {
            bail!("health check failed with status: {}", resp.status())
        }
    }

    pub async fn list_sessions(
        &self,
        workspace: &str,
        offset: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<Page<SessionSummary>> {
        let mut url = format!(
            "{}/api/workspaces/{workspace}/sessions?offset={offset}&limit={limit}",
            self.base_url
        );
        if let Some(search) = search {
            url.push_str(&format!("&search={search}"));
        }
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to send list sessions request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("list sessions failed with status {}: {}", status, body);
        }
        resp.json().await.context("invalid list sessions response")
    }

    pub async fn get_session(&self, workspace: &str, name: &str) -> Result<Option<Session>> {
        let url = format!(
            "{}/api/workspaces/{workspace}/sessions/{name}",
            self.base_url
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to send get session request")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("get session failed with status {}: {}", status, body);
        }
        Ok(Some(resp.json().await.context("invalid session response")?))
    }

    pub async fn create_session(
        &self,
        workspace: &str,
        request: &CreateSessionRequest,
    ) -> Result<SessionCreated> {
        let url = format!("{}/api/workspaces/{workspace}/sessions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .context("failed to send create session request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("create session failed with status {}: {}", status, body);
        }
        resp.json().await.context("invalid create session response")
    }

    async fn lifecycle(
        &self,
        workspace: &str,
        name: &str,
        verb: &str,
    ) -> Result<LifecycleResponse> {
        let url = format!(
            "{}/api/workspaces/{workspace}/sessions/{name}/{verb}",
            self.base_url
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("failed to send {verb} request"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("{} failed with status {}: {}", verb, status, body);
        }
        resp.json()
            .await
            .with_context(|| format!("invalid {verb} response"))
    }

    pub async fn stop_session(&self, workspace: &str, name: &str) -> Result<LifecycleResponse> {
        self.lifecycle(workspace, name, "stop").await
    }

    pub async fn resume_session(&self, workspace: &str, name: &str) -> Result<LifecycleResponse> {
        self.lifecycle(workspace, name, "resume").await
    }

    /// Returns false when the session did not exist.
    pub async fn delete_session(&self, workspace: &str, name: &str) -> Result<bool> {
        let url = format!(
            "{}/api/workspaces/{workspace}/sessions/{name}",
            self.base_url
        );
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to send delete session request")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("delete session failed with status {}: {}", status, body);
        }
        Ok(true)
    }
}
