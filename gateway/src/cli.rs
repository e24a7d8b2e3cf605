//! Operational CLI against a running gateway. Auth and endpoint come
//! from flags or the `AMBIENT_ENDPOINT` / `AMBIENT_TOKEN` environment.

use anyhow::{Context, Result};

use crate::{
    args::{
        CreateSessionArgs, GetSessionArgs, HealthArgs, ListSessionArgs, SessionRefArgs,
    },
    client::GatewayClient,
    models::CreateSessionRequest,
};
use ambient_types::{LlmSettings, RepoRef};

/// Parses a `KEY=VALUE` pair from `--env`.
pub fn parse_env_pair(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("invalid --env {raw:?}: expected KEY=VALUE"))?;
    Ok((key.to_string(), value.to_string()))
}

/// Run the list sessions CLI command.
pub async fn run_list_sessions(args: ListSessionArgs) -> Result<()> {
    let client = GatewayClient::new(&args.common.endpoint, &args.common.token);
    let page = client
        .list_sessions(
            &args.common.workspace,
            args.offset,
            args.limit,
            args.search.as_deref(),
        )
        .await?;

    println!(
        "Sessions (offset: {}, limit: {}, total: {}, more: {}):",
        page.offset, page.limit, page.total_count, page.has_more
    );
    if page.items.is_empty() {
        println!("  (no sessions)");
    } else {
        for session in &page.items {
            println!(
                "  {}  {}  {}  {}",
                session.name, session.phase, session.model, session.display_name
            );
        }
    }
    Ok(())
}

/// Run the get session CLI command.
pub async fn run_get_session(args: GetSessionArgs) -> Result<()> {
    let client = GatewayClient::new(&args.common.endpoint, &args.common.token);
    match client
        .get_session(&args.common.workspace, &args.name)
        .await?
    {
        Some(session) => {
            let status = session.status.clone().unwrap_or_default();
            println!("Session:");
            println!("  Name:    {}", session.metadata.name.as_deref().unwrap_or(""));
            println!("  Phase:   {}", status.phase);
            println!("  Model:   {}", session.spec.llm_settings.model);
            println!("  Timeout: {}s", session.spec.timeout);
            if let Some(message) = &status.message {
                println!("  Message: {message}");
            }
            for repo in &status.reconciled_repos {
                println!("  Repo:    {} ({:?})", repo.url, repo.status);
            }
        }
        None => println!("Session {} not found", args.name),
    }
    Ok(())
}

/// Run the create session CLI command.
pub async fn run_create_session(args: CreateSessionArgs) -> Result<()> {
    let client = GatewayClient::new(&args.common.endpoint, &args.common.token);

    let environment_variables = args
        .env
        .iter()
        .map(|pair| parse_env_pair(pair))
        .collect::<Result<_>>()?;
    let request = CreateSessionRequest {
        name: args.name,
        display_name: args.display_name.unwrap_or_default(),
        initial_prompt: args.prompt.unwrap_or_default(),
        interactive: args.interactive,
        timeout: args.timeout,
        llm_settings: args.model.map(|model| LlmSettings {
            model,
            ..Default::default()
        }),
        repos: args
            .repo
            .into_iter()
            .map(|url| RepoRef { url, branch: None })
            .collect(),
        environment_variables,
        resource_overrides: None,
        active_workflow: None,
    };

    let created = client
        .create_session(&args.common.workspace, &request)
        .await?;
    println!("Created session {} (uid {})", created.name, created.uid);
    Ok(())
}

/// Run the stop session CLI command.
pub async fn run_stop_session(args: SessionRefArgs) -> Result<()> {
    let client = GatewayClient::new(&args.common.endpoint, &args.common.token);
    let response = client
        .stop_session(&args.common.workspace, &args.name)
        .await?;
    println!("Requested stop of {} (was {})", response.name, response.phase);
    Ok(())
}

/// Run the resume session CLI command.
pub async fn run_resume_session(args: SessionRefArgs) -> Result<()> {
    let client = GatewayClient::new(&args.common.endpoint, &args.common.token);
    let response = client
        .resume_session(&args.common.workspace, &args.name)
        .await?;
    println!(
        "Requested resume of {} (was {})",
        response.name, response.phase
    );
    Ok(())
}

/// Run the delete session CLI command.
pub async fn run_delete_session(args: SessionRefArgs) -> Result<()> {
    let client = GatewayClient::new(&args.common.endpoint, &args.common.token);
    if client
        .delete_session(&args.common.workspace, &args.name)
        .await?
    {
        println!("Deleted session {}", args.name);
    } else {
        println!("Session {} not found", args.name);
    }
    Ok(())
}

/// Run the health check CLI command.
pub async fn run_health(args: HealthArgs) -> Result<()> {
    let client = GatewayClient::new(&args.endpoint, "");
    client.health().await?;
    println!("OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_pairs_split_on_first_equals() {
        assert_eq!(
            parse_env_pair("CI_PROVIDER=tekton").unwrap(),
            ("CI_PROVIDER".to_string(), "tekton".to_string())
        );
        assert_eq!(
            parse_env_pair("QUERY=a=b").unwrap(),
            ("QUERY".to_string(), "a=b".to_string())
        );
        assert!(parse_env_pair("NO_VALUE").is_err());
    }
}
