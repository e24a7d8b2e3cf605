use clap::{Parser, Subcommand};

use ambient_common::args::{CorsArgs, HttpArgs, OtelArgs, RateLimiterArgs};

#[derive(Parser, Debug)]
#[command(name = "ambient-gateway")]
#[command(about = "REST gateway for Ambient Code workspaces and sessions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway server
    Server(ServerArgs),

    /// Session operations against a running gateway
    Session(SessionCommandArgs),

    /// Check service health
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct SessionCommandArgs {
    #[command(subcommand)]
    pub command: SessionCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommands {
    /// List sessions in a workspace
    List(ListSessionArgs),
    /// Get a session by name
    Get(GetSessionArgs),
    /// Create a new session
    Create(CreateSessionArgs),
    /// Request a stop of a running session
    Stop(SessionRefArgs),
    /// Resume a stopped session
    Resume(SessionRefArgs),
    /// Delete a session and its children
    Delete(SessionRefArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct CommonClientArgs {
    /// Gateway endpoint
    #[arg(long, env = "AMBIENT_ENDPOINT", default_value = "http://localhost:8080")]
    pub endpoint: String,

    /// Bearer token used for every call
    #[arg(long, env = "AMBIENT_TOKEN")]
    pub token: String,

    /// Workspace (namespace) holding the sessions
    #[arg(long, env = "AMBIENT_WORKSPACE")]
    pub workspace: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ListSessionArgs {
    #[clap(flatten)]
    pub common: CommonClientArgs,

    /// Offset for pagination
    #[arg(long, default_value_t = 0)]
    pub offset: i64,

    /// Maximum number of sessions to return
    #[arg(long, default_value_t = 20)]
    pub limit: i64,

    /// Substring filter on name and display name
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct GetSessionArgs {
    #[clap(flatten)]
    pub common: CommonClientArgs,

    /// Session name
    #[arg(long)]
    pub name: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SessionRefArgs {
    #[clap(flatten)]
    pub common: CommonClientArgs,

    /// Session name
    #[arg(long)]
    pub name: String,
}

#[derive(Parser, Debug, Clone)]
pub struct CreateSessionArgs {
    #[clap(flatten)]
    pub common: CommonClientArgs,

    /// Session name (generated when omitted)
    #[arg(long)]
    pub name: Option<String>,

    /// Human-readable display name
    #[arg(long)]
    pub display_name: Option<String>,

    /// Prompt the runner starts from
    #[arg(long)]
    pub prompt: Option<String>,

    /// Keep the runner alive for follow-up input
    #[arg(long, default_value_t = false)]
    pub interactive: bool,

    /// Hard runtime bound in seconds (workspace default when omitted)
    #[arg(long)]
    pub timeout: Option<i64>,

    /// Model override (workspace default when omitted)
    #[arg(long)]
    pub model: Option<String>,

    /// Repository URL to hydrate (repeatable)
    #[arg(long)]
    pub repo: Vec<String>,

    /// Runner environment variable KEY=VALUE (repeatable)
    #[arg(long)]
    pub env: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    /// Gateway endpoint
    #[arg(long, env = "AMBIENT_ENDPOINT", default_value = "http://localhost:8080")]
    pub endpoint: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    #[clap(flatten)]
    pub http: HttpArgs,

    /// Deadline for workspace file proxy requests, which hold a
    /// connection to the runner side channel (Go-style duration)
    #[arg(long, env = "PROXY_TIMEOUT", default_value = "120s")]
    pub proxy_timeout: String,

    #[clap(flatten)]
    pub rate: RateLimiterArgs,

    #[clap(flatten)]
    pub cors: CorsArgs,

    #[clap(flatten)]
    pub otel: OtelArgs,
}

impl ServerArgs {
    pub fn proxy_timeout(&self) -> anyhow::Result<std::time::Duration> {
        use anyhow::Context;
        parse_duration::parse(&self.proxy_timeout)
            .with_context(|| format!("invalid PROXY_TIMEOUT: {:?}", self.proxy_timeout))
    }
}
