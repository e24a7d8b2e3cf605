use std::{net::IpAddr, str::FromStr};

use axum::http::HeaderMap;

pub mod access;
pub mod access_log;
pub mod args;
pub mod auth;
pub mod clients;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod pagination;
pub mod rate_limit;
pub mod scrub;
pub mod shutdown;

pub use error::{ApiError, ApiResult};

/// Annotations written on `Session` objects and their children.
pub mod annotations {
    pub const SPEC_HASH: &str = "ambient-code.io/spec-hash";
    pub const CREATED_BY: &str = "ambient-code.io/created-by";
    /// Bumped on resume so the desired-spec hash of the workload and the
    /// credential changes and both get rebuilt.
    pub const RESTART_EPOCH: &str = "ambient-code.io/restart-epoch";
    pub const STOP_REQUESTED: &str = "ambient-code.io/stop-requested";
    pub const RESUME_REQUESTED: &str = "ambient-code.io/resume-requested";
    pub const DISPLAY_NAME: &str = "ambient-code.io/display-name";
}

pub mod labels {
    /// Marks a namespace as an Ambient Code workspace.
    pub const WORKSPACE: &str = "ambient-code.io/workspace";
    pub const SESSION: &str = "ambient-code.io/session";
}

pub mod headers {
    /// Synonym for `Authorization: Bearer` set by auth proxies.
    pub const FORWARDED_ACCESS_TOKEN: &str = "x-forwarded-access-token";
    /// Project scoping header accepted by the public gateway.
    pub const PROJECT: &str = "x-ambient-project";
}

/// Runner contract constants the controller and the gateway agree on.
pub mod runner {
    /// Localhost port of the runner's HTTP side channel, reached only
    /// through the pod-proxy subresource.
    pub const SIDE_CHANNEL_PORT: u16 = 8787;
    /// Where the hydrate init step drops its structured report.
    pub const HYDRATE_REPORT_PATH: &str = "/workspace/.ambient/hydrate-report.json";
    pub const WORKSPACE_MOUNT: &str = "/workspace";
    pub const CREDENTIALS_MOUNT: &str = "/var/run/ambient/credentials";
    pub const SCRATCH_MOUNT: &str = "/tmp/agent-state";
    pub const UID: i64 = 1001;
}

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

/// Installs the tracing subscriber. JSON lines when `OTEL_ENABLED` (or
/// any non-interactive deployment) wants machine-readable logs.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Touches the readiness file probed by the deployment.
pub fn signal_ready() {
    if let Err(e) = std::fs::write("/etc/ready", "ready") {
        tracing::warn!(error = %e, "failed to write readiness file");
    }
}

pub fn get_source_ip(headers: &HeaderMap) -> Option<IpAddr> {
    // Prefer X-Forwarded-For (may contain multiple)
    if let Some(forwarded_for) = headers.get("x-forwarded-for")
        && let Ok(forwarded_for) = forwarded_for.to_str()
        && let Some(ip_str) = forwarded_for.split(',').next()
        && let Ok(ip) = IpAddr::from_str(ip_str.trim())
    {
        return Some(ip);
    }

    // Fallback to X-Real-IP
    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(ip_str) = real_ip.to_str()
        && let Ok(ip) = IpAddr::from_str(ip_str.trim())
    {
        return Some(ip);
    }

    None
}
