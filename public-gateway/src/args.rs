use anyhow::Context;
use clap::Parser;

use ambient_common::args::{CorsArgs, HttpArgs, OtelArgs, RateLimiterArgs};

#[derive(Parser, Debug, Clone)]
#[command(name = "ambient-public-gateway")]
#[command(about = "Simplified public API in front of the Ambient Code gateway")]
pub struct Cli {
    #[clap(flatten)]
    pub http: HttpArgs,

    /// Base URL of the internal gateway
    #[arg(long, env = "BACKEND_URL", required = true)]
    pub backend_url: String,

    /// Deadline for backend calls (Go-style duration)
    #[arg(long, env = "BACKEND_TIMEOUT", default_value = "30s")]
    pub backend_timeout: String,

    #[clap(flatten)]
    pub rate: RateLimiterArgs,

    #[clap(flatten)]
    pub cors: CorsArgs,

    #[clap(flatten)]
    pub otel: OtelArgs,
}

impl Cli {
    pub fn backend_timeout(&self) -> anyhow::Result<std::time::Duration> {
        parse_duration::parse(&self.backend_timeout)
            .with_context(|| format!("invalid BACKEND_TIMEOUT: {:?}", self.backend_timeout))
    }
}
