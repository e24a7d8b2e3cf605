use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct HttpArgs {
    /// Port the API server listens on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Per-request deadline, inherited by upstream cluster calls
    /// (Go-style duration, e.g. "30s" or "2m")
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30s")]
    pub request_timeout: String,
}

impl HttpArgs {
    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration::parse(&self.request_timeout)
            .with_context(|| format!("invalid REQUEST_TIMEOUT: {:?}", self.request_timeout))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct RateLimiterArgs {
    /// Sustained requests per second allowed per caller
    #[arg(long, env = "RATE_LIMIT_RPS", default_value_t = 100.0)]
    pub rate_limit_rps: f64,

    /// Burst capacity above the sustained rate
    #[arg(long, env = "RATE_LIMIT_BURST", default_value_t = 200.0)]
    pub rate_limit_burst: f64,
}

#[derive(Parser, Debug, Clone)]
pub struct CorsArgs {
    /// Comma-separated origin allow-list; empty means mirror (dev only)
    #[arg(long, env = "CORS_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct OtelArgs {
    /// Emit machine-readable logs and per-request/reconcile spans
    #[arg(long, env = "OTEL_ENABLED", default_value_t = false)]
    pub otel_enabled: bool,

    /// OTLP collector endpoint, picked up by the deployment's exporter
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[clap(flatten)]
        http: HttpArgs,
    }

    #[test]
    fn parses_go_style_durations() {
        let cli = TestCli::parse_from(["test", "--request-timeout", "2m"]);
        assert_eq!(cli.http.request_timeout().unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn rejects_malformed_timeout() {
        let cli = TestCli::parse_from(["test", "--request-timeout", "soon"]);
        assert!(cli.http.request_timeout().is_err());
    }
}
