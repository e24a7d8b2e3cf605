use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;

mod args;
mod sessions;
mod util;

use args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    ambient_common::init();

    let cli = Cli::parse();
    ambient_common::init_tracing(cli.otel.otel_enabled);

    // The controller runs under its own service identity; the gateway's
    // per-caller credential rules apply to the HTTP surface, not here.
    let client = Client::try_default()
        .await
        .context("failed to build cluster client")?;

    let cancel = CancellationToken::new();
    #[cfg(feature = "metrics")]
    tokio::spawn(util::metrics::run_metrics_server(
        cli.metrics_port,
        cancel.clone(),
    ));

    let result = sessions::reconcile::run(client).await;
    cancel.cancel();
    result.context("session controller failed")
}
