use anyhow::Result;
use clap::Parser;

mod app;
mod args;
mod models;
mod server;

use app::App;
use args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    ambient_common::init();

    let cli = Cli::parse();
    ambient_common::init_tracing(cli.otel.otel_enabled);

    let app = App::new(cli.backend_url.clone(), cli.backend_timeout()?)?;
    server::run_server(cli, app).await
}
