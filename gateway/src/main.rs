use anyhow::Result;
use clap::Parser;

mod args;
mod cli;
mod client;
mod handlers;
mod models;
mod server;

use args::{Cli, Commands, SessionCommands};
use server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    ambient_common::init();

    let parsed = Cli::parse();

    match parsed.command {
        Commands::Server(args) => {
            ambient_common::init_tracing(args.otel.otel_enabled);
            run_server(args).await
        }
        Commands::Session(args) => match args.command {
            SessionCommands::List(args) => cli::run_list_sessions(args).await,
            SessionCommands::Get(args) => cli::run_get_session(args).await,
            SessionCommands::Create(args) => cli::run_create_session(args).await,
            SessionCommands::Stop(args) => cli::run_stop_session(args).await,
            SessionCommands::Resume(args) => cli::run_resume_session(args).await,
            SessionCommands::Delete(args) => cli::run_delete_session(args).await,
        },
        Commands::Health(args) => cli::run_health(args).await,
    }
}
