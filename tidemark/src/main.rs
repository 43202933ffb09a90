// tidemark/src/main.rs

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

mod cli;
mod commands;
mod server;
mod slack_signature;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Setup Logging (Tracing)
    // RUST_LOG=debug tidemark sync ... pour voir le SQL envoyé aux warehouses
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project_dir = cli.project_dir;

    match cli.command {
        Commands::Sync {
            selectors,
            output_dir,
            no_templates,
        } => commands::sync::execute(project_dir, selectors, output_dir, no_templates).await,

        Commands::Query { sql, connection } => {
            commands::query::execute(project_dir, sql, connection).await
        }

        Commands::Serve { connection, port } => {
            commands::serve::execute(project_dir, connection, port).await
        }
    }
}
