// tidemark/src/commands/serve.rs
//
// USE CASE: Expose the Query Service over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tidemark_core::application::QueryRegistry;
use tidemark_core::infrastructure::adapters::BackendConnectorFactory;
use tidemark_core::infrastructure::config::load_project_config;
use tokio::net::TcpListener;
use tracing::info;

use crate::server::{AppState, create_router};

pub async fn execute(
    project_dir: PathBuf,
    connection: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let config = load_project_config(&project_dir).with_context(|| {
        format!(
            "Failed to load project configuration from {:?}",
            project_dir
        )
    })?;

    let port = port.unwrap_or(config.server.port);
    let connection = connection.or_else(|| config.server.connection.clone());
    // Fail fast on a bad connection name rather than on the first request
    let default = config.query_database(connection.as_deref())?.name.clone();
    let slack = config.slack.clone();

    let factory = Arc::new(BackendConnectorFactory::new(&project_dir));
    let registry = QueryRegistry::new(config, factory, Some(default.clone()));
    let router = create_router(Arc::new(AppState::new(registry, slack)));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🌐 Query Service listening on http://{addr} (connection: {default})");
    info!("   POST /execute_sql       - Run SQL");
    info!("   POST /slack/command     - Slack slash command");
    info!("   POST /slack/app_mention - Slack mention events");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    axum::serve(listener, router).await?;
    Ok(())
}
