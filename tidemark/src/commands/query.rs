// tidemark/src/commands/query.rs
//
// USE CASE: Execute a raw SQL query (ad-hoc) through the Query Service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde_json::Value;
use tidemark_core::application::QueryRegistry;
use tidemark_core::infrastructure::adapters::BackendConnectorFactory;
use tidemark_core::infrastructure::config::load_project_config;
use tidemark_core::ports::QueryResult;

pub async fn execute(
    project_dir: PathBuf,
    sql: String,
    connection: Option<String>,
) -> anyhow::Result<()> {
    let config = load_project_config(&project_dir).with_context(|| {
        format!(
            "Failed to load project configuration from {:?}",
            project_dir
        )
    })?;

    let factory = Arc::new(BackendConnectorFactory::new(&project_dir));
    let registry = QueryRegistry::new(config, factory, None);

    match registry.execute(&sql, connection.as_deref(), None).await {
        Ok(result) => {
            println!("{}", result_table(&result, usize::MAX));
            println!("✅ {} row(s)", result.row_count);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Query failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// At most `limit` rows; NULLs are spelled out, strings unquoted.
pub(crate) fn result_table(result: &QueryResult, limit: usize) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(result.columns.clone());

    for row in result.rows.iter().take(limit) {
        table.add_row(result.columns.iter().map(|col| match row.get(col) {
            None | Some(Value::Null) => "NULL".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }));
    }
    table
}
