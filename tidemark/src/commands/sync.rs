// tidemark/src/commands/sync.rs
//
// USE CASE: Sync warehouse metadata to markdown, then render project templates.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use tidemark_core::application::{
    render_user_templates, select_databases, sync_databases, template_context,
};
use tidemark_core::domain::format::thousands;
use tidemark_core::domain::sync::{DatabaseSyncOutcome, SyncStatus, SyncSummary};
use tidemark_core::infrastructure::adapters::BackendConnectorFactory;
use tidemark_core::infrastructure::config::load_project_config;
use tidemark_core::infrastructure::templating::JinjaRenderer;

pub async fn execute(
    project_dir: PathBuf,
    selectors: Vec<String>,
    output_dir: Option<PathBuf>,
    no_templates: bool,
) -> anyhow::Result<()> {
    let start = Instant::now();

    // A. Load the Config (Infra)
    println!("⚙️  Loading configuration...");
    let config = load_project_config(&project_dir).with_context(|| {
        format!(
            "Failed to load project configuration from {:?}",
            project_dir
        )
    })?;
    println!("   Project: {}", config.project_name);

    let databases = select_databases(&config, &selectors)?;
    // Relative paths, flag or config, are anchored at the project root
    let output_base =
        project_dir.join(output_dir.unwrap_or_else(|| PathBuf::from(&config.output_dir)));
    println!(
        "   Output: {} ({} connection(s))",
        output_base.display(),
        databases.len()
    );

    // B. Adapters
    let engine = JinjaRenderer::with_overrides(&project_dir.join("templates").join("databases"))
        .context("Failed to load template overrides")?;
    let factory = BackendConnectorFactory::new(&project_dir);

    // C. Sync (Application Layer)
    let summary = sync_databases(&databases, &factory, &engine, &output_base).await;

    println!("\n{}", summary_table(&summary));
    print_status(&summary);

    // D. Project templates
    let mut template_failures = 0;
    if !no_templates {
        let context = template_context(&config.project_name, &summary);
        let rendered = render_user_templates(&project_dir, &output_base, &context, &engine);
        if !rendered.rendered.is_empty() {
            println!("📝 Rendered {} template(s)", rendered.rendered.len());
        }
        for (path, error) in &rendered.failed {
            eprintln!("❌ Template {} failed: {}", path.display(), error);
        }
        template_failures = rendered.failed.len();
    }

    if !summary.is_success() || template_failures > 0 {
        eprintln!(
            "\n❌ FAILURE. {} database(s) and {} template(s) failed.",
            summary.failures().count(),
            template_failures
        );
        // Exit with error code for CI/CD
        std::process::exit(1);
    }

    println!("\n✨ Done in {:.2?}", start.elapsed());
    Ok(())
}

fn print_status(summary: &SyncSummary) {
    let status = summary.status();
    let icon = match status {
        SyncStatus::Complete => "✅",
        SyncStatus::CompletedWithErrors => "⚠️ ",
        SyncStatus::Failed => "💥",
        SyncStatus::NothingToSync => "💤",
    };
    match status {
        SyncStatus::NothingToSync => println!("{icon} {}", status.label()),
        _ => println!("{icon} {}: {}", status.label(), summary.describe()),
    }
    let accessor_failures = summary.total_accessor_failures();
    if accessor_failures > 0 {
        println!("   {accessor_failures} accessor(s) rendered an error document");
    }
    let (failed_schemas, failed_tables) =
        (summary.total_failed_schemas(), summary.total_failed_tables());
    if failed_schemas + failed_tables > 0 {
        println!(
            "   ⚠️  {failed_schemas} schema(s) and {failed_tables} table(s) skipped on error, previous output kept"
        );
        for outcome in summary.successes() {
            if let Some(state) = outcome.state() {
                let labels = state.failure_labels();
                if !labels.is_empty() {
                    println!("      {}: {}", outcome.name(), labels.join(", "));
                }
            }
        }
    }
}

fn summary_table(summary: &SyncSummary) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Connection",
            "Type",
            "Status",
            "Schemas",
            "Tables",
            "Failed schemas",
            "Failed tables",
            "Stale removed",
            "Accessor failures",
            "Error",
        ]);

    for outcome in &summary.outcomes {
        match outcome {
            DatabaseSyncOutcome::Synced {
                name,
                db_type,
                state,
                stale_removed,
                ..
            } => table.add_row(vec![
                name.clone(),
                db_type.as_str().to_string(),
                "synced".to_string(),
                thousands(state.schemas_synced as u64),
                thousands(state.tables_synced as u64),
                state.failed_schemas.len().to_string(),
                state.failed_table_count().to_string(),
                stale_removed.to_string(),
                state.accessor_failures.to_string(),
                String::new(),
            ]),
            DatabaseSyncOutcome::Failed {
                name,
                db_type,
                error,
            } => table.add_row(vec![
                name.clone(),
                db_type.as_str().to_string(),
                "failed".to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                error.clone(),
            ]),
        };
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::domain::project::DatabaseType;
    use tidemark_core::domain::sync::SyncState;

    #[test]
    fn test_summary_table_lists_each_database() {
        let mut state = SyncState::new("/tmp/out");
        state.record_table("main", "users");
        state.record_table("main", "orders");
        state.record_schema_failure("locked_schema");

        let mut summary = SyncSummary::default();
        summary.push(DatabaseSyncOutcome::Synced {
            name: "local".into(),
            db_type: DatabaseType::DuckDB,
            database: "main".into(),
            state,
            stale_removed: 1,
        });
        summary.push(DatabaseSyncOutcome::Failed {
            name: "warehouse".into(),
            db_type: DatabaseType::Postgres,
            error: "connection refused".into(),
        });

        let rendered = summary_table(&summary).to_string();
        assert!(rendered.contains("local"));
        assert!(rendered.contains("duckdb"));
        assert!(rendered.contains("synced"));
        assert!(rendered.contains("warehouse"));
        assert!(rendered.contains("refused"));
        assert!(rendered.contains("Failed schemas"));
        assert!(rendered.contains("Failed tables"));
    }
}
