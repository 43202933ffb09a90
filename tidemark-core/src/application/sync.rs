// tidemark-core/src/application/sync.rs

// Per-database orchestrator: discover schemas, list and filter tables, write
// every accessor of every table, and record what was written.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::application::accessors::generate;
use crate::application::context::TableContext;
use crate::application::ports::TemplateEngine;
use crate::domain::filter::TableFilter;
use crate::domain::project::{AccessorKind, DatabaseConfig};
use crate::domain::sync::SyncState;
use crate::error::TidemarkError;
use crate::infrastructure::fs::{atomic_write, partition_segment};
use crate::ports::Connector;

/// `{base}/type={type}/database={name}`
pub fn database_root(
    output_base: &Path,
    config: &DatabaseConfig,
    connector: &dyn Connector,
) -> Result<PathBuf, TidemarkError> {
    Ok(output_base
        .join(partition_segment("type", config.db_type().as_str())?)
        .join(partition_segment("database", &connector.database_name())?))
}

#[instrument(skip_all, fields(connection = %config.name))]
pub async fn sync_database(
    config: &DatabaseConfig,
    connector: &dyn Connector,
    output_base: &Path,
    engine: &dyn TemplateEngine,
) -> Result<SyncState, TidemarkError> {
    let db_path = database_root(output_base, config, connector)?;
    let mut state = SyncState::new(&db_path);

    let case = connector.identifier_case();
    let filter = TableFilter::new(&config.include, &config.exclude, case)?;
    let accessors = config.accessor_kinds();

    let schemas = match config.schema_filter() {
        Some(schema) => vec![case.apply(schema)],
        None => connector.list_schemas().await?,
    };
    info!(schemas = schemas.len(), path = ?db_path, "Discovered schemas");

    for schema in &schemas {
        let tables = match connector.list_tables(schema).await {
            Ok(tables) => tables,
            Err(e) => {
                warn!(schema = %schema, error = %e, "Skipping schema: table listing failed");
                state.record_schema_failure(schema);
                continue;
            }
        };

        let selected: Vec<&String> = tables
            .iter()
            .filter(|table| filter.matches(schema, table))
            .collect();
        if selected.is_empty() {
            debug!(schema = %schema, "No table left after filtering");
            continue;
        }

        let schema_dir = match partition_segment("schema", schema) {
            Ok(segment) => db_path.join(segment),
            Err(e) => {
                warn!(schema = %schema, error = %e, "Skipping schema with unsafe name");
                state.record_schema_failure(schema);
                continue;
            }
        };

        for table in selected {
            let written = sync_table(
                connector,
                schema,
                table,
                &schema_dir,
                &accessors,
                config.preview_limit,
                engine,
            )
            .await;
            match written {
                Ok(failures) => {
                    state.record_table(schema, table);
                    state.record_accessor_failures(failures);
                }
                Err(e) => {
                    warn!(table = %format!("{schema}.{table}"), error = %e, "Table not written");
                    state.record_table_failure(schema, table);
                }
            }
        }
    }

    info!(
        schemas = state.schemas_synced,
        tables = state.tables_synced,
        accessor_failures = state.accessor_failures,
        "Database synced"
    );
    Ok(state)
}

/// Writes every accessor file for one table. Returns how many of them are
/// error documents; `Err` only when the directory or a file cannot be written.
async fn sync_table(
    connector: &dyn Connector,
    schema: &str,
    table: &str,
    schema_dir: &Path,
    accessors: &[AccessorKind],
    preview_limit: usize,
    engine: &dyn TemplateEngine,
) -> Result<usize, TidemarkError> {
    let table_dir = schema_dir.join(partition_segment("table", table)?);
    fs::create_dir_all(&table_dir)?;

    let ctx = TableContext::new(connector, schema, table);
    let mut failures = 0;
    for kind in accessors {
        let output = generate(*kind, &ctx, engine, preview_limit).await;
        if output.is_error() {
            failures += 1;
        }
        atomic_write(table_dir.join(output.filename()), &output.content)?;
    }
    debug!(schema, table, "Table written");
    Ok(failures)
}
