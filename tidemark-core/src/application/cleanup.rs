// tidemark-core/src/application/cleanup.rs

use std::fs;
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::domain::sync::SyncState;
use crate::error::TidemarkError;
use crate::infrastructure::fs::list_partitions;

/// Deletes `schema=`/`table=` directories under `state.db_path` that this run
/// did not produce. Runs after the database finished syncing. Returns the
/// number of directories removed.
#[instrument(skip(state), fields(db_path = ?state.db_path))]
pub fn reconcile(state: &SyncState) -> Result<usize, TidemarkError> {
    let mut removed = 0;

    for (schema, schema_dir) in list_partitions(state.db_path(), "schema")? {
        if !state.retains_schema(&schema) {
            if remove_stale(state.db_path(), &schema_dir)? {
                info!(schema = %schema, "🗑️  Removed stale schema");
                removed += 1;
            }
            continue;
        }

        for (table, table_dir) in list_partitions(&schema_dir, "table")? {
            if !state.retains_table(&schema, &table) && remove_stale(state.db_path(), &table_dir)? {
                info!(table = %format!("{schema}.{table}"), "🗑️  Removed stale table");
                removed += 1;
            }
        }
    }

    Ok(removed)
}

/// `Ok(false)` when the directory could not be deleted; one stuck entry
/// does not stop the rest of the reconciliation.
fn remove_stale(db_path: &Path, dir: &Path) -> Result<bool, TidemarkError> {
    // Zero-Trust Path Traversal Guard
    if !dir.starts_with(db_path) {
        return Err(TidemarkError::UnsafePath(dir.display().to_string()));
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) => {
            warn!(path = ?dir, error = %e, "Could not remove stale entry");
            Ok(false)
        }
    }
}
