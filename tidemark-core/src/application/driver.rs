// tidemark-core/src/application/driver.rs

// Multi-database driver: one orchestrator run per configured connection,
// failures isolated per database, stale cleanup once everything is written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

use crate::application::cleanup::reconcile;
use crate::application::ports::TemplateEngine;
use crate::application::sync::{database_root, sync_database};
use crate::domain::error::DomainError;
use crate::domain::project::{DatabaseConfig, ProjectConfig};
use crate::domain::sync::{DatabaseSyncOutcome, SyncState, SyncSummary};
use crate::ports::ConnectorFactory;

/// The only sync provider.
pub const DATABASES_PROVIDER: &str = "databases";

/// Resolves `databases` / `databases:<name>` selectors to connections, in
/// configuration order. No selector means every connection. An unknown
/// connection name only warns.
pub fn select_databases<'a>(
    config: &'a ProjectConfig,
    selectors: &[String],
) -> Result<Vec<&'a DatabaseConfig>, DomainError> {
    if selectors.is_empty() {
        return Ok(config.databases.iter().collect());
    }

    let mut wanted: Vec<&str> = Vec::new();
    let mut all = false;
    for selector in selectors {
        let (provider, name) = match selector.split_once(':') {
            Some((provider, name)) => (provider.trim(), Some(name.trim())),
            None => (selector.trim(), None),
        };
        if provider != DATABASES_PROVIDER {
            return Err(DomainError::UnknownProvider(provider.to_string()));
        }
        match name {
            None | Some("") => all = true,
            Some(name) => {
                if config.databases.iter().any(|db| db.name == name) {
                    wanted.push(name);
                } else {
                    warn!(connection = %name, "No database connection with this name, nothing to sync");
                }
            }
        }
    }

    Ok(config
        .databases
        .iter()
        .filter(|db| all || wanted.contains(&db.name.as_str()))
        .collect())
}

#[instrument(skip_all, fields(databases = databases.len()))]
pub async fn sync_databases(
    databases: &[&DatabaseConfig],
    factory: &dyn ConnectorFactory,
    engine: &dyn TemplateEngine,
    output_base: &Path,
) -> SyncSummary {
    let mut finished: Vec<(&DatabaseConfig, String, SyncState)> = Vec::new();
    // Roots of connections that failed mid-sync; their previous output stays.
    let mut interrupted: Vec<PathBuf> = Vec::new();
    let mut summary = SyncSummary::default();

    for &config in databases {
        info!(connection = %config.name, db_type = %config.db_type(), "🔄 Syncing database");

        let connector = match factory.connect(config).await {
            Ok(connector) => connector,
            Err(e) => {
                error!(connection = %config.name, error = %e, "Database skipped");
                summary.push(failed(config, e.to_string()));
                continue;
            }
        };

        match sync_database(config, connector.as_ref(), output_base, engine).await {
            Ok(state) => finished.push((config, connector.database_name(), state)),
            Err(e) => {
                error!(connection = %config.name, error = %e, "Database sync failed");
                if let Ok(root) = database_root(output_base, config, connector.as_ref()) {
                    interrupted.push(root);
                }
                summary.push(failed(config, e.to_string()));
            }
        }
    }

    // Cleanup only once every database finished writing, once per root.
    let mut removed = cleanup_roots(&finished, &interrupted);
    for (config, database, state) in finished {
        // credited to the first connection writing under this root
        let stale_removed = removed.remove(&state.db_path).unwrap_or(0);
        summary.push(DatabaseSyncOutcome::Synced {
            name: config.name.clone(),
            db_type: config.db_type(),
            database,
            state,
            stale_removed,
        });
    }

    // Report in configuration order.
    summary.outcomes.sort_by_key(|o| {
        databases
            .iter()
            .position(|db| db.name == o.name())
            .unwrap_or(usize::MAX)
    });
    summary
}

/// Two connections can resolve to the same `type=/database=` root (two
/// DuckDB files both named `main`, say). Each root is reconciled against the
/// union of what its connections wrote.
fn cleanup_roots(
    finished: &[(&DatabaseConfig, String, SyncState)],
    interrupted: &[PathBuf],
) -> HashMap<PathBuf, usize> {
    let mut roots: Vec<SyncState> = Vec::new();
    for (_, _, state) in finished {
        match roots.iter_mut().find(|root| root.db_path == state.db_path) {
            Some(root) => root.absorb(state),
            None => {
                let mut root = SyncState::new(&state.db_path);
                root.absorb(state);
                roots.push(root);
            }
        }
    }

    let mut removed = HashMap::new();
    for root in roots {
        if interrupted.contains(&root.db_path) {
            warn!(path = ?root.db_path, "Another connection failed under this root, stale cleanup skipped");
            continue;
        }
        let count = match reconcile(&root) {
            Ok(count) => count,
            Err(e) => {
                warn!(path = ?root.db_path, error = %e, "Stale cleanup failed");
                0
            }
        };
        removed.insert(root.db_path, count);
    }
    removed
}

fn failed(config: &DatabaseConfig, error: String) -> DatabaseSyncOutcome {
    DatabaseSyncOutcome::Failed {
        name: config.name.clone(),
        db_type: config.db_type(),
        error,
    }
}
