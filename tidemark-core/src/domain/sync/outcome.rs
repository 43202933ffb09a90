// tidemark-core/src/domain/sync/outcome.rs

use serde::Serialize;

use crate::domain::project::DatabaseType;
use crate::domain::sync::state::SyncState;

/// Result of syncing one configured database.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatabaseSyncOutcome {
    Synced {
        name: String,
        #[serde(serialize_with = "serialize_db_type")]
        db_type: DatabaseType,
        database: String,
        state: SyncState,
        stale_removed: usize,
    },
    Failed {
        name: String,
        #[serde(serialize_with = "serialize_db_type")]
        db_type: DatabaseType,
        error: String,
    },
}

impl DatabaseSyncOutcome {
    pub fn name(&self) -> &str {
        match self {
            DatabaseSyncOutcome::Synced { name, .. } | DatabaseSyncOutcome::Failed { name, .. } => {
                name
            }
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            DatabaseSyncOutcome::Synced { db_type, .. }
            | DatabaseSyncOutcome::Failed { db_type, .. } => *db_type,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DatabaseSyncOutcome::Synced { .. })
    }

    pub fn state(&self) -> Option<&SyncState> {
        match self {
            DatabaseSyncOutcome::Synced { state, .. } => Some(state),
            DatabaseSyncOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DatabaseSyncOutcome::Failed { error, .. } => Some(error),
            DatabaseSyncOutcome::Synced { .. } => None,
        }
    }
}

fn serialize_db_type<S: serde::Serializer>(t: &DatabaseType, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(t.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Complete,
    CompletedWithErrors,
    Failed,
    NothingToSync,
}

impl SyncStatus {
    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::Complete => "Sync Complete",
            SyncStatus::CompletedWithErrors => "Sync Completed with Errors",
            SyncStatus::Failed => "Sync Failed",
            SyncStatus::NothingToSync => "Nothing to sync",
        }
    }
}

/// Aggregate over every database of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub outcomes: Vec<DatabaseSyncOutcome>,
}

impl SyncSummary {
    pub fn push(&mut self, outcome: DatabaseSyncOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn successes(&self) -> impl Iterator<Item = &DatabaseSyncOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DatabaseSyncOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn total_schemas(&self) -> usize {
        self.successes()
            .filter_map(|o| o.state())
            .map(|s| s.schemas_synced)
            .sum()
    }

    pub fn total_tables(&self) -> usize {
        self.successes()
            .filter_map(|o| o.state())
            .map(|s| s.tables_synced)
            .sum()
    }

    pub fn total_stale_removed(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                DatabaseSyncOutcome::Synced { stale_removed, .. } => *stale_removed,
                DatabaseSyncOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn total_accessor_failures(&self) -> usize {
        self.successes()
            .filter_map(|o| o.state())
            .map(|s| s.accessor_failures)
            .sum()
    }

    /// Schemas whose listing failed inside otherwise synced databases.
    pub fn total_failed_schemas(&self) -> usize {
        self.successes()
            .filter_map(|o| o.state())
            .map(|s| s.failed_schemas.len())
            .sum()
    }

    pub fn total_failed_tables(&self) -> usize {
        self.successes()
            .filter_map(|o| o.state())
            .map(SyncState::failed_table_count)
            .sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Pass/fail signal: any failed database, or nothing succeeded although
    /// something was attempted.
    pub fn is_success(&self) -> bool {
        let attempted = !self.outcomes.is_empty();
        let succeeded = self.successes().next().is_some();
        !self.has_failures() && (!attempted || succeeded)
    }

    pub fn status(&self) -> SyncStatus {
        let succeeded = self.successes().next().is_some();
        match (self.has_failures(), succeeded) {
            (true, true) => SyncStatus::CompletedWithErrors,
            (true, false) => SyncStatus::Failed,
            (false, true) => SyncStatus::Complete,
            (false, false) => SyncStatus::NothingToSync,
        }
    }

    /// `"N tables across M datasets"`.
    pub fn describe(&self) -> String {
        format!(
            "{} tables across {} datasets",
            self.total_tables(),
            self.total_schemas()
        )
    }
}
