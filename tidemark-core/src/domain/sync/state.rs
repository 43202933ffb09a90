// tidemark-core/src/domain/sync/state.rs

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// What one database sync actually wrote. Append-only during a run; the
/// cleanup reconciler diffs the output tree against it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncState {
    pub db_path: PathBuf,
    pub synced_schemas: BTreeSet<String>,
    pub synced_tables: BTreeMap<String, BTreeSet<String>>,
    /// Schemas whose table listing failed. Still reported upstream, so their
    /// previous output is kept.
    pub failed_schemas: BTreeSet<String>,
    /// Tables whose directory or files could not be written.
    pub failed_tables: BTreeMap<String, BTreeSet<String>>,
    pub schemas_synced: usize,
    pub tables_synced: usize,
    pub accessor_failures: usize,
}

impl SyncState {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn record_schema(&mut self, schema: &str) {
        if self.synced_schemas.insert(schema.to_string()) {
            self.schemas_synced += 1;
        }
    }

    /// Records a finished table; its schema is recorded too.
    pub fn record_table(&mut self, schema: &str, table: &str) {
        self.record_schema(schema);
        let inserted = self
            .synced_tables
            .entry(schema.to_string())
            .or_default()
            .insert(table.to_string());
        if inserted {
            self.tables_synced += 1;
        }
    }

    pub fn record_schema_failure(&mut self, schema: &str) {
        self.failed_schemas.insert(schema.to_string());
    }

    pub fn record_table_failure(&mut self, schema: &str, table: &str) {
        self.failed_tables
            .entry(schema.to_string())
            .or_default()
            .insert(table.to_string());
    }

    pub fn record_accessor_failures(&mut self, count: usize) {
        self.accessor_failures += count;
    }

    /// Folds another run's retention sets into this one. Used when several
    /// connections write under the same database root, so cleanup sees the
    /// union of what they produced.
    pub fn absorb(&mut self, other: &SyncState) {
        self.synced_schemas.extend(other.synced_schemas.iter().cloned());
        self.failed_schemas.extend(other.failed_schemas.iter().cloned());
        for (schema, tables) in &other.synced_tables {
            self.synced_tables
                .entry(schema.clone())
                .or_default()
                .extend(tables.iter().cloned());
        }
        for (schema, tables) in &other.failed_tables {
            self.failed_tables
                .entry(schema.clone())
                .or_default()
                .extend(tables.iter().cloned());
        }
    }

    /// Schema directory must survive cleanup.
    pub fn retains_schema(&self, schema: &str) -> bool {
        self.synced_schemas.contains(schema)
            || self.failed_schemas.contains(schema)
            || self.failed_tables.contains_key(schema)
    }

    /// Table directory must survive cleanup. A schema whose listing failed
    /// keeps all its tables.
    pub fn retains_table(&self, schema: &str, table: &str) -> bool {
        if self.failed_schemas.contains(schema) {
            return true;
        }
        let in_set = |map: &BTreeMap<String, BTreeSet<String>>| {
            map.get(schema).is_some_and(|tables| tables.contains(table))
        };
        in_set(&self.synced_tables) || in_set(&self.failed_tables)
    }

    pub fn failed_table_count(&self) -> usize {
        self.failed_tables.values().map(BTreeSet::len).sum()
    }

    /// `schema` and `schema.table` labels of everything skipped on error.
    pub fn failure_labels(&self) -> Vec<String> {
        let schemas = self.failed_schemas.iter().cloned();
        let tables = self
            .failed_tables
            .iter()
            .flat_map(|(schema, tables)| tables.iter().map(move |t| format!("{schema}.{t}")));
        schemas.chain(tables).collect()
    }

    pub fn tables_in(&self, schema: &str) -> impl Iterator<Item = &String> {
        self.synced_tables.get(schema).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_implies_schema() {
        let mut state = SyncState::new("/out/type=duckdb/database=main");
        state.record_table("main", "users");
        state.record_table("main", "orders");
        state.record_table("main", "users");

        assert!(state.synced_schemas.contains("main"));
        assert_eq!(state.schemas_synced, 1);
        assert_eq!(state.tables_synced, 2);
        assert_eq!(state.tables_in("main").count(), 2);
    }

    #[test]
    fn test_retention_rules() {
        let mut state = SyncState::new("/out");
        state.record_table("main", "users");
        state.record_schema_failure("flaky");
        state.record_table_failure("main", "locked");

        assert!(state.retains_schema("main"));
        assert!(state.retains_schema("flaky"));
        assert!(!state.retains_schema("gone"));

        assert!(state.retains_table("main", "users"));
        assert!(state.retains_table("main", "locked"));
        assert!(state.retains_table("flaky", "anything"));
        assert!(!state.retains_table("main", "dropped"));
        assert_eq!(state.failed_table_count(), 1);
        assert_eq!(state.failure_labels(), ["flaky", "main.locked"]);
    }

    #[test]
    fn test_absorb_unions_retention() {
        let mut a = SyncState::new("/out/type=duckdb/database=main");
        a.record_table("main", "users");
        a.record_accessor_failures(2);
        let mut b = SyncState::new("/out/type=duckdb/database=main");
        b.record_table("main", "orders");
        b.record_schema_failure("flaky");

        a.absorb(&b);
        assert!(a.retains_table("main", "users"));
        assert!(a.retains_table("main", "orders"));
        assert!(a.retains_schema("flaky"));
        // counters stay per connection
        assert_eq!(a.tables_synced, 1);
        assert_eq!(a.accessor_failures, 2);
    }
}
