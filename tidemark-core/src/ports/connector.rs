// tidemark-core/src/ports/connector.rs

// What the sync pipeline needs from a warehouse, independent of how each
// backend answers. One implementation per backend lives in
// infrastructure/adapters.

use crate::domain::project::DatabaseConfig;
use crate::error::TidemarkError;
use async_trait::async_trait;
use serde::Serialize;

/// A preview/query row: column name to JSON value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, is_nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable,
        }
    }

    /// Numeric and temporal columns get min/max in profiling.
    pub fn is_orderable(&self) -> bool {
        let t = self.data_type.to_ascii_lowercase();
        const MARKERS: [&str; 16] = [
            "int", "numeric", "decimal", "double", "float", "real", "number", "bignum", "hugeint",
            "date", "time", "interval", "serial", "money", "bigdecimal", "fixed",
        ];
        MARKERS.iter().any(|m| t.contains(m))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub null_count: u64,
    pub distinct_count: u64,
    pub min: Option<String>,
    pub max: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
        }
    }
}

/// How a backend folds unquoted identifiers. Filter patterns are normalised
/// with it before matching, so users can write `analytics.*` for Snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentifierCase {
    #[default]
    AsIs,
    Upper,
}

impl IdentifierCase {
    pub fn apply(self, identifier: &str) -> String {
        match self {
            IdentifierCase::AsIs => identifier.to_string(),
            IdentifierCase::Upper => identifier.to_uppercase(),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Name used for the `database=` output segment, in the backend's native case.
    fn database_name(&self) -> String;

    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::AsIs
    }

    async fn list_schemas(&self) -> Result<Vec<String>, TidemarkError>;

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, TidemarkError>;

    async fn fetch_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnSchema>, TidemarkError>;

    async fn fetch_row_count(&self, schema: &str, table: &str) -> Result<u64, TidemarkError>;

    async fn fetch_preview_rows(
        &self,
        schema: &str,
        table: &str,
        limit: usize,
    ) -> Result<Vec<Row>, TidemarkError>;

    /// Table comment, when the backend stores one.
    async fn fetch_table_description(
        &self,
        _schema: &str,
        _table: &str,
    ) -> Result<Option<String>, TidemarkError> {
        Ok(None)
    }

    async fn fetch_column_profile(
        &self,
        schema: &str,
        table: &str,
        column: &ColumnSchema,
    ) -> Result<ColumnProfile, TidemarkError>;

    /// Raw SQL for the Query Service.
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult, TidemarkError>;

    /// Bytes a query would scan, for backends that support a dry run.
    async fn dry_run_bytes(&self, _sql: &str) -> Result<Option<u64>, TidemarkError> {
        Ok(None)
    }
}

/// Opens connectors from configuration. The driver receives one of these so
/// tests can hand it pre-seeded or scripted connectors.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connector>, TidemarkError>;
}
