// tidemark-core/src/infrastructure/adapters/duckdb.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::{AccessMode, Config, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::domain::project::DuckDBConfig;
use crate::error::TidemarkError;
use crate::infrastructure::adapters::common::{
    profile_from_result, profile_query, quote_ident, value_as_string,
};
use crate::infrastructure::error::{InfrastructureError, DatabaseError};
use crate::ports::{ColumnProfile, ColumnSchema, Connector, QueryResult, Row};

const SYSTEM_SCHEMAS: &str = "('information_schema', 'pg_catalog')";

pub struct DuckDbConnector {
    conn: Arc<Mutex<Connection>>,
    database: String,
}

impl DuckDbConnector {
    /// In-memory databases are reported as `main`; files by their stem.
    /// Files are opened read-only.
    pub fn open(config: &DuckDBConfig, project_dir: &Path) -> Result<Self, InfrastructureError> {
        if config.path == ":memory:" {
            return Ok(Self::from_connection(Connection::open_in_memory()?, "main"));
        }

        let path = project_dir.join(&config.path);
        let database = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("main")
            .to_string();
        let flags = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(&path, flags)?;
        Ok(Self::from_connection(conn, database))
    }

    /// Wraps an already-open connection, e.g. a seeded in-memory database.
    pub fn from_connection(conn: Connection, database: impl Into<String>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            database: database.into(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TidemarkError> {
        self.conn.lock().map_err(|_| {
            TidemarkError::Infrastructure(InfrastructureError::Io(std::io::Error::other(
                "DuckDB Mutex Poisoned",
            )))
        })
    }

    fn table_ref(schema: &str, table: &str) -> String {
        format!("{}.{}", quote_ident(schema, '"'), quote_ident(table, '"'))
    }

    fn query_strings(&self, sql: &str, params: &[&str]) -> Result<Vec<String>, TidemarkError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn query(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
        debug!(sql, "duckdb query");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                let value: DuckValue = row.get(i)?;
                record.insert(name.clone(), to_json(value));
            }
            out.push(record);
        }
        Ok(QueryResult::new(columns, out))
    }
}

#[async_trait]
impl Connector for DuckDbConnector {
    fn database_name(&self) -> String {
        self.database.clone()
    }

    async fn list_schemas(&self) -> Result<Vec<String>, TidemarkError> {
        self.query_strings(
            &format!(
                "SELECT schema_name FROM information_schema.schemata \
                 WHERE catalog_name = current_database() AND schema_name NOT IN {SYSTEM_SCHEMAS} \
                 ORDER BY schema_name"
            ),
            &[],
        )
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, TidemarkError> {
        self.query_strings(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_catalog = current_database() AND table_schema = ? \
             ORDER BY table_name",
            &[schema],
        )
        .map_err(|e| {
            InfrastructureError::SchemaUnavailable {
                schema: schema.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn fetch_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnSchema>, TidemarkError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
             WHERE table_catalog = current_database() AND table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
        )?;
        let rows = stmt.query_map([schema, table], |row| {
            Ok(ColumnSchema {
                name: row.get(0)?,
                data_type: row.get(1)?,
                is_nullable: row.get::<_, String>(2)? == "YES",
            })
        })?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        if columns.is_empty() {
            return Err(TidemarkError::Infrastructure(InfrastructureError::Database(
                DatabaseError::Api {
                    backend: "duckdb",
                    message: format!("Table {schema}.{table} not found"),
                },
            )));
        }
        Ok(columns)
    }

    async fn fetch_row_count(&self, schema: &str, table: &str) -> Result<u64, TidemarkError> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", Self::table_ref(schema, table));
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_preview_rows(
        &self,
        schema: &str,
        table: &str,
        limit: usize,
    ) -> Result<Vec<Row>, TidemarkError> {
        let sql = format!(
            "SELECT * FROM {} LIMIT {limit}",
            Self::table_ref(schema, table)
        );
        Ok(self.query(&sql)?.rows)
    }

    async fn fetch_table_description(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<String>, TidemarkError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT comment FROM duckdb_tables() \
             WHERE database_name = current_database() AND schema_name = ? AND table_name = ?",
        )?;
        let mut rows = stmt.query([schema, table])?;
        let comment = match rows.next()? {
            Some(row) => row.get::<_, Option<String>>(0)?,
            None => None,
        };
        Ok(comment.filter(|c| !c.trim().is_empty()))
    }

    async fn fetch_column_profile(
        &self,
        schema: &str,
        table: &str,
        column: &ColumnSchema,
    ) -> Result<ColumnProfile, TidemarkError> {
        let sql = profile_query(
            &Self::table_ref(schema, table),
            &quote_ident(&column.name, '"'),
            column.is_orderable(),
            "VARCHAR",
        );
        profile_from_result(&self.query(&sql)?)
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
        self.query(sql)
    }
}

/// DuckDB value to JSON. Anything without a JSON counterpart becomes a string.
fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(v) => Value::from(v),
        DuckValue::SmallInt(v) => Value::from(v),
        DuckValue::Int(v) => Value::from(v),
        DuckValue::BigInt(v) => Value::from(v),
        DuckValue::UTinyInt(v) => Value::from(v),
        DuckValue::USmallInt(v) => Value::from(v),
        DuckValue::UInt(v) => Value::from(v),
        DuckValue::UBigInt(v) => Value::from(v),
        DuckValue::HugeInt(v) => i64::try_from(v)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(v.to_string())),
        DuckValue::Float(v) => float(f64::from(v)),
        DuckValue::Double(v) => float(v),
        DuckValue::Decimal(d) => Value::String(d.to_string()),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Blob(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        DuckValue::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + 719_163)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Timestamp(unit, v) => DateTime::from_timestamp_micros(to_micros(unit, v))
            .map(|ts| Value::String(ts.naive_utc().to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Time64(unit, v) => {
            let micros = to_micros(unit, v);
            let secs = (micros / 1_000_000) as u32;
            let nanos = ((micros % 1_000_000) * 1_000) as u32;
            NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                .map(|t| Value::String(t.to_string()))
                .unwrap_or(Value::Null)
        }
        DuckValue::List(items) | DuckValue::Array(items) => {
            let rendered: Vec<String> = items
                .into_iter()
                .map(|v| value_as_string(&to_json(v)).unwrap_or_else(|| "NULL".into()))
                .collect();
            Value::String(format!("[{}]", rendered.join(", ")))
        }
        other => Value::String(format!("{other:?}")),
    }
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}

fn to_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}
