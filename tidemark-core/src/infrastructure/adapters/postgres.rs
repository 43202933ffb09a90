// tidemark-core/src/infrastructure/adapters/postgres.rs
//
// Postgres and Redshift share the wire protocol and information_schema, so
// one connector serves both. One connection per sync, no pool.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, ConnectOptions, Executor, Row as _, Statement, TypeInfo, ValueRef};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::project::{PostgresConfig, RedshiftConfig};
use crate::error::TidemarkError;
use crate::infrastructure::adapters::common::{profile_from_result, profile_query, quote_ident};
use crate::infrastructure::error::InfrastructureError;
use crate::ports::{ColumnProfile, ColumnSchema, Connector, QueryResult, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgFlavor {
    Postgres,
    Redshift,
}

pub struct PostgresConnector {
    conn: Mutex<PgConnection>,
    database: String,
    flavor: PgFlavor,
}

struct PgParams<'a> {
    host: &'a str,
    port: u16,
    database: &'a str,
    user: &'a str,
    password: &'a str,
    sslmode: &'a str,
}

impl PostgresConnector {
    pub async fn connect_postgres(config: &PostgresConfig) -> Result<Self, TidemarkError> {
        Self::connect(
            PgParams {
                host: &config.host,
                port: config.port,
                database: &config.database,
                user: &config.user,
                password: &config.password,
                sslmode: &config.sslmode,
            },
            PgFlavor::Postgres,
        )
        .await
    }

    pub async fn connect_redshift(config: &RedshiftConfig) -> Result<Self, TidemarkError> {
        Self::connect(
            PgParams {
                host: &config.host,
                port: config.port,
                database: &config.database,
                user: &config.user,
                password: &config.password,
                sslmode: &config.sslmode,
            },
            PgFlavor::Redshift,
        )
        .await
    }

    async fn connect(params: PgParams<'_>, flavor: PgFlavor) -> Result<Self, TidemarkError> {
        let ssl_mode = PgSslMode::from_str(params.sslmode).map_err(|e| {
            InfrastructureError::ConfigError(format!("invalid sslmode '{}': {e}", params.sslmode))
        })?;
        let options = PgConnectOptions::new()
            .host(params.host)
            .port(params.port)
            .database(params.database)
            .username(params.user)
            .password(params.password)
            .ssl_mode(ssl_mode);

        let conn = options.connect().await?;
        Ok(Self {
            conn: Mutex::new(conn),
            database: params.database.to_string(),
            flavor,
        })
    }

    pub fn flavor(&self) -> PgFlavor {
        self.flavor
    }

    fn table_ref(schema: &str, table: &str) -> String {
        format!("{}.{}", quote_ident(schema, '"'), quote_ident(table, '"'))
    }

    async fn fetch_strings(&self, sql: &str, binds: &[&str]) -> Result<Vec<String>, TidemarkError> {
        let mut conn = self.conn.lock().await;
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        let rows = query.fetch_all(&mut *conn).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(TidemarkError::from))
            .collect()
    }

    async fn query(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
        debug!(sql, "postgres query");
        let mut conn = self.conn.lock().await;
        // Names come from the prepared statement so an empty result keeps them.
        let statement = (&mut *conn).prepare(sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = statement.query().fetch_all(&mut *conn).await?;
        Ok(QueryResult::new(columns, rows.iter().map(row_to_map).collect()))
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn database_name(&self) -> String {
        self.database.clone()
    }

    async fn list_schemas(&self) -> Result<Vec<String>, TidemarkError> {
        self.fetch_strings(
            "SELECT schema_name::text FROM information_schema.schemata \
             WHERE schema_name <> 'information_schema' AND schema_name NOT LIKE 'pg\\_%' \
             ORDER BY schema_name",
            &[],
        )
        .await
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, TidemarkError> {
        self.fetch_strings(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 ORDER BY table_name",
            &[schema],
        )
        .await
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
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query(
            "SELECT column_name::text, data_type::text, is_nullable::text \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| -> Result<ColumnSchema, TidemarkError> {
                Ok(ColumnSchema {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    is_nullable: row.try_get::<String, _>(2)? == "YES",
                })
            })
            .collect()
    }

    async fn fetch_row_count(&self, schema: &str, table: &str) -> Result<u64, TidemarkError> {
        let mut conn = self.conn.lock().await;
        let sql = format!("SELECT COUNT(*) FROM {}", Self::table_ref(schema, table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
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
        Ok(self.query(&sql).await?.rows)
    }

    async fn fetch_table_description(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<String>, TidemarkError> {
        if self.flavor == PgFlavor::Redshift {
            return Ok(None);
        }
        let mut conn = self.conn.lock().await;
        let comment: Option<Option<String>> = sqlx::query_scalar(
            "SELECT obj_description(c.oid, 'pg_class') FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relname = $2",
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(comment.flatten().filter(|c| !c.trim().is_empty()))
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
        profile_from_result(&self.query(&sql).await?)
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
        self.query(sql).await
    }
}

/// Decodes a row by column type name. Unknown types fall back to text.
fn row_to_map(row: &PgRow) -> Row {
    let mut map = Row::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name();

        let is_null = row.try_get_raw(i).map(|v| v.is_null()).unwrap_or(true);
        if is_null {
            map.insert(name, Value::Null);
            continue;
        }

        let value = match type_name {
            "BOOL" => row.try_get::<bool, _>(i).map(Value::Bool).ok(),
            "INT2" => row.try_get::<i16, _>(i).map(Value::from).ok(),
            "INT4" => row.try_get::<i32, _>(i).map(Value::from).ok(),
            "INT8" => row.try_get::<i64, _>(i).map(Value::from).ok(),
            "FLOAT4" => row
                .try_get::<f32, _>(i)
                .ok()
                .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
                .map(Value::Number),
            "FLOAT8" => row
                .try_get::<f64, _>(i)
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            "NUMERIC" => row
                .try_get::<sqlx::types::Decimal, _>(i)
                .map(|v| Value::String(v.to_string()))
                .ok(),
            "UUID" => row
                .try_get::<sqlx::types::Uuid, _>(i)
                .map(|v| Value::String(v.to_string()))
                .ok(),
            "TIMESTAMPTZ" => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
                .map(|v| Value::String(v.to_rfc3339()))
                .ok(),
            "TIMESTAMP" => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .map(|v| Value::String(v.to_string()))
                .ok(),
            "DATE" => row
                .try_get::<chrono::NaiveDate, _>(i)
                .map(|v| Value::String(v.to_string()))
                .ok(),
            "TIME" => row
                .try_get::<chrono::NaiveTime, _>(i)
                .map(|v| Value::String(v.to_string()))
                .ok(),
            "JSON" | "JSONB" => row
                .try_get::<Value, _>(i)
                .map(|v| Value::String(v.to_string()))
                .ok(),
            _ => row.try_get::<String, _>(i).map(Value::String).ok(),
        };

        map.insert(
            name,
            value.unwrap_or_else(|| Value::String(format!("<{type_name}>"))),
        );
    }

    map
}
