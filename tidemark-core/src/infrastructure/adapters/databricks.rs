// tidemark-core/src/infrastructure/adapters/databricks.rs
//
// Databricks SQL Statement Execution API (`/api/2.0/sql/statements`) against
// the SQL warehouse named in `http_path`.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::project::DatabricksConfig;
use crate::error::TidemarkError;
use crate::infrastructure::adapters::common::{
    ScalarKind, profile_from_result, profile_query, quote_ident, read_json, typed_value,
    value_as_u64,
};
use crate::infrastructure::error::{DatabaseError, InfrastructureError};
use crate::ports::{ColumnProfile, ColumnSchema, Connector, QueryResult, Row};

const BACKEND: &str = "databricks";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct DatabricksConnector {
    http: reqwest::Client,
    host: String,
    token: String,
    warehouse_id: String,
    catalog: String,
}

#[derive(Debug, Clone)]
struct ResultColumn {
    name: String,
    type_name: String,
}

impl DatabricksConnector {
    pub async fn connect(config: &DatabricksConfig) -> Result<Self, TidemarkError> {
        let warehouse_id = warehouse_id(&config.http_path).ok_or_else(|| {
            InfrastructureError::ConfigError(format!(
                "http_path '{}' does not name a SQL warehouse",
                config.http_path
            ))
        })?;
        let host = config
            .server_hostname
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string();

        let connector = Self {
            http: reqwest::Client::new(),
            host,
            token: config.access_token.clone(),
            warehouse_id,
            catalog: config.catalog.clone(),
        };
        connector.statement("SELECT 1").await?;
        info!(host = %connector.host, catalog = %connector.catalog, "Databricks warehouse ready");
        Ok(connector)
    }

    async fn statement(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
        debug!(sql, "databricks statement");
        let url = format!("https://{}/api/2.0/sql/statements", self.host);
        let body = json!({
            "statement": sql,
            "warehouse_id": self.warehouse_id,
            "catalog": self.catalog,
            "wait_timeout": "30s",
            "on_wait_timeout": "CONTINUE",
            "disposition": "INLINE",
            "format": "JSON_ARRAY",
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let mut result = read_json(response, BACKEND).await?;

        loop {
            let state = result
                .pointer("/status/state")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string();
            match state.as_str() {
                "SUCCEEDED" => break,
                "PENDING" | "RUNNING" => {
                    let id = result
                        .get("statement_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    tokio::time::sleep(POLL_INTERVAL).await;
                    let response = self
                        .http
                        .get(format!("{url}/{id}"))
                        .bearer_auth(&self.token)
                        .send()
                        .await?;
                    result = read_json(response, BACKEND).await?;
                }
                _ => {
                    let message = result
                        .pointer("/status/error/message")
                        .and_then(Value::as_str)
                        .map(|m| format!("{state}: {m}"))
                        .unwrap_or_else(|| state.clone());
                    return Err(InfrastructureError::Database(DatabaseError::StatementIncomplete {
                        backend: BACKEND,
                        state: message,
                    })
                    .into());
                }
            }
        }

        let columns = result_columns(&result);
        let mut data: Vec<Value> = result
            .pointer("/result/data_array")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut next = result
            .pointer("/result/next_chunk_internal_link")
            .and_then(Value::as_str)
            .map(str::to_string);
        while let Some(link) = next {
            let response = self
                .http
                .get(format!("https://{}{link}", self.host))
                .bearer_auth(&self.token)
                .send()
                .await?;
            let chunk = read_json(response, BACKEND).await?;
            if let Some(rows) = chunk.get("data_array").and_then(Value::as_array) {
                data.extend(rows.iter().cloned());
            }
            next = chunk
                .get("next_chunk_internal_link")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        let names = columns.iter().map(|c| c.name.clone()).collect();
        let rows = data.iter().map(|cells| decode_row(&columns, cells)).collect();
        Ok(QueryResult::new(names, rows))
    }

    fn schema_ref(&self, schema: &str) -> String {
        format!("{}.{}", quote_ident(&self.catalog, '`'), quote_ident(schema, '`'))
    }

    fn table_ref(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.schema_ref(schema), quote_ident(table, '`'))
    }
}

#[async_trait]
impl Connector for DatabricksConnector {
    fn database_name(&self) -> String {
        self.catalog.clone()
    }

    async fn list_schemas(&self) -> Result<Vec<String>, TidemarkError> {
        let result = self
            .statement(&format!("SHOW SCHEMAS IN {}", quote_ident(&self.catalog, '`')))
            .await?;
        let mut schemas: Vec<String> = result
            .rows
            .iter()
            .filter_map(|row| row.values().next().and_then(Value::as_str))
            .filter(|s| *s != "information_schema")
            .map(str::to_string)
            .collect();
        schemas.sort();
        Ok(schemas)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, TidemarkError> {
        let result = self
            .statement(&format!("SHOW TABLES IN {}", self.schema_ref(schema)))
            .await
            .map_err(|e| InfrastructureError::SchemaUnavailable {
                schema: schema.to_string(),
                reason: e.to_string(),
            })?;
        let mut tables: Vec<String> = result
            .rows
            .iter()
            .filter(|row| row.get("isTemporary") != Some(&json!(true)))
            .filter_map(|row| row.get("tableName").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        tables.sort();
        Ok(tables)
    }

    async fn fetch_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnSchema>, TidemarkError> {
        let result = self
            .statement(&format!("DESCRIBE TABLE {}", self.table_ref(schema, table)))
            .await?;
        Ok(describe_columns(&result.rows))
    }

    async fn fetch_row_count(&self, schema: &str, table: &str) -> Result<u64, TidemarkError> {
        let result = self
            .statement(&format!("SELECT COUNT(*) FROM {}", self.table_ref(schema, table)))
            .await?;
        Ok(result
            .rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(value_as_u64)
            .unwrap_or(0))
    }

    async fn fetch_preview_rows(
        &self,
        schema: &str,
        table: &str,
        limit: usize,
    ) -> Result<Vec<Row>, TidemarkError> {
        let sql = format!("SELECT * FROM {} LIMIT {limit}", self.table_ref(schema, table));
        Ok(self.statement(&sql).await?.rows)
    }

    async fn fetch_table_description(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<String>, TidemarkError> {
        let result = self
            .statement(&format!(
                "DESCRIBE TABLE EXTENDED {}",
                self.table_ref(schema, table)
            ))
            .await?;
        Ok(extended_comment(&result.rows))
    }

    async fn fetch_column_profile(
        &self,
        schema: &str,
        table: &str,
        column: &ColumnSchema,
    ) -> Result<ColumnProfile, TidemarkError> {
        let sql = profile_query(
            &self.table_ref(schema, table),
            &quote_ident(&column.name, '`'),
            column.is_orderable(),
            "STRING",
        );
        profile_from_result(&self.statement(&sql).await?)
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
        self.statement(sql).await
    }
}

/// `/sql/1.0/warehouses/abc123` -> `abc123`
fn warehouse_id(http_path: &str) -> Option<String> {
    http_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn result_columns(result: &Value) -> Vec<ResultColumn> {
    result
        .pointer("/manifest/schema/columns")
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .map(|c| ResultColumn {
                    name: c["name"].as_str().unwrap_or_default().to_string(),
                    type_name: c["type_name"].as_str().unwrap_or("STRING").to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn decode_row(columns: &[ResultColumn], cells: &Value) -> Row {
    let cells = cells.as_array().cloned().unwrap_or_default();
    columns
        .iter()
        .zip(cells)
        .map(|(c, cell)| {
            let kind = match c.type_name.as_str() {
                "BYTE" | "SHORT" | "INT" | "LONG" => ScalarKind::Integer,
                "FLOAT" | "DOUBLE" => ScalarKind::Float,
                "BOOLEAN" => ScalarKind::Boolean,
                _ => ScalarKind::Text,
            };
            (c.name.clone(), typed_value(cell.as_str(), kind))
        })
        .collect()
}

/// DESCRIBE output lists columns until a blank or `#` section row.
fn describe_columns(rows: &[Row]) -> Vec<ColumnSchema> {
    rows.iter()
        .map(|row| {
            (
                row.get("col_name").and_then(Value::as_str).unwrap_or_default(),
                row.get("data_type").and_then(Value::as_str).unwrap_or_default(),
            )
        })
        .take_while(|(name, _)| !name.trim().is_empty() && !name.starts_with('#'))
        .map(|(name, data_type)| ColumnSchema::new(name, data_type, true))
        .collect()
}

fn extended_comment(rows: &[Row]) -> Option<String> {
    rows.iter()
        .skip_while(|row| {
            row.get("col_name").and_then(Value::as_str) != Some("# Detailed Table Information")
        })
        .find(|row| row.get("col_name").and_then(Value::as_str) == Some("Comment"))
        .and_then(|row| row.get("data_type").and_then(Value::as_str))
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string)
}
