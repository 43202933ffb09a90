// tidemark-core/src/infrastructure/adapters/bigquery.rs
//
// BigQuery over its REST API. Metadata comes from datasets/tables endpoints,
// counts, previews and SQL from jobs.query (views have no tabledata).

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::project::BigQueryConfig;
use crate::error::TidemarkError;
use crate::infrastructure::adapters::common::{
    ScalarKind, api_error, profile_from_result, profile_query, read_json, typed_value,
    value_as_u64,
};
use crate::infrastructure::error::InfrastructureError;
use crate::ports::{ColumnProfile, ColumnSchema, Connector, QueryResult, Row};

const BACKEND: &str = "bigquery";
const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct BigQueryConnector {
    http: reqwest::Client,
    token: String,
    project_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl BigQueryConnector {
    pub async fn connect(config: &BigQueryConfig, project_dir: &Path) -> Result<Self, TidemarkError> {
        let http = reqwest::Client::new();
        let token = match &config.access_token {
            Some(token) if !token.trim().is_empty() => token.clone(),
            _ => {
                let key = load_service_account(config, project_dir)?;
                exchange_service_account(&http, &key).await?
            }
        };
        info!(project = %config.project_id, "BigQuery client authenticated");
        Ok(Self {
            http,
            token,
            project_id: config.project_id.clone(),
            location: config.location.clone(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, TidemarkError> {
        let response = self
            .http
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        read_json(response, BACKEND).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, TidemarkError> {
        let response = self
            .http
            .post(format!("{API_BASE}{path}"))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        read_json(response, BACKEND).await
    }

    /// Follows `nextPageToken` and collects `items_key[*].pointer`.
    async fn list_paged(
        &self,
        path: &str,
        items_key: &str,
        pointer: &str,
    ) -> Result<Vec<String>, TidemarkError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("maxResults", "1000".to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page = self.get(path, &query).await?;
            if let Some(items) = page.get(items_key).and_then(Value::as_array) {
                names.extend(
                    items
                        .iter()
                        .filter_map(|item| item.pointer(pointer).and_then(Value::as_str))
                        .map(str::to_string),
                );
            }
            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        names.sort();
        Ok(names)
    }

    async fn table_resource(&self, dataset: &str, table: &str) -> Result<Value, TidemarkError> {
        self.get(
            &format!(
                "/projects/{}/datasets/{dataset}/tables/{table}",
                self.project_id
            ),
            &[],
        )
        .await
    }

    fn table_ref(&self, dataset: &str, table: &str) -> String {
        format!("`{}.{dataset}.{table}`", self.project_id)
    }

    fn query_body(&self, sql: &str, dry_run: bool) -> Value {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "dryRun": dry_run,
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }
        body
    }

    async fn run_query(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
        debug!(sql, "bigquery query");
        let path = format!("/projects/{}/queries", self.project_id);
        let mut response = self.post(&path, &self.query_body(sql, false)).await?;

        let job_id = response
            .pointer("/jobReference/jobId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut job_query = Vec::new();
        if let Some(location) = response
            .pointer("/jobReference/location")
            .and_then(Value::as_str)
        {
            job_query.push(("location", location.to_string()));
        }
        let results_path = |job_id: &Option<String>| -> Result<String, TidemarkError> {
            job_id
                .as_ref()
                .map(|id| format!("{path}/{id}"))
                .ok_or_else(|| api_error(BACKEND, "query response has no job id"))
        };

        while !response["jobComplete"].as_bool().unwrap_or(false) {
            tokio::time::sleep(POLL_INTERVAL).await;
            response = self.get(&results_path(&job_id)?, &job_query).await?;
        }

        let mut pages = ResultPages::new(&response);
        let mut next = pages.absorb(&response);
        while let Some(token) = next {
            let mut query = job_query.clone();
            query.push(("pageToken", token));
            let page = self.get(&results_path(&job_id)?, &query).await?;
            next = pages.absorb(&page);
        }
        Ok(pages.finish())
    }
}

/// Rows of one query, gathered across `pageToken` pages.
struct ResultPages {
    fields: Vec<Field>,
    rows: Vec<Row>,
}

impl ResultPages {
    /// The schema comes with the first (completed) response.
    fn new(first: &Value) -> Self {
        Self {
            fields: schema_fields(first),
            rows: Vec::new(),
        }
    }

    /// Adds a page's rows; returns the token of the next page, if any.
    fn absorb(&mut self, page: &Value) -> Option<String> {
        self.rows.extend(decode_rows(&self.fields, page));
        page.get("pageToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn finish(self) -> QueryResult {
        let columns = self.fields.into_iter().map(|f| f.name).collect();
        QueryResult::new(columns, self.rows)
    }
}

/// A dry run without `totalBytesProcessed` cannot be priced, so it is an
/// error rather than a free query.
fn dry_run_total(response: &Value) -> Result<u64, TidemarkError> {
    response
        .get("totalBytesProcessed")
        .and_then(value_as_u64)
        .ok_or_else(|| api_error(BACKEND, "dry run returned no totalBytesProcessed"))
}

#[async_trait]
impl Connector for BigQueryConnector {
    fn database_name(&self) -> String {
        self.project_id.clone()
    }

    async fn list_schemas(&self) -> Result<Vec<String>, TidemarkError> {
        self.list_paged(
            &format!("/projects/{}/datasets", self.project_id),
            "datasets",
            "/datasetReference/datasetId",
        )
        .await
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, TidemarkError> {
        self.list_paged(
            &format!("/projects/{}/datasets/{schema}/tables", self.project_id),
            "tables",
            "/tableReference/tableId",
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
        let resource = self.table_resource(schema, table).await?;
        Ok(schema_fields(&resource)
            .into_iter()
            .map(|f| ColumnSchema::new(f.name, f.field_type, f.mode != "REQUIRED"))
            .collect())
    }

    async fn fetch_row_count(&self, schema: &str, table: &str) -> Result<u64, TidemarkError> {
        let result = self
            .run_query(&format!("SELECT COUNT(*) AS n FROM {}", self.table_ref(schema, table)))
            .await?;
        Ok(result
            .rows
            .first()
            .and_then(|row| row.get("n"))
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
        Ok(self.run_query(&sql).await?.rows)
    }

    async fn fetch_table_description(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<String>, TidemarkError> {
        let resource = self.table_resource(schema, table).await?;
        Ok(resource
            .get("description")
            .and_then(Value::as_str)
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string))
    }

    async fn fetch_column_profile(
        &self,
        schema: &str,
        table: &str,
        column: &ColumnSchema,
    ) -> Result<ColumnProfile, TidemarkError> {
        let sql = profile_query(
            &self.table_ref(schema, table),
            &format!("`{}`", column.name),
            column.is_orderable(),
            "STRING",
        );
        profile_from_result(&self.run_query(&sql).await?)
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
        self.run_query(sql).await
    }

    async fn dry_run_bytes(&self, sql: &str) -> Result<Option<u64>, TidemarkError> {
        let response = self
            .post(
                &format!("/projects/{}/queries", self.project_id),
                &self.query_body(sql, true),
            )
            .await?;
        let bytes = dry_run_total(&response)?;
        debug!(bytes, "bigquery dry run");
        Ok(Some(bytes))
    }
}

// --- AUTH ---

fn load_service_account(
    config: &BigQueryConfig,
    project_dir: &Path,
) -> Result<ServiceAccountKey, TidemarkError> {
    if let Some(json) = &config.credentials_json {
        return Ok(serde_json::from_value(json.clone())?);
    }
    let path = config
        .credentials_path
        .clone()
        .filter(|p| !p.trim().is_empty())
        .or_else(|| std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok())
        .ok_or_else(|| {
            InfrastructureError::Auth(
                "no access_token, credentials_json, credentials_path or GOOGLE_APPLICATION_CREDENTIALS"
                    .to_string(),
            )
        })?;
    let raw = std::fs::read_to_string(project_dir.join(path))?;
    Ok(serde_json::from_str(&raw)?)
}

/// OAuth2 JWT-bearer grant: sign an RS256 assertion with the service
/// account key and trade it for an access token.
async fn exchange_service_account(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
) -> Result<String, TidemarkError> {
    let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        iss: &key.client_email,
        scope: SCOPE,
        aud: token_uri,
        iat: now,
        exp: now + 3600,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| InfrastructureError::Auth(format!("invalid service account key: {e}")))?;
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
        .map_err(|e| InfrastructureError::Auth(format!("could not sign JWT: {e}")))?;

    let response = http
        .post(token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await?;
    let body = read_json(response, BACKEND).await?;
    body.get("access_token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| InfrastructureError::Auth("token endpoint returned no access_token".into()).into())
}

// --- DECODING ---

#[derive(Debug, Clone)]
struct Field {
    name: String,
    field_type: String,
    mode: String,
}

fn schema_fields(resource: &Value) -> Vec<Field> {
    resource
        .pointer("/schema/fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .map(|f| Field {
                    name: f["name"].as_str().unwrap_or_default().to_string(),
                    field_type: f["type"].as_str().unwrap_or("STRING").to_string(),
                    mode: f["mode"].as_str().unwrap_or("NULLABLE").to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_kind(field_type: &str) -> ScalarKind {
    match field_type {
        "INTEGER" | "INT64" => ScalarKind::Integer,
        "FLOAT" | "FLOAT64" => ScalarKind::Float,
        "BOOLEAN" | "BOOL" => ScalarKind::Boolean,
        _ => ScalarKind::Text,
    }
}

/// `rows[*].f[*].v` to maps keyed by field name. Repeated and record cells
/// are kept as compact JSON text.
fn decode_rows(fields: &[Field], data: &Value) -> Vec<Row> {
    let Some(rows) = data.get("rows").and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            let cells = row["f"].as_array().cloned().unwrap_or_default();
            let mut record = Row::new();
            for (field, cell) in fields.iter().zip(cells) {
                let value = match &cell["v"] {
                    Value::Null => Value::Null,
                    Value::String(raw) => typed_value(Some(raw), scalar_kind(&field.field_type)),
                    nested => Value::String(nested.to_string()),
                };
                record.insert(field.name.clone(), value);
            }
            record
        })
        .collect()
}
