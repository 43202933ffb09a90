// src/domain/project/configuration.rs

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use crate::domain::error::DomainError;
use crate::domain::filter::TablePattern;
use crate::ports::IdentifierCase;

/// Content generator run for every synced table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccessorKind {
    Columns,
    Preview,
    Description,
    Profiling,
}

impl AccessorKind {
    pub fn all() -> Vec<AccessorKind> {
        vec![
            AccessorKind::Columns,
            AccessorKind::Preview,
            AccessorKind::Description,
            AccessorKind::Profiling,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessorKind::Columns => "columns",
            AccessorKind::Preview => "preview",
            AccessorKind::Description => "description",
            AccessorKind::Profiling => "profiling",
        }
    }

    /// Output file written under `table={table}/`.
    pub fn filename(self) -> String {
        format!("{}.md", self.as_str())
    }

    pub fn template_name(self) -> String {
        format!("{}.md.j2", self.as_str())
    }
}

impl fmt::Display for AccessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "columns" => Ok(AccessorKind::Columns),
            "preview" => Ok(AccessorKind::Preview),
            "description" => Ok(AccessorKind::Description),
            "profiling" => Ok(AccessorKind::Profiling),
            other => Err(DomainError::UnknownAccessor(other.to_string())),
        }
    }
}

impl TryFrom<String> for AccessorKind {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccessorKind> for String {
    fn from(kind: AccessorKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    BigQuery,
    Snowflake,
    Databricks,
    Postgres,
    Redshift,
    DuckDB,
}

impl DatabaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseType::BigQuery => "bigquery",
            DatabaseType::Snowflake => "snowflake",
            DatabaseType::Databricks => "databricks",
            DatabaseType::Postgres => "postgres",
            DatabaseType::Redshift => "redshift",
            DatabaseType::DuckDB => "duckdb",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- BACKEND CONNECTION PARAMETERS ---

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BigQueryConfig {
    pub project_id: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
    /// USD ceiling enforced by the dry-run cost guard.
    #[serde(default = "default_max_query_cost")]
    pub max_query_cost: f64,
    #[serde(default)]
    pub credentials_path: Option<String>,
    #[serde(default, deserialize_with = "deserialize_credentials_json")]
    pub credentials_json: Option<serde_json::Value>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SnowflakeTokenType {
    #[default]
    ProgrammaticAccessToken,
    Oauth,
}

impl SnowflakeTokenType {
    /// Value of the `X-Snowflake-Authorization-Token-Type` header.
    pub fn header_value(self) -> &'static str {
        match self {
            SnowflakeTokenType::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
            SnowflakeTokenType::Oauth => "OAUTH",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SnowflakeConfig {
    pub account_id: String,
    pub user: String,
    pub database: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_type: SnowflakeTokenType,
    /// PKCS#8 PEM key registered as the user's RSA public key. Takes
    /// precedence over `token`.
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
    /// Accepted for compatibility; the SQL API has no password login.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabricksConfig {
    pub server_hostname: String,
    pub http_path: String,
    pub access_token: String,
    #[serde(default = "default_databricks_catalog")]
    pub catalog: String,
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default = "default_postgres_sslmode")]
    pub sslmode: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedshiftConfig {
    pub host: String,
    #[serde(default = "default_redshift_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default = "default_redshift_sslmode")]
    pub sslmode: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DuckDBConfig {
    #[serde(default = "default_duckdb_path")]
    pub path: String,
}

/// Closed set of supported warehouses, keyed on the `type` field.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    BigQuery(BigQueryConfig),
    Snowflake(SnowflakeConfig),
    Databricks(DatabricksConfig),
    Postgres(PostgresConfig),
    Redshift(RedshiftConfig),
    DuckDB(DuckDBConfig),
}

impl BackendConfig {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            BackendConfig::BigQuery(_) => DatabaseType::BigQuery,
            BackendConfig::Snowflake(_) => DatabaseType::Snowflake,
            BackendConfig::Databricks(_) => DatabaseType::Databricks,
            BackendConfig::Postgres(_) => DatabaseType::Postgres,
            BackendConfig::Redshift(_) => DatabaseType::Redshift,
            BackendConfig::DuckDB(_) => DatabaseType::DuckDB,
        }
    }

    /// Single schema/dataset the connection is restricted to, if any.
    pub fn schema_filter(&self) -> Option<&str> {
        match self {
            BackendConfig::BigQuery(c) => c.dataset_id.as_deref(),
            BackendConfig::Snowflake(c) => c.schema.as_deref(),
            BackendConfig::Databricks(c) => c.schema.as_deref(),
            BackendConfig::Postgres(c) => c.schema_name.as_deref(),
            BackendConfig::Redshift(c) => c.schema_name.as_deref(),
            BackendConfig::DuckDB(_) => None,
        }
        .filter(|s| !s.trim().is_empty())
    }

    pub fn identifier_case(&self) -> IdentifierCase {
        match self {
            BackendConfig::Snowflake(_) => IdentifierCase::Upper,
            _ => IdentifierCase::AsIs,
        }
    }
}

// --- CONNECTION ---

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct DatabaseConfig {
    #[validate(length(min = 1, message = "Connection name cannot be empty"))]
    pub name: String,

    #[validate(custom(function = "validate_patterns"))]
    #[serde(default)]
    pub include: Vec<String>,

    #[validate(custom(function = "validate_patterns"))]
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "AccessorKind::all")]
    pub accessors: Vec<AccessorKind>,

    #[validate(range(min = 1, message = "preview_limit must be at least 1"))]
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,

    #[serde(flatten)]
    pub backend: BackendConfig,
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DatabaseType {
        self.backend.db_type()
    }

    pub fn schema_filter(&self) -> Option<&str> {
        self.backend.schema_filter()
    }

    /// Configured accessors, de-duplicated, in declaration order.
    pub fn accessor_kinds(&self) -> Vec<AccessorKind> {
        let mut seen = HashSet::new();
        self.accessors
            .iter()
            .copied()
            .filter(|a| seen.insert(*a))
            .collect()
    }
}

// --- SLACK / SERVER ---

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    /// Verifies `X-Slack-Signature` on every Slack request.
    pub signing_secret: String,
    #[serde(default = "default_post_message_url")]
    pub post_message_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Connection exposed by the Query Service; first configured when unset.
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            connection: None,
            port: default_server_port(),
        }
    }
}

// --- PROJECT ---

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct ProjectConfig {
    #[validate(length(min = 1, message = "project_name cannot be empty"))]
    pub project_name: String,

    #[validate(nested)]
    #[validate(custom(function = "validate_unique_names"))]
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,

    #[serde(default)]
    pub slack: Option<SlackConfig>,

    #[serde(default)]
    pub server: ServerConfig,

    /// Output base for the `databases` provider, relative to the project root.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_output_dir() -> String {
    "databases".to_string()
}

impl ProjectConfig {
    pub fn find_database(&self, name: &str) -> Result<&DatabaseConfig, DomainError> {
        self.databases
            .iter()
            .find(|db| db.name == name)
            .ok_or_else(|| DomainError::ConnectionNotFound(name.to_string()))
    }

    /// Named connection, or the first configured one.
    pub fn query_database(&self, name: Option<&str>) -> Result<&DatabaseConfig, DomainError> {
        match name.or(self.server.connection.as_deref()) {
            Some(name) => self.find_database(name),
            None => self
                .databases
                .first()
                .ok_or_else(|| DomainError::ConnectionNotFound("<none configured>".to_string())),
        }
    }

    /// Same checks as `validate()` but surfaced as the first domain error.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let mut names = HashSet::new();
        for db in &self.databases {
            if !names.insert(db.name.as_str()) {
                return Err(DomainError::DuplicateConnection(db.name.clone()));
            }
            let case = db.backend.identifier_case();
            for pattern in db.include.iter().chain(db.exclude.iter()) {
                TablePattern::parse(pattern, case)?;
            }
        }
        Ok(())
    }
}

fn validate_unique_names(databases: &[DatabaseConfig]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for db in databases {
        if !seen.insert(db.name.as_str()) {
            let mut err = ValidationError::new("duplicate_connection");
            err.message = Some(format!("Connection '{}' is defined more than once", db.name).into());
            return Err(err);
        }
    }
    Ok(())
}

fn validate_patterns(patterns: &[String]) -> Result<(), ValidationError> {
    for pattern in patterns {
        if TablePattern::parse(pattern, IdentifierCase::AsIs).is_err() {
            let mut err = ValidationError::new("invalid_pattern");
            err.message = Some(format!("'{pattern}' is not a 'schema.table' pattern").into());
            return Err(err);
        }
    }
    Ok(())
}

/// Accepts either an inline mapping or a JSON document in a string.
fn deserialize_credentials_json<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => serde_json::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(obj @ serde_json::Value::Object(_)) => Ok(Some(obj)),
        Some(_) => Err(serde::de::Error::custom(
            "credentials_json must be a mapping or a JSON string",
        )),
    }
}

fn default_max_query_cost() -> f64 {
    1.0
}
fn default_databricks_catalog() -> String {
    "hive_metastore".to_string()
}
fn default_postgres_port() -> u16 {
    5432
}
fn default_postgres_sslmode() -> String {
    "prefer".to_string()
}
fn default_redshift_port() -> u16 {
    5439
}
fn default_redshift_sslmode() -> String {
    "require".to_string()
}
fn default_duckdb_path() -> String {
    ":memory:".to_string()
}
fn default_preview_limit() -> usize {
    10
}
fn default_post_message_url() -> String {
    "https://slack.com/api/chat.postMessage".to_string()
}
fn default_server_port() -> u16 {
    8005
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const YAML: &str = r#"
project_name: acme
databases:
  - name: local
    type: duckdb
    path: warehouse.duckdb
    include: ["main.*"]
  - name: bq
    type: bigquery
    project_id: acme-prod
    dataset_id: analytics
    credentials_json: '{"client_email": "sa@acme.iam", "private_key": "x"}'
    accessors: [columns, preview]
  - name: sf
    type: snowflake
    account_id: xy12345
    user: BOT
    database: ANALYTICS
    token: abc
"#;

    #[test]
    fn test_parse_tagged_backends() -> Result<()> {
        let config: ProjectConfig = serde_yaml::from_str(YAML)?;
        assert_eq!(config.databases.len(), 3);

        let local = &config.databases[0];
        assert_eq!(local.db_type(), DatabaseType::DuckDB);
        assert_eq!(local.accessors, AccessorKind::all());
        assert_eq!(local.preview_limit, 10);

        let bq = &config.databases[1];
        assert_eq!(bq.schema_filter(), Some("analytics"));
        assert_eq!(
            bq.accessor_kinds(),
            vec![AccessorKind::Columns, AccessorKind::Preview]
        );
        match &bq.backend {
            BackendConfig::BigQuery(c) => {
                assert_eq!(c.max_query_cost, 1.0);
                let creds = c
                    .credentials_json
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("credentials missing"))?;
                assert_eq!(creds["client_email"], "sa@acme.iam");
            }
            other => anyhow::bail!("unexpected backend {other:?}"),
        }

        let sf = &config.databases[2];
        assert_eq!(sf.backend.identifier_case(), IdentifierCase::Upper);
        assert_eq!(sf.schema_filter(), None);
        Ok(())
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let yaml = "project_name: p\ndatabases:\n  - name: x\n    type: oracle\n";
        assert!(serde_yaml::from_str::<ProjectConfig>(yaml).is_err());
    }

    #[test]
    fn test_unknown_accessor_is_rejected() {
        let yaml = "project_name: p\ndatabases:\n  - name: x\n    type: duckdb\n    accessors: [columns, lineage]\n";
        assert!(serde_yaml::from_str::<ProjectConfig>(yaml).is_err());
    }

    #[test]
    fn test_duplicate_names_fail_validation() -> Result<()> {
        let yaml = "project_name: p\ndatabases:\n  - {name: a, type: duckdb}\n  - {name: a, type: duckdb}\n";
        let config: ProjectConfig = serde_yaml::from_str(yaml)?;
        assert!(config.validate().is_err());
        assert!(matches!(
            config.check_invariants(),
            Err(DomainError::DuplicateConnection(name)) if name == "a"
        ));
        Ok(())
    }

    #[test]
    fn test_bad_pattern_fails_validation() -> Result<()> {
        let yaml = "project_name: p\ndatabases:\n  - {name: a, type: duckdb, exclude: [nodot]}\n";
        let config: ProjectConfig = serde_yaml::from_str(yaml)?;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_query_database_defaults_to_first() -> Result<()> {
        let config: ProjectConfig = serde_yaml::from_str(YAML)?;
        assert_eq!(config.query_database(None)?.name, "local");
        assert_eq!(config.query_database(Some("bq"))?.name, "bq");
        assert!(config.query_database(Some("nope")).is_err());
        Ok(())
    }
}
