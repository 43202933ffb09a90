// tidemark-core/src/infrastructure/adapters/snowflake.rs
//
// Snowflake SQL API v2. Every call is a statement; results come back as
// string cells described by `resultSetMetaData.rowType`, possibly split over
// several partitions.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, NaiveDate, NaiveTime};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::project::{SnowflakeConfig, SnowflakeTokenType};
use crate::error::TidemarkError;
use crate::infrastructure::adapters::common::{
    ScalarKind, api_error, profile_from_result, profile_query, quote_ident, read_json,
    typed_value, value_as_u64,
};
use crate::infrastructure::error::{DatabaseError, InfrastructureError};
use crate::ports::{ColumnProfile, ColumnSchema, Connector, IdentifierCase, QueryResult, Row};

const BACKEND: &str = "snowflake";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Snowflake refuses key-pair JWTs living longer than one hour.
const JWT_LIFETIME_SECS: i64 = 3600;

pub struct SnowflakeConnector {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    /// Native (uppercase unless quoted) database name.
    database: String,
    warehouse: Option<String>,
    role: Option<String>,
}

enum Credentials {
    Token {
        token: String,
        token_type: SnowflakeTokenType,
    },
    KeyPair(KeyPair),
}

/// Signs short-lived `KEYPAIR_JWT` bearer tokens with the user's RSA key.
struct KeyPair {
    /// `ACCOUNT.USER`
    subject: String,
    /// `ACCOUNT.USER.SHA256:<base64 public key fingerprint>`
    issuer: String,
    key: EncodingKey,
}

#[derive(Debug, Serialize)]
struct KeyPairClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    iat: i64,
    exp: i64,
}

impl KeyPair {
    fn load(config: &SnowflakeConfig, pem: &str) -> Result<Self, TidemarkError> {
        let private = match config
            .private_key_passphrase
            .as_deref()
            .filter(|p| !p.is_empty())
        {
            Some(passphrase) => RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase),
            None => RsaPrivateKey::from_pkcs8_pem(pem),
        }
        .map_err(|e| InfrastructureError::Auth(format!("invalid Snowflake private key: {e}")))?;

        let public_der = private
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| InfrastructureError::Auth(format!("invalid Snowflake public key: {e}")))?;
        let fingerprint = BASE64.encode(Sha256::digest(public_der.as_bytes()));

        let pkcs1 = private
            .to_pkcs1_der()
            .map_err(|e| InfrastructureError::Auth(format!("invalid Snowflake private key: {e}")))?;

        let subject = format!(
            "{}.{}",
            jwt_account(&config.account_id),
            config.user.to_uppercase()
        );
        Ok(Self {
            issuer: format!("{subject}.SHA256:{fingerprint}"),
            subject,
            key: EncodingKey::from_rsa_der(pkcs1.as_bytes()),
        })
    }

    fn token(&self, now: i64) -> Result<String, TidemarkError> {
        let claims = KeyPairClaims {
            iss: &self.issuer,
            sub: &self.subject,
            iat: now,
            exp: now + JWT_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| InfrastructureError::Auth(format!("could not sign JWT: {e}")).into())
    }
}

/// JWT account part: uppercase locator without region or cloud suffix,
/// `org.account` spelled `ORG-ACCOUNT`.
fn jwt_account(account_id: &str) -> String {
    let account = account_id
        .trim()
        .trim_end_matches(".snowflakecomputing.com")
        .to_uppercase();
    match account.split_once('.') {
        Some((locator, _region)) => locator.to_string(),
        None => account,
    }
}

/// Unquoted names are stored uppercase by Snowflake; a `"quoted"` name is
/// taken verbatim.
fn native_database(configured: &str) -> String {
    let trimmed = configured.trim();
    match trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(quoted) => quoted.to_string(),
        None => IdentifierCase::Upper.apply(trimmed),
    }
}

#[derive(Debug, Clone)]
struct RowType {
    name: String,
    kind: String,
    scale: i64,
}

impl SnowflakeConnector {
    /// Builds the client without touching the network. A relative
    /// `private_key_path` resolves against `project_dir`.
    pub fn new(config: &SnowflakeConfig, project_dir: &Path) -> Result<Self, TidemarkError> {
        let credentials = match (&config.private_key_path, &config.token) {
            (Some(path), _) => {
                let pem = std::fs::read_to_string(project_dir.join(path))?;
                Credentials::KeyPair(KeyPair::load(config, &pem)?)
            }
            (None, Some(token)) => Credentials::Token {
                token: token.clone(),
                token_type: config.token_type,
            },
            (None, None) if config.password.is_some() => {
                return Err(InfrastructureError::Auth(
                    "password login is not available over the Snowflake SQL API, \
                     configure private_key_path or token"
                        .to_string(),
                )
                .into());
            }
            (None, None) => {
                return Err(InfrastructureError::Auth(
                    "no private_key_path or token configured".to_string(),
                )
                .into());
            }
        };

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: format!("https://{}.snowflakecomputing.com", config.account_id),
            credentials,
            database: native_database(&config.database),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
        })
    }

    pub async fn connect(config: &SnowflakeConfig, project_dir: &Path) -> Result<Self, TidemarkError> {
        let connector = Self::new(config, project_dir)?;
        // Fails fast on a bad token or account.
        connector.statement("SELECT 1", &[]).await?;
        info!(account = %config.account_id, user = %config.user, "Snowflake session ready");
        Ok(connector)
    }

    fn request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, TidemarkError> {
        let (token, token_type) = match &self.credentials {
            Credentials::Token { token, token_type } => {
                (token.clone(), token_type.header_value())
            }
            // fresh JWT per call, a sync can outlive one token
            Credentials::KeyPair(pair) => {
                (pair.token(chrono::Utc::now().timestamp())?, "KEYPAIR_JWT")
            }
        };
        Ok(builder
            .bearer_auth(token)
            .header("X-Snowflake-Authorization-Token-Type", token_type)
            .header("Accept", "application/json"))
    }

    /// Runs one statement with `?` bindings and returns every partition.
    async fn statement(&self, sql: &str, binds: &[&str]) -> Result<QueryResult, TidemarkError> {
        debug!(sql, "snowflake statement");
        let mut body = json!({
            "statement": sql,
            "database": self.database,
        });
        if let Some(warehouse) = &self.warehouse {
            body["warehouse"] = json!(warehouse);
        }
        if let Some(role) = &self.role {
            body["role"] = json!(role);
        }
        if !binds.is_empty() {
            let bindings: serde_json::Map<String, Value> = binds
                .iter()
                .enumerate()
                .map(|(i, v)| ((i + 1).to_string(), json!({"type": "TEXT", "value": v})))
                .collect();
            body["bindings"] = Value::Object(bindings);
        }

        let url = format!("{}/api/v2/statements", self.base_url);
        let response = self
            .request(self.http.post(&url))?
            .json(&body)
            .send()
            .await?;
        let mut result = read_json(response, BACKEND).await?;

        // 202: still running, poll the handle
        while result.get("resultSetMetaData").is_none() {
            let handle = result
                .get("statementHandle")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    TidemarkError::from(InfrastructureError::Database(
                        DatabaseError::StatementIncomplete {
                            backend: BACKEND,
                            state: result
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or("no statement handle")
                                .to_string(),
                        },
                    ))
                })?
                .to_string();
            tokio::time::sleep(POLL_INTERVAL).await;
            let response = self
                .request(self.http.get(format!("{url}/{handle}")))?
                .send()
                .await?;
            result = read_json(response, BACKEND).await?;
        }

        let row_types = row_types(&result);
        let mut data: Vec<Value> = result
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let partitions = result
            .pointer("/resultSetMetaData/partitionInfo")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(1);
        if partitions > 1 {
            let handle = result
                .get("statementHandle")
                .and_then(Value::as_str)
                .ok_or_else(|| api_error(BACKEND, "partitioned result without handle"))?;
            for partition in 1..partitions {
                let response = self
                    .request(self.http.get(format!("{url}/{handle}")))?
                    .query(&[("partition", partition)])
                    .send()
                    .await?;
                let page = read_json(response, BACKEND).await?;
                if let Some(rows) = page.get("data").and_then(Value::as_array) {
                    data.extend(rows.iter().cloned());
                }
            }
        }

        let columns = row_types.iter().map(|t| t.name.clone()).collect();
        let rows = data
            .iter()
            .map(|cells| decode_row(&row_types, cells))
            .collect();
        Ok(QueryResult::new(columns, rows))
    }

    async fn first_column(&self, sql: &str, binds: &[&str]) -> Result<Vec<String>, TidemarkError> {
        let result = self.statement(sql, binds).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.values().next().and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    fn information_schema(&self, view: &str) -> String {
        format!("{}.INFORMATION_SCHEMA.{view}", quote_ident(&self.database, '"'))
    }

    fn table_ref(&self, schema: &str, table: &str) -> String {
        format!(
            "{}.{}.{}",
            quote_ident(&self.database, '"'),
            quote_ident(schema, '"'),
            quote_ident(table, '"')
        )
    }
}

#[async_trait]
impl Connector for SnowflakeConnector {
    fn database_name(&self) -> String {
        self.database.clone()
    }

    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::Upper
    }

    async fn list_schemas(&self) -> Result<Vec<String>, TidemarkError> {
        self.first_column(
            &format!(
                "SELECT SCHEMA_NAME FROM {} WHERE SCHEMA_NAME <> 'INFORMATION_SCHEMA' ORDER BY 1",
                self.information_schema("SCHEMATA")
            ),
            &[],
        )
        .await
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, TidemarkError> {
        self.first_column(
            &format!(
                "SELECT TABLE_NAME FROM {} WHERE TABLE_SCHEMA = ? ORDER BY 1",
                self.information_schema("TABLES")
            ),
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
        let result = self
            .statement(
                &format!(
                    "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE FROM {} \
                     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
                    self.information_schema("COLUMNS")
                ),
                &[schema, table],
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .map(|row| {
                let mut cells = row.values().map(|v| v.as_str().unwrap_or_default());
                let name = cells.next().unwrap_or_default();
                let data_type = cells.next().unwrap_or_default();
                let nullable = cells.next().unwrap_or("YES") == "YES";
                ColumnSchema::new(name, data_type, nullable)
            })
            .collect())
    }

    async fn fetch_row_count(&self, schema: &str, table: &str) -> Result<u64, TidemarkError> {
        let result = self
            .statement(
                &format!("SELECT COUNT(*) FROM {}", self.table_ref(schema, table)),
                &[],
            )
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
        Ok(self.statement(&sql, &[]).await?.rows)
    }

    async fn fetch_table_description(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<String>, TidemarkError> {
        let comments = self
            .first_column(
                &format!(
                    "SELECT COMMENT FROM {} WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
                    self.information_schema("TABLES")
                ),
                &[schema, table],
            )
            .await?;
        Ok(comments.into_iter().find(|c| !c.trim().is_empty()))
    }

    async fn fetch_column_profile(
        &self,
        schema: &str,
        table: &str,
        column: &ColumnSchema,
    ) -> Result<ColumnProfile, TidemarkError> {
        let sql = profile_query(
            &self.table_ref(schema, table),
            &quote_ident(&column.name, '"'),
            column.is_orderable(),
            "VARCHAR",
        );
        profile_from_result(&self.statement(&sql, &[]).await?)
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
        self.statement(sql, &[]).await
    }
}

fn row_types(result: &Value) -> Vec<RowType> {
    result
        .pointer("/resultSetMetaData/rowType")
        .and_then(Value::as_array)
        .map(|types| {
            types
                .iter()
                .map(|t| RowType {
                    name: t["name"].as_str().unwrap_or_default().to_string(),
                    kind: t["type"].as_str().unwrap_or("text").to_ascii_lowercase(),
                    scale: t["scale"].as_i64().unwrap_or(0),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn decode_row(types: &[RowType], cells: &Value) -> Row {
    let cells = cells.as_array().cloned().unwrap_or_default();
    types
        .iter()
        .zip(cells)
        .map(|(t, cell)| (t.name.clone(), decode_cell(t, cell.as_str())))
        .collect()
}

/// Snowflake sends temporal values as epoch offsets; render them readable.
fn decode_cell(t: &RowType, raw: Option<&str>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    let temporal = match t.kind.as_str() {
        "date" => raw
            .parse::<i32>()
            .ok()
            .and_then(|days| NaiveDate::from_num_days_from_ce_opt(days + 719_163))
            .map(|d| d.to_string()),
        "time" => epoch_parts(raw).and_then(|(secs, nanos)| {
            NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, nanos).map(|t| t.to_string())
        }),
        "timestamp_ntz" | "timestamp_ltz" | "timestamp_tz" => {
            // timestamp_tz carries "<epoch> <offset minutes>"
            let epoch = raw.split_whitespace().next().unwrap_or(raw);
            epoch_parts(epoch).and_then(|(secs, nanos)| {
                DateTime::from_timestamp(secs, nanos).map(|ts| ts.naive_utc().to_string())
            })
        }
        _ => None,
    };
    if let Some(rendered) = temporal {
        return Value::String(rendered);
    }

    let kind = match t.kind.as_str() {
        "fixed" if t.scale == 0 => ScalarKind::Integer,
        "real" => ScalarKind::Float,
        "boolean" => ScalarKind::Boolean,
        _ => ScalarKind::Text,
    };
    typed_value(Some(raw), kind)
}

/// `"1700000000.123456789"` -> `(1700000000, 123456789)`
fn epoch_parts(raw: &str) -> Option<(i64, u32)> {
    let (secs, frac) = raw.split_once('.').unwrap_or((raw, "0"));
    let secs = secs.parse::<i64>().ok()?;
    let frac = format!("{frac:0<9}");
    let nanos = frac.get(..9)?.parse::<u32>().ok()?;
    Some((secs, nanos))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn row_type(kind: &str, scale: i64) -> RowType {
        RowType {
            name: "C".into(),
            kind: kind.into(),
            scale,
        }
    }

    #[test]
    fn test_decode_numbers() {
        assert_eq!(decode_cell(&row_type("fixed", 0), Some("42")), json!(42));
        assert_eq!(decode_cell(&row_type("fixed", 2), Some("4.20")), json!("4.20"));
        assert_eq!(decode_cell(&row_type("real", 0), Some("0.5")), json!(0.5));
        assert_eq!(decode_cell(&row_type("boolean", 0), Some("true")), json!(true));
        assert_eq!(decode_cell(&row_type("text", 0), None), Value::Null);
    }

    #[test]
    fn test_decode_temporal() {
        assert_eq!(
            decode_cell(&row_type("date", 0), Some("19724")),
            json!("2024-01-02")
        );
        assert_eq!(
            decode_cell(&row_type("timestamp_ntz", 9), Some("1704164645.000000000")),
            json!("2024-01-02 03:04:05")
        );
        assert_eq!(
            decode_cell(&row_type("timestamp_tz", 9), Some("1704164645.5 1440")),
            json!("2024-01-02 03:04:05.500")
        );
        assert_eq!(
            decode_cell(&row_type("time", 9), Some("3600.000000000")),
            json!("01:00:00")
        );
    }

    fn config(yaml: &str) -> SnowflakeConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn fixtures() -> &'static Path {
        Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures"))
    }

    const BASE: &str = "account_id: xy12345.us-east-1\nuser: etl_bot\n";

    #[test]
    fn test_database_name_uses_native_case() -> Result<()> {
        let connector = SnowflakeConnector::new(
            &config(&format!("{BASE}database: analytics\ntoken: t\n")),
            fixtures(),
        )?;
        assert_eq!(connector.database_name(), "ANALYTICS");
        assert_eq!(
            connector.information_schema("SCHEMATA"),
            r#""ANALYTICS".INFORMATION_SCHEMA.SCHEMATA"#
        );
        assert_eq!(connector.table_ref("PUBLIC", "USERS"), r#""ANALYTICS"."PUBLIC"."USERS""#);

        // quoted names are case-sensitive in Snowflake
        let quoted = SnowflakeConnector::new(
            &config(&format!("{BASE}database: '\"MixedCase\"'\ntoken: t\n")),
            fixtures(),
        )?;
        assert_eq!(quoted.database_name(), "MixedCase");
        Ok(())
    }

    #[test]
    fn test_jwt_account() {
        assert_eq!(jwt_account("xy12345.us-east-1"), "XY12345");
        assert_eq!(jwt_account("xy12345"), "XY12345");
        assert_eq!(jwt_account("acme-prod.snowflakecomputing.com"), "ACME-PROD");
    }

    fn decode_claims(token: &str) -> Result<Value> {
        let public = std::fs::read(fixtures().join("snowflake_key.pub"))?;
        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let data = jsonwebtoken::decode::<Value>(
            token,
            &jsonwebtoken::DecodingKey::from_rsa_pem(&public)?,
            &validation,
        )?;
        Ok(data.claims)
    }

    #[test]
    fn test_key_pair_jwt_claims() -> Result<()> {
        let connector = SnowflakeConnector::new(
            &config(&format!(
                "{BASE}database: analytics\nprivate_key_path: snowflake_key.p8\n"
            )),
            fixtures(),
        )?;
        let Credentials::KeyPair(pair) = &connector.credentials else {
            panic!("expected key-pair credentials");
        };

        let now = chrono::Utc::now().timestamp();
        let claims = decode_claims(&pair.token(now)?)?;
        assert_eq!(claims["sub"], json!("XY12345.ETL_BOT"));
        // openssl rsa -pubout -outform DER | sha256 | base64
        assert_eq!(
            claims["iss"],
            json!("XY12345.ETL_BOT.SHA256:7yj5onALA8PYpT+DWVSkz3nkwmlAl6mPKsivqXYrILY=")
        );
        assert_eq!(claims["exp"], json!(now + JWT_LIFETIME_SECS));
        Ok(())
    }

    #[test]
    fn test_encrypted_key_needs_passphrase() -> Result<()> {
        let yaml = format!(
            "{BASE}database: analytics\nprivate_key_path: snowflake_key_encrypted.p8\n"
        );
        assert!(SnowflakeConnector::new(&config(&yaml), fixtures()).is_err());

        let unlocked = SnowflakeConnector::new(
            &config(&format!("{yaml}private_key_passphrase: tidemark\n")),
            fixtures(),
        )?;
        let Credentials::KeyPair(pair) = &unlocked.credentials else {
            panic!("expected key-pair credentials");
        };
        let claims = decode_claims(&pair.token(chrono::Utc::now().timestamp())?)?;
        assert!(claims["iss"].as_str().unwrap().ends_with("7yj5onALA8PYpT+DWVSkz3nkwmlAl6mPKsivqXYrILY="));
        Ok(())
    }

    #[test]
    fn test_password_only_is_a_clear_error() {
        let err = SnowflakeConnector::new(
            &config(&format!("{BASE}database: analytics\npassword: hunter2\n")),
            fixtures(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("private_key_path"), "{err}");
    }

    #[test]
    fn test_decode_row_keeps_column_order() {
        let types = vec![
            RowType { name: "ID".into(), kind: "fixed".into(), scale: 0 },
            RowType { name: "NAME".into(), kind: "text".into(), scale: 0 },
        ];
        let row = decode_row(&types, &json!(["1", "Alice"]));
        let keys: Vec<_> = row.keys().cloned().collect();
        assert_eq!(keys, ["ID", "NAME"]);
        assert_eq!(row["ID"], json!(1));
    }
}
