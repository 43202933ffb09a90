// tidemark-core/src/infrastructure/adapters/common.rs
//
// Pieces shared by several connectors: identifier quoting, the profiling
// query, typed-string decoding for REST warehouses and HTTP error mapping.

use serde_json::Value;

use crate::error::TidemarkError;
use crate::infrastructure::error::DatabaseError;
use crate::ports::{ColumnProfile, QueryResult};

/// Quotes one identifier, doubling any embedded quote character.
pub fn quote_ident(ident: &str, quote: char) -> String {
    let doubled = format!("{quote}{quote}");
    format!("{quote}{}{quote}", ident.replace(quote, &doubled))
}

/// `'it''s'`
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// One-row profile of a column. Min/max are cast to `text_type` so every
/// backend returns them as strings.
pub fn profile_query(table_ref: &str, column_ref: &str, orderable: bool, text_type: &str) -> String {
    let (min, max) = if orderable {
        (
            format!("CAST(MIN({column_ref}) AS {text_type})"),
            format!("CAST(MAX({column_ref}) AS {text_type})"),
        )
    } else {
        ("NULL".to_string(), "NULL".to_string())
    };
    format!(
        "SELECT COUNT(*) - COUNT({column_ref}) AS null_count, \
         COUNT(DISTINCT {column_ref}) AS distinct_count, \
         {min} AS min_value, {max} AS max_value \
         FROM {table_ref}"
    )
}

pub fn profile_from_result(result: &QueryResult) -> Result<ColumnProfile, TidemarkError> {
    let row = result
        .rows
        .first()
        .ok_or_else(|| TidemarkError::InternalError("profiling query returned no row".into()))?;
    // Positional: some backends upper-case the aliases.
    let mut values = row.values();
    let null_count = values.next().and_then(value_as_u64).unwrap_or(0);
    let distinct_count = values.next().and_then(value_as_u64).unwrap_or(0);
    let min = values.next().and_then(value_as_string);
    let max = values.next().and_then(value_as_string);
    Ok(ColumnProfile {
        null_count,
        distinct_count,
        min,
        max,
    })
}

pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
            .or_else(|| n.as_f64().map(|v| v.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// How a REST warehouse's string-encoded cell should be surfaced in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Integer,
    Float,
    Boolean,
    Text,
}

pub fn typed_value(raw: Option<&str>, kind: ScalarKind) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    let parsed = match kind {
        ScalarKind::Integer => raw.parse::<i64>().ok().map(Value::from),
        ScalarKind::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        ScalarKind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        ScalarKind::Text => None,
    };
    parsed.unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Body of a successful response, or an `Api` error carrying the status and
/// the backend's message.
pub async fn read_json(
    response: reqwest::Response,
    backend: &'static str,
) -> Result<Value, TidemarkError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| error_message(&v))
            .unwrap_or(body);
        return Err(api_error(backend, format!("HTTP {status}: {detail}")));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

pub fn api_error(backend: &'static str, message: impl Into<String>) -> TidemarkError {
    TidemarkError::from(crate::infrastructure::error::InfrastructureError::Database(
        DatabaseError::Api {
            backend,
            message: message.into(),
        },
    ))
}

fn error_message(body: &Value) -> Option<String> {
    body.pointer("/error/message")
        .or_else(|| body.get("message"))
        .or_else(|| body.pointer("/status/error/message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
