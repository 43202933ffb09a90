// tidemark/src/server.rs
//
// HTTP front end of the Query Service: JSON endpoint + Slack hooks.

use axum::{
    Form, Json, Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock};
use tidemark_core::application::QueryRegistry;
use tidemark_core::domain::project::SlackConfig;
use tidemark_core::ports::Row;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::commands::query::result_table;
use crate::slack_signature::{self, SignatureCheck};

const SLACK_PREVIEW_ROWS: usize = 10;
/// Slash commands and events are small; anything bigger is not from Slack.
const MAX_SLACK_BODY: usize = 1024 * 1024;

static MENTION: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<@[A-Z0-9]+>").ok());

pub struct AppState {
    registry: QueryRegistry,
    slack: Option<SlackConfig>,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(registry: QueryRegistry, slack: Option<SlackConfig>) -> Self {
        Self {
            registry,
            slack,
            http: reqwest::Client::new(),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let slack = Router::new()
        .route("/slack/command", post(slack_command))
        .route("/slack/app_mention", post(slack_app_mention))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            verify_slack_request,
        ));

    Router::new()
        .route("/", get(health_check).post(health_check))
        .route("/execute_sql", post(execute_sql))
        .merge(slack)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// --- JSON API ---

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub sql: String,
    #[serde(default)]
    pub connection: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub data: Vec<Row>,
    pub row_count: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn execute_sql(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state
        .registry
        .execute(&request.sql, request.connection.as_deref(), None)
        .await
    {
        Ok(result) => Ok(Json(ExecuteResponse {
            data: result.rows,
            row_count: result.row_count,
            columns: result.columns,
        })),
        Err(e) if e.is_cost_rejection() => {
            warn!(error = %e, "Query rejected by cost guard");
            Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    detail: e.to_string(),
                }),
            ))
        }
        Err(e) => {
            warn!(error = %e, "Query failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    detail: format!("Query execution failed: {e}"),
                }),
            ))
        }
    }
}

// --- SLACK ---

fn reject(status: StatusCode, detail: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            detail: detail.to_string(),
        }),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Slack routes only: the signature covers the raw body, so it is checked
/// here before any extractor parses it.
async fn verify_slack_request(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(slack) = &state.slack else {
        return reject(StatusCode::BAD_REQUEST, "Slack is not configured");
    };

    let (parts, body) = request.into_parts();
    let (Some(timestamp), Some(signature)) = (
        header_str(&parts.headers, "x-slack-request-timestamp"),
        header_str(&parts.headers, "x-slack-signature"),
    ) else {
        warn!("Slack request without signature headers");
        return reject(StatusCode::UNAUTHORIZED, "Missing Slack signature");
    };
    let Ok(bytes) = to_bytes(body, MAX_SLACK_BODY).await else {
        return reject(StatusCode::BAD_REQUEST, "Unreadable request body");
    };

    let check = slack_signature::verify(
        &slack.signing_secret,
        timestamp,
        signature,
        &bytes,
        Utc::now().timestamp(),
    );
    match check {
        SignatureCheck::Valid => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        rejected => {
            warn!(check = ?rejected, "Slack request rejected");
            reject(StatusCode::UNAUTHORIZED, "Invalid Slack signature")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SlashCommand {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub response_url: String,
}

/// Slack wants an answer within 3s: acknowledge now, reply via `response_url`.
async fn slack_command(
    State(state): State<Arc<AppState>>,
    Form(command): Form<SlashCommand>,
) -> Json<Value> {
    let sql = command.text.trim().to_string();
    if sql.is_empty() {
        return Json(json!({
            "response_type": "ephemeral",
            "text": "Usage: /query SELECT ...",
        }));
    }

    info!(user = ?command.user_name, "📨 Slack command received");
    let state = Arc::clone(&state);
    tokio::spawn(async move {
        let (ok, text) = run_for_slack(&state, &sql, command.user_name.as_deref()).await;
        let response_type = if ok { "in_channel" } else { "ephemeral" };
        let payload = json!({ "response_type": response_type, "text": text });
        let sent = state
            .http
            .post(&command.response_url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = sent {
            warn!(error = %e, "Could not post Slack response");
        }
    });

    Json(json!({ "text": "Analyzing your request... This may take a moment." }))
}

async fn slack_app_mention(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    if payload["type"] == "url_verification" {
        return Json(json!({ "challenge": payload["challenge"] }));
    }

    let event = &payload["event"];
    let sql = strip_mentions(event["text"].as_str().unwrap_or_default());
    let Some(channel) = event["channel"].as_str().map(str::to_string) else {
        return Json(json!({ "status": "ignored" }));
    };
    if sql.is_empty() {
        return Json(json!({ "status": "ignored" }));
    }
    let user = event["user"].as_str().map(str::to_string);
    let thread_ts = event["ts"].as_str().map(str::to_string);

    info!(channel = %channel, "📨 Slack mention received");
    let state = Arc::clone(&state);
    tokio::spawn(async move {
        let (_, text) = run_for_slack(&state, &sql, user.as_deref()).await;
        post_message(&state, &channel, thread_ts.as_deref(), &text).await;
    });

    Json(json!({ "status": "ok" }))
}

async fn run_for_slack(state: &AppState, sql: &str, user: Option<&str>) -> (bool, String) {
    match state.registry.execute(sql, None, user).await {
        Ok(result) => {
            let preview = if result.row_count == 0 {
                "No rows".to_string()
            } else {
                result_table(&result, SLACK_PREVIEW_ROWS).to_string()
            };
            (
                true,
                format!(
                    "✅ Query executed successfully!\n\n*Results:* {} row(s)\n\n```\n{}\n```",
                    result.row_count, preview
                ),
            )
        }
        Err(e) => (false, format!("❌ Query failed:\n```{e}```")),
    }
}

async fn post_message(state: &AppState, channel: &str, thread_ts: Option<&str>, text: &str) {
    let Some(slack) = &state.slack else {
        warn!("No slack.bot_token configured, dropping mention reply");
        return;
    };
    let mut body = json!({ "channel": channel, "text": text });
    if let Some(ts) = thread_ts {
        body["thread_ts"] = json!(ts);
    }
    let sent = state
        .http
        .post(&slack.post_message_url)
        .bearer_auth(&slack.bot_token)
        .json(&body)
        .send()
        .await
        .and_then(|r| r.error_for_status());
    if let Err(e) = sent {
        warn!(error = %e, "chat.postMessage failed");
    }
}

/// Removes `<@U123>` mention tags.
pub fn strip_mentions(text: &str) -> String {
    match MENTION.as_ref() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tidemark_core::TidemarkError;
    use tidemark_core::domain::project::DatabaseConfig;
    use tidemark_core::infrastructure::adapters::BackendConnectorFactory;
    use tidemark_core::infrastructure::config::parse_project_config;
    use tidemark_core::ports::{
        ColumnProfile, ColumnSchema, Connector, ConnectorFactory, QueryResult,
    };
    use tower::ServiceExt;

    fn duckdb_router() -> Result<Router> {
        let config = parse_project_config(
            "project_name: acme\ndatabases:\n  - name: local\n    type: duckdb\n",
        )?;
        let registry = QueryRegistry::new(config, Arc::new(BackendConnectorFactory::new(".")), None);
        Ok(create_router(Arc::new(AppState::new(registry, None))))
    }

    async fn send(router: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = router.oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }

    fn post_json(uri: &str, body: Value) -> Result<Request<Body>> {
        Ok(Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?)
    }

    #[tokio::test]
    async fn test_health_get_and_post() -> Result<()> {
        for method in ["GET", "POST"] {
            let request = Request::builder().method(method).uri("/").body(Body::empty())?;
            let (status, body) = send(duckdb_router()?, request).await?;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "status": "ok" }));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_execute_sql_returns_rows() -> Result<()> {
        let request = post_json("/execute_sql", json!({ "sql": "SELECT 42 AS answer, 'x' AS tag" }))?;
        let (status, body) = send(duckdb_router()?, request).await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row_count"], json!(1));
        assert_eq!(body["columns"], json!(["answer", "tag"]));
        assert_eq!(body["data"][0], json!({ "answer": 42, "tag": "x" }));
        Ok(())
    }

    #[tokio::test]
    async fn test_execute_sql_failure_is_500() -> Result<()> {
        let request = post_json("/execute_sql", json!({ "sql": "SELECT * FROM nowhere" }))?;
        let (status, body) = send(duckdb_router()?, request).await?;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().starts_with("Query execution failed"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_connection_is_500() -> Result<()> {
        let request = post_json(
            "/execute_sql",
            json!({ "sql": "SELECT 1", "connection": "missing" }),
        )?;
        let (status, body) = send(duckdb_router()?, request).await?;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("missing"));
        Ok(())
    }

    /// Pretends every query scans 10 TiB.
    struct Expensive;

    #[async_trait]
    impl Connector for Expensive {
        fn database_name(&self) -> String {
            "analytics".into()
        }
        async fn list_schemas(&self) -> Result<Vec<String>, TidemarkError> {
            Ok(vec![])
        }
        async fn list_tables(&self, _: &str) -> Result<Vec<String>, TidemarkError> {
            Ok(vec![])
        }
        async fn fetch_columns(&self, _: &str, _: &str) -> Result<Vec<ColumnSchema>, TidemarkError> {
            Ok(vec![])
        }
        async fn fetch_row_count(&self, _: &str, _: &str) -> Result<u64, TidemarkError> {
            Ok(0)
        }
        async fn fetch_preview_rows(&self, _: &str, _: &str, _: usize) -> Result<Vec<Row>, TidemarkError> {
            Ok(vec![])
        }
        async fn fetch_column_profile(
            &self,
            _: &str,
            _: &str,
            _: &ColumnSchema,
        ) -> Result<ColumnProfile, TidemarkError> {
            Ok(ColumnProfile::default())
        }
        async fn execute_sql(&self, _: &str) -> Result<QueryResult, TidemarkError> {
            Err(TidemarkError::InternalError("must not execute".into()))
        }
        async fn dry_run_bytes(&self, _: &str) -> Result<Option<u64>, TidemarkError> {
            Ok(Some(10 * (1 << 40)))
        }
    }

    struct ExpensiveFactory;

    #[async_trait]
    impl ConnectorFactory for ExpensiveFactory {
        async fn connect(&self, _: &DatabaseConfig) -> Result<Box<dyn Connector>, TidemarkError> {
            Ok(Box::new(Expensive))
        }
    }

    #[tokio::test]
    async fn test_cost_rejection_is_400() -> Result<()> {
        let config = parse_project_config(
            "project_name: acme\ndatabases:\n  - name: bq\n    type: bigquery\n    project_id: acme-prod\n    access_token: t\n",
        )?;
        let registry = QueryRegistry::new(config, Arc::new(ExpensiveFactory), None);
        let router = create_router(Arc::new(AppState::new(registry, None)));

        let request = post_json("/execute_sql", json!({ "sql": "SELECT * FROM events" }))?;
        let (status, body) = send(router, request).await?;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("exceeds"));
        Ok(())
    }

    const SIGNING_SECRET: &str = "shh-its-a-secret";

    fn slack_router() -> Result<Router> {
        let config = parse_project_config(
            "project_name: acme\ndatabases:\n  - name: local\n    type: duckdb\n",
        )?;
        let registry = QueryRegistry::new(config, Arc::new(BackendConnectorFactory::new(".")), None);
        let slack = SlackConfig {
            bot_token: "xoxb-test".into(),
            signing_secret: SIGNING_SECRET.into(),
            post_message_url: "http://127.0.0.1:9/chat.postMessage".into(),
        };
        Ok(create_router(Arc::new(AppState::new(registry, Some(slack)))))
    }

    fn slack_request(uri: &str, content_type: &str, body: &str, sent_at: i64) -> Result<Request<Body>> {
        let timestamp = sent_at.to_string();
        let signature = slack_signature::sign(SIGNING_SECRET, &timestamp, body.as_bytes())
            .ok_or_else(|| anyhow::anyhow!("could not sign"))?;
        Ok(Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", content_type)
            .header("x-slack-request-timestamp", timestamp)
            .header("x-slack-signature", signature)
            .body(Body::from(body.to_string()))?)
    }

    const FORM: &str = "application/x-www-form-urlencoded";
    const SLASH_BODY: &str =
        "text=SELECT+1&user_name=ana&response_url=http%3A%2F%2F127.0.0.1%3A9%2Fhook";

    #[tokio::test]
    async fn test_url_verification_echoes_challenge() -> Result<()> {
        let body = json!({ "type": "url_verification", "challenge": "abc123" }).to_string();
        let request = slack_request("/slack/app_mention", "application/json", &body, Utc::now().timestamp())?;
        let (status, body) = send(slack_router()?, request).await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "challenge": "abc123" }));
        Ok(())
    }

    #[tokio::test]
    async fn test_slash_command_acknowledges_immediately() -> Result<()> {
        let request = slack_request("/slack/command", FORM, SLASH_BODY, Utc::now().timestamp())?;
        let (status, body) = send(slack_router()?, request).await?;

        assert_eq!(status, StatusCode::OK);
        assert!(body["text"].as_str().unwrap().starts_with("Analyzing"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unsigned_slack_requests_are_401() -> Result<()> {
        for (uri, content_type, body) in [
            ("/slack/command", FORM, SLASH_BODY.to_string()),
            (
                "/slack/app_mention",
                "application/json",
                json!({ "event": { "text": "SELECT 1", "channel": "C1" } }).to_string(),
            ),
        ] {
            let request = Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", content_type)
                .body(Body::from(body))?;
            let (status, body) = send(slack_router()?, request).await?;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert!(body["detail"].as_str().unwrap().contains("signature"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_tampered_body_is_401() -> Result<()> {
        let signed = slack_request("/slack/command", FORM, SLASH_BODY, Utc::now().timestamp())?;
        let (parts, _) = signed.into_parts();
        let tampered = Request::from_parts(
            parts,
            Body::from("text=SELECT+*+FROM+users&response_url=http%3A%2F%2Fevil.example%2Fhook"),
        );
        let (status, _) = send(slack_router()?, tampered).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_replayed_request_is_401() -> Result<()> {
        let ten_minutes_ago = Utc::now().timestamp() - 600;
        let request = slack_request("/slack/command", FORM, SLASH_BODY, ten_minutes_ago)?;
        let (status, _) = send(slack_router()?, request).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_slack_routes_need_configuration() -> Result<()> {
        let request = slack_request("/slack/command", FORM, SLASH_BODY, Utc::now().timestamp())?;
        let (status, body) = send(duckdb_router()?, request).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], json!("Slack is not configured"));
        Ok(())
    }

    #[test]
    fn test_strip_mentions() {
        assert_eq!(strip_mentions("<@U0123ABC> SELECT 1"), "SELECT 1");
        assert_eq!(strip_mentions("SELECT <@U1> 2 <@U2>"), "SELECT  2");
        assert_eq!(strip_mentions("  plain  "), "plain");
    }
}
