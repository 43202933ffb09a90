// tidemark-core/src/infrastructure/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DatabaseError {
    #[error("DuckDB Engine Error: {0}")]
    #[diagnostic(
        code(tidemark::infra::database::duckdb),
        help("An error occurred inside the DuckDB engine.")
    )]
    DuckDB(#[from] duckdb::Error),

    #[error("Postgres Driver Error: {0}")]
    #[diagnostic(
        code(tidemark::infra::database::postgres),
        help("Check host, port, credentials and sslmode.")
    )]
    Postgres(#[from] sqlx::Error),

    #[error("{backend} API Error: {message}")]
    #[diagnostic(code(tidemark::infra::database::api))]
    Api {
        backend: &'static str,
        message: String,
    },

    #[error("{backend} statement did not complete: {state}")]
    #[diagnostic(
        code(tidemark::infra::database::statement),
        help("The warehouse accepted the statement but returned no result set.")
    )]
    StatementIncomplete {
        backend: &'static str,
        state: String,
    },
}

#[derive(Error, Debug, Diagnostic)]
pub enum InfrastructureError {
    // --- DATABASE (Abstracted) ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] DatabaseError),

    #[error("Failed to connect to '{name}': {reason}")]
    #[diagnostic(
        code(tidemark::infra::connection),
        help("Check network access and credentials for this connection.")
    )]
    Connection { name: String, reason: String },

    #[error("Could not list tables of schema '{schema}': {reason}")]
    #[diagnostic(code(tidemark::infra::schema_unavailable))]
    SchemaUnavailable { schema: String, reason: String },

    #[error("Authentication Error: {0}")]
    #[diagnostic(
        code(tidemark::infra::auth),
        help("Check the credentials configured for this connection.")
    )]
    Auth(String),

    // --- HTTP (REST warehouses, Slack) ---
    #[error("HTTP Error: {0}")]
    #[diagnostic(code(tidemark::infra::http))]
    Http(#[from] reqwest::Error),

    // --- FILESYSTEM (IO) ---
    #[error("File System Error: {0}")]
    #[diagnostic(
        code(tidemark::infra::io),
        help("Check file permissions or path validity.")
    )]
    Io(#[from] std::io::Error),

    // --- CONFIG / YAML ---
    #[error("YAML Parsing Error: {0}")]
    #[diagnostic(
        code(tidemark::infra::yaml),
        help("Check your YAML syntax (indentation, types).")
    )]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON Error: {0}")]
    #[diagnostic(code(tidemark::infra::json))]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    #[diagnostic(code(tidemark::infra::config))]
    ConfigError(String),

    #[error("Project configuration not found: {0}")]
    #[diagnostic(
        code(tidemark::infra::config_missing),
        help("Create a tidemark.yaml at the project root or set TIDEMARK_PROJECT_DIR.")
    )]
    ConfigNotFound(String),

    // --- TEMPLATING ---
    #[error("Template Rendering Error: {0}")]
    #[diagnostic(
        code(tidemark::infra::template),
        help("Check your Jinja syntax ({{ ... }}) inside the template.")
    )]
    TemplateError(#[from] minijinja::Error),
}

// Shortcuts so `?` works directly on driver calls
impl From<duckdb::Error> for InfrastructureError {
    fn from(err: duckdb::Error) -> Self {
        InfrastructureError::Database(DatabaseError::DuckDB(err))
    }
}

impl From<sqlx::Error> for InfrastructureError {
    fn from(err: sqlx::Error) -> Self {
        InfrastructureError::Database(DatabaseError::Postgres(err))
    }
}
