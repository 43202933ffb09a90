// tidemark-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error(
        "Query would scan {gb_processed:.1} GB (estimated ${estimated_cost:.2}), which exceeds the ${max_cost:.2} limit"
    )]
    #[diagnostic(
        code(tidemark::domain::cost_limit),
        help("Refine the query to scan less data (add filters, select fewer columns, use partitions).")
    )]
    CostLimitExceeded {
        gb_processed: f64,
        estimated_cost: f64,
        max_cost: f64,
    },

    #[error("Invalid table pattern '{0}': expected 'schema.table'")]
    #[diagnostic(
        code(tidemark::domain::pattern),
        help("Use '*' as a wildcard, e.g. 'analytics.*' or '*.users'.")
    )]
    InvalidPattern(String),

    #[error("Unknown accessor '{0}'")]
    #[diagnostic(
        code(tidemark::domain::accessor),
        help("Valid accessors are: columns, preview, description, profiling.")
    )]
    UnknownAccessor(String),

    #[error("Database connection '{0}' is defined more than once")]
    #[diagnostic(code(tidemark::domain::duplicate_connection))]
    DuplicateConnection(String),

    #[error("Database connection '{0}' not found in configuration")]
    #[diagnostic(code(tidemark::domain::connection_not_found))]
    ConnectionNotFound(String),

    #[error("Unknown provider '{0}'")]
    #[diagnostic(
        code(tidemark::domain::provider),
        help("Use 'databases' or 'databases:<connection-name>'.")
    )]
    UnknownProvider(String),
}
