pub mod configuration;

pub use configuration::{
    AccessorKind, BackendConfig, BigQueryConfig, DatabaseConfig, DatabaseType, DatabricksConfig,
    DuckDBConfig, PostgresConfig, ProjectConfig, RedshiftConfig, ServerConfig, SlackConfig,
    SnowflakeConfig, SnowflakeTokenType,
};
