// tidemark-core/src/infrastructure/adapters/factory.rs

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, instrument};

use crate::domain::project::{BackendConfig, DatabaseConfig};
use crate::error::TidemarkError;
use crate::infrastructure::adapters::{
    bigquery::BigQueryConnector, databricks::DatabricksConnector, duckdb::DuckDbConnector,
    postgres::PostgresConnector, snowflake::SnowflakeConnector,
};
use crate::infrastructure::error::InfrastructureError;
use crate::ports::{Connector, ConnectorFactory};

/// Dispatches on the configured `type`. Relative file paths (DuckDB files,
/// service-account keys) resolve against the project root.
pub struct BackendConnectorFactory {
    project_dir: PathBuf,
}

impl BackendConnectorFactory {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    async fn open(&self, config: &DatabaseConfig) -> Result<Box<dyn Connector>, TidemarkError> {
        let connector: Box<dyn Connector> = match &config.backend {
            BackendConfig::DuckDB(c) => Box::new(DuckDbConnector::open(c, &self.project_dir)?),
            BackendConfig::Postgres(c) => Box::new(PostgresConnector::connect_postgres(c).await?),
            BackendConfig::Redshift(c) => Box::new(PostgresConnector::connect_redshift(c).await?),
            BackendConfig::BigQuery(c) => {
                Box::new(BigQueryConnector::connect(c, &self.project_dir).await?)
            }
            BackendConfig::Snowflake(c) => {
                Box::new(SnowflakeConnector::connect(c, &self.project_dir).await?)
            }
            BackendConfig::Databricks(c) => Box::new(DatabricksConnector::connect(c).await?),
        };
        Ok(connector)
    }
}

#[async_trait]
impl ConnectorFactory for BackendConnectorFactory {
    #[instrument(skip(self, config), fields(connection = %config.name, db_type = %config.db_type()))]
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connector>, TidemarkError> {
        let connector = self.open(config).await.map_err(|e| {
            TidemarkError::from(InfrastructureError::Connection {
                name: config.name.clone(),
                reason: e.to_string(),
            })
        })?;
        info!(database = %connector.database_name(), "Connected");
        Ok(connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn duckdb_config(path: &str) -> Result<DatabaseConfig> {
        Ok(serde_yaml::from_str(&format!(
            "name: local\ntype: duckdb\npath: {path}\n"
        ))?)
    }

    #[tokio::test]
    async fn test_memory_duckdb_is_main() -> Result<()> {
        let factory = BackendConnectorFactory::new(".");
        let connector = factory.connect(&duckdb_config("\":memory:\"")?).await?;
        assert_eq!(connector.database_name(), "main");
        Ok(())
    }

    #[tokio::test]
    async fn test_file_duckdb_resolves_against_project() -> Result<()> {
        let dir = tempfile::tempdir()?;
        ::duckdb::Connection::open(dir.path().join("warehouse.duckdb"))?
            .execute_batch("CREATE TABLE t (x INTEGER)")?;

        let factory = BackendConnectorFactory::new(dir.path());
        let connector = factory.connect(&duckdb_config("warehouse.duckdb")?).await?;
        assert_eq!(connector.database_name(), "warehouse");
        assert_eq!(connector.list_tables("main").await?, vec!["t"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_failure_names_connection() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let factory = BackendConnectorFactory::new(dir.path());
        let err = factory
            .connect(&duckdb_config("missing.duckdb")?)
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("read-only open of a missing file should fail"))?;
        assert!(err.to_string().contains("Failed to connect to 'local'"), "{err}");
        Ok(())
    }
}
