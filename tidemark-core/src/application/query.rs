// tidemark-core/src/application/query.rs

// Ad-hoc SQL for the HTTP/Slack front end and `tidemark query`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::domain::cost::check_query_cost;
use crate::domain::project::{BackendConfig, DatabaseConfig, ProjectConfig};
use crate::error::TidemarkError;
use crate::ports::{Connector, ConnectorFactory, QueryResult};

pub struct QueryService {
    project_name: String,
    config: DatabaseConfig,
    connector: Box<dyn Connector>,
}

impl QueryService {
    pub fn new(project_name: &str, config: DatabaseConfig, connector: Box<dyn Connector>) -> Self {
        Self {
            project_name: project_name.to_string(),
            config,
            connector,
        }
    }

    /// Opens the named connection, or the default one.
    pub async fn connect(
        project: &ProjectConfig,
        connection: Option<&str>,
        factory: &dyn ConnectorFactory,
    ) -> Result<Self, TidemarkError> {
        let config = project.query_database(connection)?.clone();
        let connector = factory.connect(&config).await?;
        Ok(Self::new(&project.project_name, config, connector))
    }

    pub fn connection_name(&self) -> &str {
        &self.config.name
    }

    /// Runs `sql`. BigQuery queries are labelled and must pass the dry-run
    /// cost guard before anything executes.
    #[instrument(skip(self, sql), fields(connection = %self.config.name))]
    pub async fn execute(&self, sql: &str, user: Option<&str>) -> Result<QueryResult, TidemarkError> {
        let result = match &self.config.backend {
            BackendConfig::BigQuery(bq) => {
                let sql = annotate_sql(sql, &self.project_name, user);
                if let Some(bytes) = self.connector.dry_run_bytes(&sql).await? {
                    check_query_cost(bytes, bq.max_query_cost)?;
                }
                self.connector.execute_sql(&sql).await?
            }
            _ => self.connector.execute_sql(sql).await?,
        };
        info!(rows = result.row_count, "Query executed");
        Ok(result)
    }
}

/// Prefixes `-- project:` / `-- user:` comment lines so queries can be
/// attributed in the warehouse job history.
pub fn annotate_sql(sql: &str, project_name: &str, user: Option<&str>) -> String {
    let mut out = format!("-- project: {project_name}\n");
    if let Some(user) = user.filter(|u| !u.trim().is_empty()) {
        out.push_str(&format!("-- user: {user}\n"));
    }
    out.push_str(sql);
    out
}

/// One service per connection name, opened on first use.
pub struct QueryRegistry {
    project: ProjectConfig,
    factory: Arc<dyn ConnectorFactory>,
    default_connection: Option<String>,
    services: Mutex<HashMap<String, Arc<QueryService>>>,
}

impl QueryRegistry {
    pub fn new(
        project: ProjectConfig,
        factory: Arc<dyn ConnectorFactory>,
        default_connection: Option<String>,
    ) -> Self {
        Self {
            project,
            factory,
            default_connection,
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub async fn service(&self, connection: Option<&str>) -> Result<Arc<QueryService>, TidemarkError> {
        let requested = connection.or(self.default_connection.as_deref());
        let name = self.project.query_database(requested)?.name.clone();

        let mut services = self.services.lock().await;
        if let Some(service) = services.get(&name) {
            return Ok(Arc::clone(service));
        }
        let service = Arc::new(
            QueryService::connect(&self.project, Some(&name), self.factory.as_ref()).await?,
        );
        services.insert(name, Arc::clone(&service));
        Ok(service)
    }

    pub async fn execute(
        &self,
        sql: &str,
        connection: Option<&str>,
        user: Option<&str>,
    ) -> Result<QueryResult, TidemarkError> {
        self.service(connection).await?.execute(sql, user).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ports::{ColumnProfile, ColumnSchema, Row};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_annotate_sql() {
        assert_eq!(
            annotate_sql("SELECT 1", "acme", Some("ana@acme.io")),
            "-- project: acme\n-- user: ana@acme.io\nSELECT 1"
        );
        assert_eq!(annotate_sql("SELECT 1", "acme", None), "-- project: acme\nSELECT 1");
    }

    /// Reports a fixed dry-run size and records what was executed.
    struct Scripted {
        bytes: u64,
        executed: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Connector for Scripted {
        fn database_name(&self) -> String {
            "acme-prod".into()
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
        async fn execute_sql(&self, sql: &str) -> Result<QueryResult, TidemarkError> {
            self.executed
                .lock()
                .map_err(|_| TidemarkError::InternalError("poisoned".into()))?
                .push(sql.to_string());
            Ok(QueryResult::new(vec!["x".into()], vec![]))
        }
        async fn dry_run_bytes(&self, _: &str) -> Result<Option<u64>, TidemarkError> {
            Ok(Some(self.bytes))
        }
    }

    fn bigquery() -> Result<DatabaseConfig> {
        Ok(serde_yaml::from_str(
            "name: bq\ntype: bigquery\nproject_id: acme-prod\naccess_token: t\nmax_query_cost: 1.0\n",
        )?)
    }

    #[tokio::test]
    async fn test_cost_guard_blocks_before_execution() -> Result<()> {
        let executed = Arc::new(StdMutex::new(Vec::new()));
        let service = QueryService::new(
            "acme",
            bigquery()?,
            Box::new(Scripted {
                bytes: 1 << 40,
                executed: Arc::clone(&executed),
            }),
        );

        let err = service.execute("SELECT * FROM huge", None).await.unwrap_err();
        assert!(err.is_cost_rejection());
        assert!(executed.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_cheap_bigquery_query_runs_annotated() -> Result<()> {
        let executed = Arc::new(StdMutex::new(Vec::new()));
        let service = QueryService::new(
            "acme",
            bigquery()?,
            Box::new(Scripted {
                bytes: 10 << 20,
                executed: Arc::clone(&executed),
            }),
        );

        service.execute("SELECT 1", Some("ana@acme.io")).await?;
        assert_eq!(
            executed.lock().unwrap().as_slice(),
            ["-- project: acme\n-- user: ana@acme.io\nSELECT 1"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_other_backends_run_verbatim() -> Result<()> {
        let conn = ::duckdb::Connection::open_in_memory()?;
        let config: DatabaseConfig = serde_yaml::from_str("name: local\ntype: duckdb\n")?;
        let service = QueryService::new(
            "acme",
            config,
            Box::new(crate::infrastructure::adapters::duckdb::DuckDbConnector::from_connection(
                conn, "main",
            )),
        );
        let result = service.execute("SELECT 42 AS answer", None).await?;
        assert_eq!(result.columns, ["answer"]);
        assert_eq!(result.rows[0]["answer"], serde_json::json!(42));
        Ok(())
    }
}
