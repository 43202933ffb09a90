// tidemark-core/src/application/context.rs

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::error::TidemarkError;
use crate::ports::{ColumnSchema, Connector, Row};

/// Fetch failure shared by every accessor that asked for the same value.
pub type SharedError = Arc<TidemarkError>;

type Memo<T> = OnceCell<Result<T, SharedError>>;

/// Lazily fetched facts about exactly one table. Each value hits the backend
/// at most once, failures included; a context is never reused for another
/// table.
pub struct TableContext<'a> {
    connector: &'a dyn Connector,
    database: String,
    schema: String,
    table: String,
    columns: Memo<Vec<ColumnSchema>>,
    row_count: Memo<u64>,
    description: Memo<Option<String>>,
    previews: Mutex<HashMap<usize, Result<Vec<Row>, SharedError>>>,
}

impl<'a> TableContext<'a> {
    pub fn new(connector: &'a dyn Connector, schema: &str, table: &str) -> Self {
        Self {
            connector,
            database: connector.database_name(),
            schema: schema.to_string(),
            table: table.to_string(),
            columns: OnceCell::new(),
            row_count: OnceCell::new(),
            description: OnceCell::new(),
            previews: Mutex::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> &'a dyn Connector {
        self.connector
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn columns(&self) -> Result<&[ColumnSchema], SharedError> {
        self.columns
            .get_or_init(|| async {
                self.connector
                    .fetch_columns(&self.schema, &self.table)
                    .await
                    .map_err(Arc::new)
            })
            .await
            .as_ref()
            .map(Vec::as_slice)
            .map_err(Arc::clone)
    }

    pub async fn column_count(&self) -> Result<usize, SharedError> {
        Ok(self.columns().await?.len())
    }

    pub async fn row_count(&self) -> Result<u64, SharedError> {
        self.row_count
            .get_or_init(|| async {
                self.connector
                    .fetch_row_count(&self.schema, &self.table)
                    .await
                    .map_err(Arc::new)
            })
            .await
            .clone()
    }

    pub async fn description(&self) -> Result<Option<&str>, SharedError> {
        self.description
            .get_or_init(|| async {
                self.connector
                    .fetch_table_description(&self.schema, &self.table)
                    .await
                    .map_err(Arc::new)
            })
            .await
            .as_ref()
            .map(Option::as_deref)
            .map_err(Arc::clone)
    }

    pub async fn preview(&self, limit: usize) -> Result<Vec<Row>, SharedError> {
        let mut previews = self.previews.lock().await;
        if let Some(cached) = previews.get(&limit) {
            return cached.clone();
        }
        let fetched = self
            .connector
            .fetch_preview_rows(&self.schema, &self.table, limit)
            .await
            .map_err(Arc::new);
        previews.insert(limit, fetched.clone());
        fetched
    }
}
