// tidemark-core/src/application/accessors.rs

// One markdown file per accessor per table. Generation never fails: a
// backend error becomes an error document for that file only.

use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

use crate::application::context::{SharedError, TableContext};
use crate::application::ports::TemplateEngine;
use crate::domain::project::AccessorKind;

#[derive(Debug, Clone)]
pub struct AccessorOutput {
    pub kind: AccessorKind,
    pub content: String,
    /// Error text when `content` is an error document.
    pub error: Option<String>,
}

impl AccessorOutput {
    pub fn filename(&self) -> String {
        self.kind.filename()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// `# {table}` followed by the failure, as written in place of the content.
pub fn error_document(table: &str, error: &str) -> String {
    format!("# {table}\n\nError generating content: {error}\n")
}

pub async fn generate(
    kind: AccessorKind,
    ctx: &TableContext<'_>,
    engine: &dyn TemplateEngine,
    preview_limit: usize,
) -> AccessorOutput {
    let rendered = match build_context(kind, ctx, preview_limit).await {
        Ok(context) => engine
            .render(&kind.template_name(), &context)
            .map_err(Arc::new),
        Err(e) => Err(e),
    };

    match rendered {
        Ok(content) => AccessorOutput {
            kind,
            content,
            error: None,
        },
        Err(e) => {
            let error = e.to_string();
            warn!(
                accessor = %kind.filename(),
                table = %format!("{}.{}", ctx.schema(), ctx.table()),
                error = %error,
                "Accessor failed, writing error document"
            );
            AccessorOutput {
                kind,
                content: error_document(ctx.table(), &error),
                error: Some(error),
            }
        }
    }
}

/// Template context for one accessor.
pub async fn build_context(
    kind: AccessorKind,
    ctx: &TableContext<'_>,
    preview_limit: usize,
) -> Result<Value, SharedError> {
    let mut context = json!({
        "database": ctx.database(),
        "schema": ctx.schema(),
        "table": ctx.table(),
    });

    match kind {
        AccessorKind::Columns => {
            context["columns"] = json!(ctx.columns().await?);
        }
        AccessorKind::Preview => {
            let rows = ctx.preview(preview_limit).await?;
            let lines: Vec<String> = rows
                .iter()
                .map(|row| Value::Object(row.clone()).to_string())
                .collect();
            context["rows"] = json!(lines);
            context["limit"] = json!(preview_limit);
        }
        AccessorKind::Description => {
            context["row_count"] = json!(ctx.row_count().await?);
            context["column_count"] = json!(ctx.column_count().await?);
            context["description"] = json!(ctx.description().await?);
        }
        AccessorKind::Profiling => {
            context["row_count"] = json!(ctx.row_count().await?);
            context["profiles"] = Value::Array(profiles(ctx).await?);
        }
    }
    Ok(context)
}

/// Per-column statistics. A failing column yields an error row; the others
/// still render.
async fn profiles(ctx: &TableContext<'_>) -> Result<Vec<Value>, SharedError> {
    let mut out = Vec::new();
    for column in ctx.columns().await? {
        let profile = ctx
            .connector()
            .fetch_column_profile(ctx.schema(), ctx.table(), column)
            .await;
        let entry = match profile {
            Ok(p) => json!({
                "name": column.name,
                "data_type": column.data_type,
                "null_count": p.null_count,
                "distinct_count": p.distinct_count,
                "min": p.min.as_deref().map(table_cell),
                "max": p.max.as_deref().map(table_cell),
            }),
            Err(e) => {
                warn!(column = %column.name, table = %ctx.table(), error = %e, "Column profile failed");
                json!({
                    "name": column.name,
                    "data_type": column.data_type,
                    "error": table_cell(&e.to_string()),
                })
            }
        };
        out.push(entry);
    }
    Ok(out)
}

/// Keeps a value on one markdown table row.
fn table_cell(value: &str) -> String {
    value.replace('\n', " ").replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TidemarkError;
    use crate::infrastructure::adapters::duckdb::DuckDbConnector;
    use crate::infrastructure::templating::JinjaRenderer;
    use anyhow::Result;

    fn connector() -> Result<DuckDbConnector> {
        let conn = ::duckdb::Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER NOT NULL, name VARCHAR, email VARCHAR, active BOOLEAN);
             INSERT INTO users VALUES (1, 'Alice', 'alice@example.com', true),
                                      (2, 'Bob', 'bob@example.com', false),
                                      (3, 'Carol', NULL, true);",
        )?;
        Ok(DuckDbConnector::from_connection(conn, "main"))
    }

    #[tokio::test]
    async fn test_columns_markdown() -> Result<()> {
        let connector = connector()?;
        let ctx = TableContext::new(&connector, "main", "users");
        let out = generate(AccessorKind::Columns, &ctx, &JinjaRenderer::new(), 10).await;
        insta::assert_snapshot!(out.content, @r"
        # users

        ## Columns

        - id (INTEGER) NOT NULL
        - name (VARCHAR)
        - email (VARCHAR)
        - active (BOOLEAN)
        ");
        Ok(())
    }

    #[tokio::test]
    async fn test_description_markdown() -> Result<()> {
        let connector = connector()?;
        let ctx = TableContext::new(&connector, "main", "users");
        let out = generate(AccessorKind::Description, &ctx, &JinjaRenderer::new(), 10).await;
        assert!(!out.is_error());
        insta::assert_snapshot!(out.content, @r"
        # users

        Dataset: main
        Row Count: 3
        Column Count: 4
        ");
        Ok(())
    }

    #[tokio::test]
    async fn test_profiling_markdown() -> Result<()> {
        let connector = connector()?;
        let ctx = TableContext::new(&connector, "main", "users");
        let out = generate(AccessorKind::Profiling, &ctx, &JinjaRenderer::new(), 10).await;
        insta::assert_snapshot!(out.content, @r"
        # users

        ## Profiling

        Row Count: 3

        | Column | Type | Nulls | Distinct | Min | Max |
        |--------|------|-------|----------|-----|-----|
        | id | INTEGER | 0 | 3 | 1 | 3 |
        | name | VARCHAR | 0 | 3 |  |  |
        | email | VARCHAR | 1 | 2 |  |  |
        | active | BOOLEAN | 0 | 2 |  |  |
        ");
        Ok(())
    }

    #[tokio::test]
    async fn test_preview_lines_are_compact_json() -> Result<()> {
        let connector = connector()?;
        let ctx = TableContext::new(&connector, "main", "users");
        let out = generate(AccessorKind::Preview, &ctx, &JinjaRenderer::new(), 2).await;
        let lines: Vec<&str> = out.content.lines().filter(|l| l.starts_with('{')).collect();
        assert_eq!(
            lines,
            [
                r#"{"id":1,"name":"Alice","email":"alice@example.com","active":true}"#,
                r#"{"id":2,"name":"Bob","email":"bob@example.com","active":false}"#,
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_table_becomes_error_document() -> Result<()> {
        let connector = connector()?;
        let ctx = TableContext::new(&connector, "main", "ghost");
        let out = generate(AccessorKind::Columns, &ctx, &JinjaRenderer::new(), 10).await;
        assert!(out.is_error());
        assert!(out.content.starts_with("# ghost\n\nError generating content: "));
        assert!(out.content.contains("ghost"));
        Ok(())
    }

    #[test]
    fn test_error_document_shape() {
        let err = TidemarkError::InternalError("permission denied".into());
        assert_eq!(
            error_document("orders", &err.to_string()),
            "# orders\n\nError generating content: Internal Error: permission denied\n"
        );
    }
}
