// tidemark-core/src/application/templates.rs

// Project `*.j2` files rendered after a sync, next to their source without
// the `.j2` extension.

use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::application::ports::TemplateEngine;
use crate::domain::sync::{DatabaseSyncOutcome, SyncSummary};
use crate::error::TidemarkError;
use crate::infrastructure::fs::atomic_write;

const TEMPLATE_EXTENSION: &str = "j2";
const SKIPPED_DIRS: [&str; 2] = ["templates", "target"];

#[derive(Debug, Clone, Default)]
pub struct TemplateRenderSummary {
    pub rendered: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl TemplateRenderSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// `project_name` plus every connection with its synced schemas and tables.
pub fn template_context(project_name: &str, summary: &SyncSummary) -> Value {
    let databases: Vec<Value> = summary
        .outcomes
        .iter()
        .map(|outcome| match outcome {
            DatabaseSyncOutcome::Synced {
                name,
                db_type,
                database,
                state,
                ..
            } => json!({
                "name": name,
                "type": db_type.as_str(),
                "database": database,
                "status": "synced",
                "schemas": state.synced_tables.iter().map(|(schema, tables)| json!({
                    "name": schema,
                    "tables": tables,
                })).collect::<Vec<_>>(),
            }),
            DatabaseSyncOutcome::Failed {
                name,
                db_type,
                error,
            } => json!({
                "name": name,
                "type": db_type.as_str(),
                "status": "failed",
                "error": error,
                "schemas": [],
            }),
        })
        .collect();

    json!({
        "project_name": project_name,
        "databases": databases,
    })
}

/// Every `*.j2` under `project_dir`, skipping hidden directories,
/// `templates/`, `target/` and the sync output tree.
pub fn discover_templates(project_dir: &Path, output_dir: &Path) -> Vec<PathBuf> {
    // `./databases` and `databases` are the same tree
    let output_dir = output_dir
        .canonicalize()
        .unwrap_or_else(|_| output_dir.to_path_buf());
    let keep = |entry: &DirEntry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !(name.starts_with('.')
            || SKIPPED_DIRS.contains(&name.as_ref())
            || entry.path() == output_dir
            || entry.path().canonicalize().is_ok_and(|p| p == output_dir))
    };

    let mut found: Vec<PathBuf> = WalkDir::new(project_dir)
        .into_iter()
        .filter_entry(keep)
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
        .filter(|path| path.extension().is_some_and(|ext| ext == TEMPLATE_EXTENSION))
        .collect();
    found.sort();
    found
}

#[instrument(skip(engine, context))]
pub fn render_user_templates(
    project_dir: &Path,
    output_dir: &Path,
    context: &Value,
    engine: &dyn TemplateEngine,
) -> TemplateRenderSummary {
    let mut summary = TemplateRenderSummary::default();

    for source in discover_templates(project_dir, output_dir) {
        let target = source.with_extension("");
        match render_one(&source, &target, context, engine) {
            Ok(()) => {
                info!(template = ?source, "📝 Rendered template");
                summary.rendered.push(target);
            }
            Err(e) => {
                warn!(template = ?source, error = %e, "Template failed");
                summary.failed.push((source, e.to_string()));
            }
        }
    }
    summary
}

fn render_one(
    source: &Path,
    target: &Path,
    context: &Value,
    engine: &dyn TemplateEngine,
) -> Result<(), TidemarkError> {
    let template = fs::read_to_string(source)?;
    let rendered = engine.render_str(&template, context)?;
    atomic_write(target, rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::project::DatabaseType;
    use crate::domain::sync::SyncState;
    use crate::infrastructure::templating::JinjaRenderer;
    use anyhow::Result;
    use tempfile::tempdir;

    fn summary() -> SyncSummary {
        let mut state = SyncState::new("/out");
        state.record_table("main", "orders");
        state.record_table("main", "users");
        let mut summary = SyncSummary::default();
        summary.push(DatabaseSyncOutcome::Synced {
            name: "local".into(),
            db_type: DatabaseType::DuckDB,
            database: "main".into(),
            state,
            stale_removed: 0,
        });
        summary
    }

    #[test]
    fn test_renders_and_skips_excluded_dirs() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        let output = root.join("databases");
        for sub in ["docs", "templates", ".git", "target", "databases"] {
            fs::create_dir_all(root.join(sub))?;
            fs::write(root.join(sub).join("x.md.j2"), "{{ project_name }}")?;
        }
        fs::write(
            root.join("RULES.md.j2"),
            "{% for db in databases %}{{ db.name }}:{% for s in db.schemas %}{{ s.tables | join(',') }}{% endfor %}{% endfor %}",
        )?;

        let ctx = template_context("acme", &summary());
        let result = render_user_templates(root, &output, &ctx, &JinjaRenderer::new());

        assert!(result.is_success());
        assert_eq!(result.rendered.len(), 2);
        assert_eq!(fs::read_to_string(root.join("RULES.md"))?, "local:orders,users");
        assert_eq!(fs::read_to_string(root.join("docs/x.md"))?, "acme");
        for skipped in ["templates", ".git", "target", "databases"] {
            assert!(!root.join(skipped).join("x.md").exists(), "{skipped}");
        }
        Ok(())
    }

    #[test]
    fn test_output_dir_matched_whatever_its_spelling() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        fs::create_dir_all(root.join("docs"))?;
        fs::write(root.join("docs/x.md.j2"), "{{ project_name }}")?;
        fs::write(root.join("README.md.j2"), "{{ project_name }}")?;

        let spelled_differently = root.join(".").join("docs");
        let found = discover_templates(root, &spelled_differently);
        assert_eq!(found, vec![root.join("README.md.j2")]);
        Ok(())
    }

    #[test]
    fn test_broken_template_is_reported() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("bad.md.j2"), "{% for x in %}")?;
        let result = render_user_templates(
            dir.path(),
            &dir.path().join("databases"),
            &json!({}),
            &JinjaRenderer::new(),
        );
        assert!(!result.is_success());
        assert_eq!(result.failed.len(), 1);
        Ok(())
    }
}
