// tidemark/tests/cli.rs
//
// Drives the real binary against a file-based DuckDB project.

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CONFIG: &str = "project_name: acme
databases:
  - name: local
    type: duckdb
    path: warehouse.duckdb
";

fn project() -> Result<TempDir> {
    let dir = tempfile::tempdir()?;
    {
        let conn = duckdb::Connection::open(dir.path().join("warehouse.duckdb"))?;
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER NOT NULL, name VARCHAR);
             INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob');
             CREATE SCHEMA staging;
             CREATE TABLE staging.raw_events (payload VARCHAR);",
        )?;
    }
    fs::write(dir.path().join("tidemark.yaml"), CONFIG)?;
    fs::write(
        dir.path().join("CATALOG.md.j2"),
        "# {{ project_name }}\n{% for db in databases %}{% for s in db.schemas %}{{ db.name }}/{{ s.name }}: {{ s.tables | join(', ') }}\n{% endfor %}{% endfor %}",
    )?;
    Ok(dir)
}

fn tidemark(project_dir: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("tidemark")?;
    cmd.arg("--project-dir")
        .arg(project_dir)
        .env_remove("TIDEMARK_OUTPUT_DIR")
        .env_remove("TIDEMARK_PROJECT_DIR");
    Ok(cmd)
}

#[test]
fn test_missing_config_exits_1() -> Result<()> {
    let empty = tempfile::tempdir()?;
    tidemark(empty.path())?
        .arg("sync")
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Failed to load project configuration",
        ));
    Ok(())
}

#[test]
fn test_unknown_provider_exits_1() -> Result<()> {
    let dir = project()?;
    tidemark(dir.path())?
        .args(["sync", "notion"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown provider 'notion'"));
    assert!(!dir.path().join("databases").exists());
    Ok(())
}

#[test]
fn test_sync_writes_tree_and_templates() -> Result<()> {
    let dir = project()?;
    tidemark(dir.path())?
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sync Complete"));

    let users = dir
        .path()
        .join("databases/type=duckdb/database=warehouse/schema=main/table=users");
    let columns = fs::read_to_string(users.join("columns.md"))?;
    assert!(columns.contains("- id (INTEGER) NOT NULL"), "{columns}");
    assert!(columns.contains("- name (VARCHAR)"), "{columns}");
    assert!(fs::read_to_string(users.join("description.md"))?.contains("Row Count: 2"));
    assert!(
        dir.path()
            .join("databases/type=duckdb/database=warehouse/schema=staging/table=raw_events/preview.md")
            .is_file()
    );

    let catalog = fs::read_to_string(dir.path().join("CATALOG.md"))?;
    assert!(catalog.starts_with("# acme\n"), "{catalog}");
    assert!(catalog.contains("local/main: users"), "{catalog}");
    assert!(catalog.contains("local/staging: raw_events"), "{catalog}");
    Ok(())
}

#[test]
fn test_sync_selector_and_output_dir_flag() -> Result<()> {
    let dir = project()?;
    let out = dir.path().join("docs");
    tidemark(dir.path())?
        .args(["sync", "databases:local", "--no-templates", "--output-dir"])
        .arg(&out)
        .assert()
        .success();

    assert!(out.join("type=duckdb/database=warehouse/schema=main").is_dir());
    assert!(!dir.path().join("databases").exists());
    assert!(!dir.path().join("CATALOG.md").exists());
    Ok(())
}

#[test]
fn test_relative_output_dir_resolves_against_project() -> Result<()> {
    let dir = project()?;
    let elsewhere = tempfile::tempdir()?;
    tidemark(dir.path())?
        .current_dir(elsewhere.path())
        .args(["sync", "--output-dir", "./docs"])
        .assert()
        .success();

    assert!(dir.path().join("docs/type=duckdb/database=warehouse/schema=main").is_dir());
    assert!(!elsewhere.path().join("docs").exists());
    // the catalog template still renders at the project root
    assert!(fs::read_to_string(dir.path().join("CATALOG.md"))?.contains("local/main: users"));
    Ok(())
}

#[test]
fn test_sync_failed_connection_exits_1() -> Result<()> {
    let dir = project()?;
    fs::write(
        dir.path().join("tidemark.yaml"),
        "project_name: acme\ndatabases:\n  - name: ghost\n    type: duckdb\n    path: missing.duckdb\n",
    )?;
    tidemark(dir.path())?
        .args(["sync", "--no-templates"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Sync Failed"));
    Ok(())
}

#[test]
fn test_query_prints_rows() -> Result<()> {
    let dir = project()?;
    tidemark(dir.path())?
        .args(["query", "SELECT name FROM users ORDER BY id"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Alice").and(predicate::str::contains("2 row(s)")));
    Ok(())
}
