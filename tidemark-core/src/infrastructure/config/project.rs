// tidemark-core/src/infrastructure/config/project.rs

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use validator::Validate;

use crate::domain::project::configuration::ProjectConfig;
use crate::error::TidemarkError;
use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::templating::render_env_placeholders;

pub const CONFIG_CANDIDATES: [&str; 2] = ["tidemark.yaml", "tidemark.yml"];

/// Overrides the `databases` output base without touching the project file.
pub const OUTPUT_DIR_ENV: &str = "TIDEMARK_OUTPUT_DIR";

// --- LOADER ---

#[instrument(skip(project_dir))]
pub fn load_project_config(project_dir: &Path) -> Result<ProjectConfig, TidemarkError> {
    // 1. Découverte du fichier principal
    let config_path = find_main_config(project_dir)?;
    info!(path = ?config_path, "Loading project configuration");

    // 2. env('VAR') puis YAML
    let raw = fs::read_to_string(&config_path).map_err(InfrastructureError::Io)?;
    let mut config = parse_project_config(&raw)?;

    // 3. Override via Variables d'Environnement
    apply_env_overrides(&mut config, std::env::var(OUTPUT_DIR_ENV).ok());

    info!(
        project = %config.project_name,
        databases = config.databases.len(),
        "Project configuration loaded"
    );
    Ok(config)
}

/// Renders placeholders, parses and validates. Nothing downstream re-checks
/// the configuration.
pub fn parse_project_config(raw: &str) -> Result<ProjectConfig, TidemarkError> {
    let rendered = render_env_placeholders(raw)?;
    let config: ProjectConfig =
        serde_yaml::from_str(&rendered).map_err(InfrastructureError::YamlError)?;

    // Erreurs de domaine d'abord : elles portent un code précis
    config.check_invariants()?;
    config
        .validate()
        .map_err(|e| InfrastructureError::ConfigError(e.to_string()))?;

    Ok(config)
}

pub fn find_main_config(root: &Path) -> Result<PathBuf, InfrastructureError> {
    for filename in CONFIG_CANDIDATES {
        let p = root.join(filename);
        if p.is_file() {
            return Ok(p);
        }
    }
    Err(InfrastructureError::ConfigNotFound(format!(
        "No configuration file found in {:?}. Checked: {:?}",
        root, CONFIG_CANDIDATES
    )))
}

fn apply_env_overrides(config: &mut ProjectConfig, output_dir: Option<String>) {
    if let Some(val) = output_dir.filter(|v| !v.trim().is_empty()) {
        info!(old = %config.output_dir, new = %val, "Overriding output dir via ENV");
        config.output_dir = val;
    }
}
