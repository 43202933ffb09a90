use crate::error::TidemarkError;

/// Renders markdown from plain JSON contexts. Accessors go through named
/// templates; project `*.j2` files are rendered from source.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, name: &str, context: &serde_json::Value) -> Result<String, TidemarkError>;

    fn render_str(&self, source: &str, context: &serde_json::Value)
    -> Result<String, TidemarkError>;
}
