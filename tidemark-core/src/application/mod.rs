// tidemark-core/src/application/mod.rs

pub mod accessors;
pub mod cleanup;
pub mod context;
pub mod driver;
pub mod ports;
pub mod query;
pub mod sync;
pub mod templates;

// --- RE-EXPORTS (FACADE PATTERN) ---
// Le CLI fait `use tidemark_core::application::{sync_databases, QueryRegistry};`
// sans connaître la structure interne des fichiers.

pub use cleanup::reconcile;
pub use context::TableContext;
pub use driver::{DATABASES_PROVIDER, select_databases, sync_databases};
pub use query::{QueryRegistry, QueryService, annotate_sql};
pub use sync::sync_database;
pub use templates::{TemplateRenderSummary, render_user_templates, template_context};
