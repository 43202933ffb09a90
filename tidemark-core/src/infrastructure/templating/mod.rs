pub mod builtin;
pub mod jinja;

pub use jinja::{JinjaRenderer, render_env_placeholders};
