pub mod cost;
pub mod error;
pub mod filter;
pub mod format;
pub mod project;
pub mod sync;

// Re-exports pratiques pour simplifier les imports ailleurs
pub use error::DomainError;
pub use filter::{TableFilter, TablePattern};
