// tidemark-core/src/infrastructure/adapters/mod.rs

pub mod bigquery;
pub mod common;
pub mod databricks;
pub mod duckdb;
pub mod factory;
pub mod postgres;
pub mod snowflake;

pub use factory::BackendConnectorFactory;
