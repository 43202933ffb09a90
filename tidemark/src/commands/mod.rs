// tidemark/src/commands/mod.rs

pub mod query;
pub mod serve;
pub mod sync;
