pub mod outcome;
pub mod state;

pub use outcome::{DatabaseSyncOutcome, SyncStatus, SyncSummary};
pub use state::SyncState;
