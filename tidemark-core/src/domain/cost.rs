// tidemark-core/src/domain/cost.rs
//
// BigQuery on-demand pricing guard.

use crate::domain::error::DomainError;

/// USD per TiB scanned.
pub const PRICE_PER_TIB: f64 = 6.25;

const BYTES_PER_TIB: f64 = 1_099_511_627_776.0; // 2^40
const BYTES_PER_GIB: f64 = 1_073_741_824.0; // 2^30

pub fn estimated_cost(bytes_processed: u64) -> f64 {
    bytes_processed as f64 / BYTES_PER_TIB * PRICE_PER_TIB
}

pub fn gigabytes(bytes_processed: u64) -> f64 {
    bytes_processed as f64 / BYTES_PER_GIB
}

/// Rejects a query whose dry-run scan would cost more than `max_cost`.
pub fn check_query_cost(bytes_processed: u64, max_cost: f64) -> Result<(), DomainError> {
    let cost = estimated_cost(bytes_processed);
    if cost > max_cost {
        return Err(DomainError::CostLimitExceeded {
            gb_processed: gigabytes(bytes_processed),
            estimated_cost: cost,
            max_cost,
        });
    }
    Ok(())
}
