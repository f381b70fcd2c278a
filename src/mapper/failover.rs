//! Candidate failover.
//!
//! Walks mapped targets in order and borrows a connection from the first
//! one whose pool can supply it. `EndpointUnavailable` on one candidate
//! moves on to the next; when every candidate fails the request is
//! answered as not found.

use crate::mapper::Target;
use crate::pool::{BorrowedConnection, ConnectionPool, EndpointUnavailable};

/// Borrow a connection to the first usable target.
///
/// Returns every failure, in order, when no target yields a connection.
pub async fn acquire_first(
    pool: &ConnectionPool,
    targets: Vec<Target>,
) -> Result<(Target, BorrowedConnection), Vec<EndpointUnavailable>> {
    let mut failures = Vec::new();
    for target in targets {
        match pool.acquire(&target.key).await {
            Ok(connection) => return Ok((target, connection)),
            Err(e) => {
                tracing::warn!(backend = %target.backend_id, error = %e, "Backend unavailable, trying next candidate");
                failures.push(e);
            }
        }
    }
    Err(failures)
}
