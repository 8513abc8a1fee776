use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the tracker's host-visible wait operations.
///
/// Everything else in the crate is infallible: missing handles resolve to
/// "nothing to track" and internal invariant violations degrade to no-ops
/// (see the `state_bug!` macro). The tracker must keep collecting evidence
/// while the client misbehaves.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("wait did not complete within {0:?}")]
    WaitTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
