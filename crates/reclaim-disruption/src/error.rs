//! Disruption error types.

use thiserror::Error;

/// Errors that fail a whole evaluation pass.
///
/// Per-candidate failures (oracle calls, provider calls) are logged and
/// reported as events instead; they never abort the pass.
#[derive(Debug, Error)]
pub enum DisruptionError {
    #[error("state store error: {0}")]
    State(#[from] reclaim_state::StateError),
}

pub type DisruptionResult<T> = Result<T, DisruptionError>;
