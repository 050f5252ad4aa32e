//! Termination error types.

use thiserror::Error;

use reclaim_cloud::CloudError;
use reclaim_state::StateError;

/// Errors returned by the termination state machine.
///
/// None of these abort the process; callers classify and retry.
#[derive(Debug, Error)]
pub enum TerminationError {
    #[error("cloud provider error: {0}")]
    Cloud(#[from] CloudError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("claim {0} is launched but has no provider id")]
    MissingProviderId(String),
}

impl TerminationError {
    /// Whether retrying the same call later can succeed without outside
    /// intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            TerminationError::Cloud(e) => e.is_retryable(),
            TerminationError::State(e) => e.is_storage(),
            TerminationError::MissingProviderId(_) => false,
        }
    }

    /// Failures that need a human or a policy change to clear.
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }
}

pub type TerminationResult<T> = Result<T, TerminationError>;
