//! Cloud provider error taxonomy.

use thiserror::Error;

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    /// The instance does not exist at the provider.
    #[error("instance not found: {0}")]
    NotFound(String),

    /// Retryable failure: timeout, throttling, connectivity.
    #[error("transient cloud provider error: {0}")]
    Transient(String),

    /// Non-retryable failure: authorization, validation, quota policy.
    #[error("permanent cloud provider error: {0}")]
    Permanent(String),
}

impl CloudError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(CloudError::NotFound("i-1".into()).is_not_found());
        assert!(!CloudError::NotFound("i-1".into()).is_retryable());
        assert!(CloudError::Transient("throttled".into()).is_retryable());
        assert!(!CloudError::Permanent("forbidden".into()).is_retryable());
        assert!(!CloudError::Permanent("forbidden".into()).is_not_found());
    }
}
