use super::types::StoreKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Store '{0}' unavailable: {1}")]
    StoreUnavailable(StoreKind, String),

    #[error("Delete feed unsupported on '{0}': {1}")]
    FeedUnsupported(StoreKind, String),

    #[error("Delete feed on '{0}' lagged, {1} notification(s) missed")]
    FeedLagged(StoreKind, u64),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl LinkError {
    /// Whether the next watcher event or sweep run can be expected to succeed
    /// where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::StoreUnavailable(..) | LinkError::FeedLagged(..)
        )
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

impl From<tokio::task::JoinError> for LinkError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::ExecutionError(format!("task join: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LinkError::StoreUnavailable(StoreKind::Accounts, "down".into()).is_retryable());
        assert!(LinkError::FeedLagged(StoreKind::Profiles, 3).is_retryable());
        assert!(!LinkError::FeedUnsupported(StoreKind::Profiles, "no pre-images".into()).is_retryable());
        assert!(!LinkError::InvalidConfig("zero interval".into()).is_retryable());
    }

    #[test]
    fn test_error_display_names_store() {
        let err = LinkError::StoreUnavailable(StoreKind::Accounts, "connection reset".into());
        assert_eq!(err.to_string(), "Store 'accounts' unavailable: connection reset");
    }
}
