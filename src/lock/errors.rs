//! Lock subsystem error types
//!
//! Error codes:
//! - FED_LOCK_PROVIDER_UNAVAILABLE (FATAL)
//! - FED_LOCK_UNKNOWN_PROVIDER (ERROR)
//! - FED_LOCK_UNKNOWN_STRATEGY (ERROR)

use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Lock errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The provider cannot hand out a lock for the domain
    #[error("lock provider '{provider}' cannot provide a lock for domain '{domain}': {reason}")]
    ProviderUnavailable {
        provider: String,
        domain: String,
        reason: String,
    },

    /// No provider is registered under the identifier
    #[error("unknown lock provider '{0}'")]
    UnknownProvider(String),

    /// No strategy is registered under the identifier
    #[error("unknown lock strategy '{0}'")]
    UnknownStrategy(String),
}

impl LockError {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            LockError::ProviderUnavailable { .. } => "FED_LOCK_PROVIDER_UNAVAILABLE",
            LockError::UnknownProvider(_) => "FED_LOCK_UNKNOWN_PROVIDER",
            LockError::UnknownStrategy(_) => "FED_LOCK_UNKNOWN_STRATEGY",
        }
    }

    /// A provider that cannot lock is a fatal resource error
    pub fn is_fatal(&self) -> bool {
        matches!(self, LockError::ProviderUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LockError::UnknownProvider("x".into()).code(),
            "FED_LOCK_UNKNOWN_PROVIDER"
        );
        assert_eq!(
            LockError::UnknownStrategy("x".into()).code(),
            "FED_LOCK_UNKNOWN_STRATEGY"
        );
    }

    #[test]
    fn test_provider_unavailable_is_fatal() {
        let err = LockError::ProviderUnavailable {
            provider: "cluster".into(),
            domain: "repo".into(),
            reason: "quorum lost".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("quorum lost"));
        assert!(!LockError::UnknownStrategy("x".into()).is_fatal());
    }
}
