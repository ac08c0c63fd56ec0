//! Federation error types
//!
//! Error codes:
//! - FED_CONFIGURATION (FATAL)
//! - FED_PATH_NOT_FOUND (ERROR)
//! - FED_NOT_COVERED (ERROR)
//! - FED_AMBIGUOUS_OWNERSHIP (FATAL)
//! - FED_READ_ONLY (ERROR)
//! - FED_UNSUPPORTED (ERROR)
//! - FED_SOURCE_FAILED (ERROR)
//! - FED_REQUEST_FAILED (ERROR)
//! - FED_SHUT_DOWN (ERROR)
//! - FED_CONNECTION_CLOSED (ERROR)
//! - FED_LOCK_FAILED (FATAL)
//! - FED_INVALID_PATH (ERROR)
//!
//! A path that is simply absent on a read is not an error here; it is
//! recorded on the request. `PathNotFound` is raised only when a write
//! names a target that must exist.

use std::fmt;

use thiserror::Error;

use crate::connector::ConnectorError;
use crate::graph::{Path, PathError, RequestError};
use crate::lock::LockError;

/// Result type for federation operations
pub type FederationResult<T> = Result<T, FederationError>;

/// Severity levels for federation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Request fails, repository continues
    Error,
    /// Repository configuration or resources are unusable
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Federation errors
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("invalid configuration for repository '{repository}': {message}")]
    Configuration { repository: String, message: String },

    #[error("no node exists at {path} in repository '{repository}'")]
    PathNotFound { repository: String, path: Path },

    #[error("{path} is not covered by any projection of repository '{repository}'")]
    NotCovered { repository: String, path: Path },

    #[error("{path} is owned by more than one writable projection: {}", .sources.join(", "))]
    AmbiguousOwnership { path: Path, sources: Vec<String> },

    #[error("cannot {operation} at {path}: projection of source '{source_name}' is read-only")]
    ReadOnly {
        source_name: String,
        path: Path,
        operation: &'static str,
    },

    #[error("unsupported request: {0}")]
    Unsupported(String),

    #[error("source '{source_name}' of repository '{repository}' failed at {path}: {cause}")]
    SourceFailure {
        repository: String,
        source_name: String,
        path: Path,
        #[source]
        cause: ConnectorError,
    },

    #[error("source '{source_name}' could not apply request at {path}: {error}")]
    Request {
        source_name: String,
        path: Path,
        error: RequestError,
    },

    #[error("repository '{0}' has been shut down")]
    ShutDown(String),

    #[error("connection to '{0}' is closed")]
    Closed(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    InvalidPath(#[from] PathError),
}

impl FederationError {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            FederationError::Configuration { .. } => "FED_CONFIGURATION",
            FederationError::PathNotFound { .. } => "FED_PATH_NOT_FOUND",
            FederationError::NotCovered { .. } => "FED_NOT_COVERED",
            FederationError::AmbiguousOwnership { .. } => "FED_AMBIGUOUS_OWNERSHIP",
            FederationError::ReadOnly { .. } => "FED_READ_ONLY",
            FederationError::Unsupported(_) => "FED_UNSUPPORTED",
            FederationError::SourceFailure { .. } => "FED_SOURCE_FAILED",
            FederationError::Request { .. } => "FED_REQUEST_FAILED",
            FederationError::ShutDown(_) => "FED_SHUT_DOWN",
            FederationError::Closed(_) => "FED_CONNECTION_CLOSED",
            FederationError::Lock(_) => "FED_LOCK_FAILED",
            FederationError::InvalidPath(_) => "FED_INVALID_PATH",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            FederationError::Configuration { .. }
            | FederationError::AmbiguousOwnership { .. }
            | FederationError::Lock(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// True for the "nothing there" family
    pub fn is_not_found(&self) -> bool {
        match self {
            FederationError::PathNotFound { .. } | FederationError::NotCovered { .. } => true,
            FederationError::Request { error, .. } => error.is_not_found(),
            _ => false,
        }
    }

    /// Name of the backing source involved, if any
    pub fn source_name(&self) -> Option<&str> {
        match self {
            FederationError::ReadOnly { source_name, .. }
            | FederationError::SourceFailure { source_name, .. }
            | FederationError::Request { source_name, .. } => Some(source_name),
            _ => None,
        }
    }
}
