//! Connector error types
//!
//! Raised by backing sources when a request cannot be processed at all.
//! A missing node is not a connector error; it is recorded on the request.

use thiserror::Error;

/// Result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Backing-source failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// The source cannot be reached or refuses connections
    #[error("source '{source_name}' is unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    /// Storage or transport failure while processing a request
    #[error("I/O failure: {0}")]
    Io(String),

    /// The connection was used after `close()`
    #[error("connection to source '{0}' is closed")]
    Closed(String),

    /// The source failed in a way it could not classify
    #[error("internal source error: {0}")]
    Internal(String),
}

impl ConnectorError {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            ConnectorError::Unavailable { .. } => "CONNECTOR_UNAVAILABLE",
            ConnectorError::Io(_) => "CONNECTOR_IO",
            ConnectorError::Closed(_) => "CONNECTOR_CLOSED",
            ConnectorError::Internal(_) => "CONNECTOR_INTERNAL",
        }
    }

    pub fn unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConnectorError::Unavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        ConnectorError::Io(err.to_string())
    }
}
