//! Observability events for aerofed
//!
//! Events are explicit and typed. Each maps to the stable name written in
//! the `event` field of a log line.

use std::fmt;

use super::logger::Severity;

/// Observable events in the federation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Repository lifecycle
    /// Repository started
    RepositoryStarted,
    /// Shutdown requested; new work is rejected
    ShutdownRequested,
    /// Last connection drained after shutdown
    RepositoryTerminated,
    /// Configuration snapshot replaced
    ConfigurationSwapped,

    // Connections
    /// Client connection opened
    ConnectionOpened,
    /// Client connection closed
    ConnectionClosed,
    /// Closing a per-source connection failed
    SourceCloseFailed,

    // Requests
    /// A request failed and the error was propagated
    RequestFailed,
    /// The merge cache could not be updated
    CacheUpdateFailed,
    /// A path was not covered by any projection
    ProjectionUnresolved,

    // Locking
    /// Lock identifiers could not be resolved, defaults used
    LockFallback,
}

impl Event {
    /// Returns the event name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::RepositoryStarted => "REPOSITORY_STARTED",
            Event::ShutdownRequested => "SHUTDOWN_REQUESTED",
            Event::RepositoryTerminated => "REPOSITORY_TERMINATED",
            Event::ConfigurationSwapped => "CONFIGURATION_SWAPPED",
            Event::ConnectionOpened => "CONNECTION_OPENED",
            Event::ConnectionClosed => "CONNECTION_CLOSED",
            Event::SourceCloseFailed => "SOURCE_CLOSE_FAILED",
            Event::RequestFailed => "REQUEST_FAILED",
            Event::CacheUpdateFailed => "CACHE_UPDATE_FAILED",
            Event::ProjectionUnresolved => "PROJECTION_UNRESOLVED",
            Event::LockFallback => "LOCK_FALLBACK",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::ConnectionOpened | Event::ConnectionClosed | Event::ProjectionUnresolved => {
                Severity::Trace
            }
            Event::SourceCloseFailed | Event::CacheUpdateFailed | Event::LockFallback => {
                Severity::Warn
            }
            Event::RequestFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
