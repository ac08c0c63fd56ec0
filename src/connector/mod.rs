//! Connector interfaces for aerofed
//!
//! A backing source is anything that can process `Request`s over a
//! connection. The federation layer only ever talks to sources through
//! these traits, so in-memory, relational, or remote stores plug in the
//! same way (and a federated repository can itself be a source).
//!
//! # Connection contract
//!
//! - `execute` fills the request in place; a missing node is recorded on
//!   the request, not returned as an error
//! - `close` is idempotent; a closed connection refuses further requests
//! - a connection is used by one thread at a time

mod errors;
mod listener;
mod memory;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use crate::graph::{CachePolicy, ExecutionContext, Request};

pub use errors::{ConnectorError, ConnectorResult};
pub use listener::{ChangeEvent, ChangeKind, NoOpListener, RepositoryListener};
pub use memory::{InMemoryConnection, InMemoryRepositorySource};
pub use registry::SourceRegistry;

/// A live session against one source
pub trait RepositoryConnection: Send {
    /// Name of the source this connection talks to
    fn source_name(&self) -> &str;

    /// Whether the source answers within `timeout`
    fn ping(&self, timeout: Duration) -> bool;

    /// Cache policy applied to results that carry none of their own
    fn default_cache_policy(&self) -> Option<CachePolicy>;

    /// Replace the change listener; `None` restores the no-op listener
    fn set_listener(&mut self, listener: Option<Arc<dyn RepositoryListener>>);

    /// Process `request` in place
    fn execute(&mut self, context: &ExecutionContext, request: &mut Request) -> ConnectorResult<()>;

    /// Release the connection
    fn close(&mut self) -> ConnectorResult<()>;
}

/// Opens connections to sources by name
pub trait ConnectionFactory: Send + Sync {
    fn create_connection(&self, source_name: &str) -> ConnectorResult<Box<dyn RepositoryConnection>>;
}

/// A named backing source
pub trait RepositorySource: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self) -> ConnectorResult<Box<dyn RepositoryConnection>>;

    fn default_cache_policy(&self) -> Option<CachePolicy> {
        None
    }
}
