//! Federation engine for aerofed
//!
//! Composes one path-addressed namespace out of independent backing
//! sources.
//!
//! # Pieces
//!
//! - `Projection` maps federated regions onto source regions
//! - `FederatedRepositoryConfig` is an immutable, validated snapshot
//! - `FederatingExecutor` routes one request and merges what comes back
//! - `FederatedRepository` owns lifecycle, listeners and the config reference
//! - `FederatedRepositoryConnection` is a client session
//!
//! # Invariants
//!
//! 1. Contributions merge in projection declaration order
//! 2. A write reaches exactly one writable projection, or fails
//! 3. Every source connection an executor opens is closed before it is gone
//! 4. Requests that captured a config snapshot finish on that snapshot
//! 5. After shutdown, execution fails; termination follows the last close

mod config;
mod connection;
mod errors;
mod executor;
mod listeners;
mod merge;
mod messages;
mod problems;
mod projection;
mod repository;

pub use config::{FederatedRepositoryConfig, ProjectionDescriptor, RepositoryDescriptor};
pub use connection::FederatedRepositoryConnection;
pub use errors::{FederationError, FederationResult, Severity};
pub use executor::{FederatingExecutor, Lookup};
pub use listeners::{ForwardingListener, ListenerRegistry};
pub use merge::{
    expiry_for, merge, Contribution, ContributionKind, FederatedNode, MergePlan, PlanEntry,
};
pub use messages::{Message, MessageCatalog};
pub use problems::{Problem, ProblemSeverity, Problems};
pub use projection::{PathRule, Projection};
pub use repository::{FederatedRepository, RepositoryState};
