//! Locking subsystem for aerofed
//!
//! Per-request isolation for federated and backing-source execution.
//!
//! # Layers
//!
//! - `LockProvider` hands out reader/writer locks by domain
//! - `LockStrategy` picks the domains a request needs and acquires them
//! - `LockManager` resolves configured identifiers into a strategy
//!
//! # Invariants
//!
//! 1. Readers of a domain share; a writer excludes everyone on that domain
//! 2. All locks for a request are held before processing and released after
//! 3. Workspace locks are taken writes-first, each group in ascending order
//! 4. Unknown identifiers fall back to in-process + repository locking

mod errors;
mod manager;
mod provider;
mod strategy;

pub use errors::{LockError, LockResult};
pub use manager::{
    LockManager, LockRegistry, LockSettings, ProviderConstructor, ResolvedLocking,
    StrategyConstructor,
};
pub use provider::{DomainLock, InProcessLockProvider, LockMode, LockProvider};
pub use strategy::{
    HeldLocks, LockStrategy, NoLockStrategy, RepositoryLockStrategy, WorkspaceLockStrategy,
};
