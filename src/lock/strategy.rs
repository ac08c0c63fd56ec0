//! Lock strategies
//!
//! A strategy decides which domains a request needs and acquires them.
//! Everything is acquired before the request is processed and released
//! after it completes, on both success and failure.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::graph::Request;

use super::errors::LockResult;
use super::provider::{DomainLock, LockProvider};

/// Chooses and acquires the locks one request needs
pub trait LockStrategy: Send + Sync {
    /// Identifier this strategy is registered under
    fn name(&self) -> &'static str;

    /// Block until every lock `request` needs is held
    fn lock(&self, request: &Request) -> LockResult<HeldLocks>;
}

/// Locks held for the duration of one request
///
/// Released exactly once: by `release()`, or on drop if the holder
/// unwinds before reaching it.
#[derive(Debug, Default)]
pub struct HeldLocks {
    locks: Vec<DomainLock>,
}

impl HeldLocks {
    pub fn none() -> Self {
        Self::default()
    }

    fn push(&mut self, lock: DomainLock) {
        self.locks.push(lock);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Domains in acquisition order
    pub fn domains(&self) -> Vec<&str> {
        self.locks.iter().map(DomainLock::domain).collect()
    }

    pub fn release(mut self) {
        self.release_all();
    }

    // Reverse acquisition order
    fn release_all(&mut self) {
        while let Some(lock) = self.locks.pop() {
            lock.release();
        }
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// One lock for the whole repository: shared for read-only requests,
/// exclusive otherwise
pub struct RepositoryLockStrategy {
    domain: String,
    provider: Arc<dyn LockProvider>,
}

impl RepositoryLockStrategy {
    pub const NAME: &'static str = "repository";

    pub fn new(domain: impl Into<String>, provider: Arc<dyn LockProvider>) -> Self {
        Self {
            domain: domain.into(),
            provider,
        }
    }
}

impl LockStrategy for RepositoryLockStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn lock(&self, request: &Request) -> LockResult<HeldLocks> {
        let mut held = HeldLocks::none();
        let lock = if request.is_read_only() {
            self.provider.read_lock_for(&self.domain)?
        } else {
            self.provider.write_lock_for(&self.domain)?
        };
        held.push(lock);
        Ok(held)
    }
}

impl fmt::Debug for RepositoryLockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryLockStrategy")
            .field("domain", &self.domain)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// One lock per workspace the request touches
///
/// A shared lock on the scope itself comes first, so a repository-level
/// writer over the same provider and scope still excludes every workspace
/// writer. Changed workspaces are write-locked next, then workspaces that
/// are only read are read-locked. Both groups are taken in ascending name
/// order, so two requests can never wait on each other in a cycle.
///
/// Workspaces are the names the request carries, so two names that a
/// projection pins onto one source workspace are not isolated from each
/// other. A federated repository with pinned projections runs with
/// repository locking instead.
pub struct WorkspaceLockStrategy {
    scope: String,
    provider: Arc<dyn LockProvider>,
}

impl WorkspaceLockStrategy {
    pub const NAME: &'static str = "workspace";

    /// `scope` prefixes every workspace domain so that sources sharing a
    /// provider do not contend on equally named workspaces
    pub fn new(scope: impl Into<String>, provider: Arc<dyn LockProvider>) -> Self {
        Self {
            scope: scope.into(),
            provider,
        }
    }

    fn domain(&self, workspace: &str) -> String {
        format!("{}/{}", self.scope, workspace)
    }
}

impl LockStrategy for WorkspaceLockStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn lock(&self, request: &Request) -> LockResult<HeldLocks> {
        let mut read = BTreeSet::new();
        let mut changed = BTreeSet::new();
        request.classify_workspaces(&mut read, &mut changed);

        // On early return `held` drops and releases what was already taken
        let mut held = HeldLocks::none();
        held.push(self.provider.read_lock_for(&self.scope)?);
        for workspace in &changed {
            held.push(self.provider.write_lock_for(&self.domain(workspace))?);
        }
        for workspace in read.difference(&changed) {
            held.push(self.provider.read_lock_for(&self.domain(workspace))?);
        }
        Ok(held)
    }
}

impl fmt::Debug for WorkspaceLockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceLockStrategy")
            .field("scope", &self.scope)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Acquires nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLockStrategy;

impl NoLockStrategy {
    pub const NAME: &'static str = "none";
}

impl LockStrategy for NoLockStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn lock(&self, _request: &Request) -> LockResult<HeldLocks> {
        Ok(HeldLocks::none())
    }
}
