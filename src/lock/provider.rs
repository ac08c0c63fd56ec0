//! Lock providers
//!
//! A provider hands out reader/writer locks keyed by an opaque domain
//! string. Readers of one domain are compatible with each other; a writer
//! excludes everyone else on that domain. Domains are independent.
//!
//! Acquisition blocks the calling thread. Ordering across domains is the
//! caller's (strategy's) concern, not the provider's.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::errors::LockResult;

/// Shared or exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

/// Creates mutual-exclusion primitives keyed by domain
pub trait LockProvider: Send + Sync {
    /// Identifier this provider is registered under
    fn name(&self) -> &str;

    /// Block until a shared lock on `domain` is held
    fn read_lock_for(&self, domain: &str) -> LockResult<DomainLock>;

    /// Block until an exclusive lock on `domain` is held
    fn write_lock_for(&self, domain: &str) -> LockResult<DomainLock>;
}

/// One acquired lock. Released by `release()` or on drop, whichever comes first.
pub struct DomainLock {
    domain: String,
    mode: LockMode,
    unlock: Option<Box<dyn FnOnce() + Send>>,
}

impl DomainLock {
    /// Wrap an acquired lock; `unlock` runs exactly once
    pub fn new(domain: impl Into<String>, mode: LockMode, unlock: impl FnOnce() + Send + 'static) -> Self {
        Self {
            domain: domain.into(),
            mode,
            unlock: Some(Box::new(unlock)),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release now
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(unlock) = self.unlock.take() {
            unlock();
        }
    }
}

impl Drop for DomainLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl fmt::Debug for DomainLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainLock")
            .field("domain", &self.domain)
            .field("mode", &self.mode)
            .field("held", &self.unlock.is_some())
            .finish()
    }
}

/// Reader/writer state for one domain
#[derive(Debug, Default)]
struct RwState {
    readers: usize,
    writer: bool,
    /// Writers blocked in `acquire_write`; new readers queue behind them
    waiting_writers: usize,
}

#[derive(Debug, Default)]
struct RwGate {
    state: Mutex<RwState>,
    changed: Condvar,
}

impl RwGate {
    fn state(&self) -> MutexGuard<'_, RwState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire_read(&self) {
        let mut state = self.state();
        while state.writer || state.waiting_writers > 0 {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.readers += 1;
    }

    fn acquire_write(&self) {
        let mut state = self.state();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.waiting_writers -= 1;
        state.writer = true;
    }

    fn release_read(&self) {
        let mut state = self.state();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.changed.notify_all();
        }
    }

    fn release_write(&self) {
        let mut state = self.state();
        state.writer = false;
        self.changed.notify_all();
    }
}

/// Provider backed by in-process monitors; the default
#[derive(Debug, Default)]
pub struct InProcessLockProvider {
    gates: Mutex<HashMap<String, Arc<RwGate>>>,
}

impl InProcessLockProvider {
    pub const NAME: &'static str = "in-process";

    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, domain: &str) -> Arc<RwGate> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(domain.to_string()).or_default())
    }

    /// Number of domains this provider has handed locks out for
    pub fn domain_count(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LockProvider for InProcessLockProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn read_lock_for(&self, domain: &str) -> LockResult<DomainLock> {
        let gate = self.gate(domain);
        gate.acquire_read();
        Ok(DomainLock::new(domain, LockMode::Read, move || gate.release_read()))
    }

    fn write_lock_for(&self, domain: &str) -> LockResult<DomainLock> {
        let gate = self.gate(domain);
        gate.acquire_write();
        Ok(DomainLock::new(domain, LockMode::Write, move || {
            gate.release_write()
        }))
    }
}
