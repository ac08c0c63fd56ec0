//! Federated repository
//!
//! The façade clients connect to. It owns the current configuration
//! snapshot, the listener registry, and the connection accounting that
//! drives shutdown.
//!
//! # Lifecycle
//!
//! ```text
//! Created --start--> Running --shutdown--> ShutdownRequested --last close--> Terminated
//! ```
//!
//! Shutdown with no open connections terminates immediately. Otherwise the
//! last connection to close opens the termination gate.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use crate::connector::{
    ConnectionFactory, ConnectorError, ConnectorResult, RepositoryConnection, RepositoryListener, RepositorySource,
};
use crate::graph::CachePolicy;
use crate::lock::{LockManager, LockProvider, LockStrategy, RepositoryLockStrategy};
use crate::observability::{log_event_with_fields, Event, FederationMetrics, MetricsSnapshot};

use super::config::FederatedRepositoryConfig;
use super::connection::FederatedRepositoryConnection;
use super::errors::{FederationError, FederationResult};
use super::listeners::ListenerRegistry;
use super::messages::Message;

/// Repository lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    Created,
    Running,
    ShutdownRequested,
    Terminated,
}

impl fmt::Display for RepositoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryState::Created => write!(f, "CREATED"),
            RepositoryState::Running => write!(f, "RUNNING"),
            RepositoryState::ShutdownRequested => write!(f, "SHUTDOWN_REQUESTED"),
            RepositoryState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

struct Lifecycle {
    state: RepositoryState,
    open_connections: usize,
}

/// Configuration and the lock strategy resolved from it, swapped together.
/// The provider outlives swaps so locks held under a replaced strategy
/// still exclude requests admitted under its successor.
#[derive(Clone)]
pub(crate) struct Snapshot {
    pub(crate) config: Arc<FederatedRepositoryConfig>,
    pub(crate) locking: Arc<dyn LockStrategy>,
    pub(crate) provider: Arc<dyn LockProvider>,
}

impl Snapshot {
    fn resolve(config: Arc<FederatedRepositoryConfig>, retained: Option<Arc<dyn LockProvider>>) -> Self {
        // Unresolvable identifiers were recorded when the config was built.
        let resolved = LockManager::new(config.lock_settings().clone()).resolve_with(config.name(), retained);
        let locking: Arc<dyn LockStrategy> = if config.widens_workspace_locking() {
            Arc::new(RepositoryLockStrategy::new(config.name(), Arc::clone(&resolved.provider)))
        } else {
            resolved.strategy
        };
        Self {
            config,
            locking,
            provider: resolved.provider,
        }
    }
}

pub struct FederatedRepository {
    name: String,
    snapshot: RwLock<Snapshot>,
    factory: Arc<dyn ConnectionFactory>,
    listeners: Arc<ListenerRegistry>,
    metrics: Arc<FederationMetrics>,
    lifecycle: Mutex<Lifecycle>,
    terminated: Condvar,
    this: Weak<FederatedRepository>,
}

impl FederatedRepository {
    /// A repository in the `Created` state. No source is contacted until a
    /// request needs it.
    pub fn new(config: FederatedRepositoryConfig, factory: Arc<dyn ConnectionFactory>) -> Arc<Self> {
        let config = Arc::new(config);
        Arc::new_cyclic(|this| Self {
            name: config.name().to_string(),
            snapshot: RwLock::new(Snapshot::resolve(config, None)),
            factory,
            listeners: Arc::new(ListenerRegistry::new()),
            metrics: Arc::new(FederationMetrics::new()),
            lifecycle: Mutex::new(Lifecycle {
                state: RepositoryState::Created,
                open_connections: 0,
            }),
            terminated: Condvar::new(),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Created -> Running. Starting a running repository is a no-op.
    pub fn start(&self) -> FederationResult<()> {
        let mut lifecycle = self.lifecycle();
        match lifecycle.state {
            RepositoryState::Created => {
                lifecycle.state = RepositoryState::Running;
                log_event_with_fields(Event::RepositoryStarted, &[("repository", &self.name)]);
                Ok(())
            }
            RepositoryState::Running => Ok(()),
            _ => Err(FederationError::ShutDown(self.name.clone())),
        }
    }

    pub fn state(&self) -> RepositoryState {
        self.lifecycle().state
    }

    /// True until shutdown has been requested
    pub fn is_running(&self) -> bool {
        matches!(
            self.lifecycle().state,
            RepositoryState::Created | RepositoryState::Running
        )
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle().state == RepositoryState::Terminated
    }

    pub fn open_connections(&self) -> usize {
        self.lifecycle().open_connections
    }

    /// Open a session presenting this repository as `source_name`. The user
    /// is carried along for the layers that authenticate; it is not checked here.
    pub fn create_connection(
        &self,
        source_name: impl Into<String>,
        user: Option<String>,
    ) -> FederationResult<FederatedRepositoryConnection> {
        let repository = self
            .this
            .upgrade()
            .ok_or_else(|| FederationError::ShutDown(self.name.clone()))?;
        Ok(FederatedRepositoryConnection::open(repository, source_name.into(), user))
    }

    /// Reject new work; terminate as soon as no connection is open
    pub fn shutdown(&self) {
        let mut lifecycle = self.lifecycle();
        if matches!(
            lifecycle.state,
            RepositoryState::ShutdownRequested | RepositoryState::Terminated
        ) {
            return;
        }
        lifecycle.state = RepositoryState::ShutdownRequested;
        let open = lifecycle.open_connections.to_string();
        log_event_with_fields(
            Event::ShutdownRequested,
            &[("repository", &self.name), ("open_connections", &open)],
        );
        if lifecycle.open_connections == 0 {
            self.terminate(&mut lifecycle);
        }
    }

    /// Block until terminated or `timeout` elapses; true if terminated
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let lifecycle = self.lifecycle();
        let (lifecycle, _) = self
            .terminated
            .wait_timeout_while(lifecycle, timeout, |lifecycle| {
                lifecycle.state != RepositoryState::Terminated
            })
            .unwrap_or_else(PoisonError::into_inner);
        lifecycle.state == RepositoryState::Terminated
    }

    /// Current configuration. Callers keep the snapshot they took even if it
    /// is replaced meanwhile.
    pub fn configuration(&self) -> Arc<FederatedRepositoryConfig> {
        Arc::clone(&self.snapshot().config)
    }

    /// Replace the configuration for requests that start from now on;
    /// returns the previous one
    pub fn set_configuration(&self, config: FederatedRepositoryConfig) -> Arc<FederatedRepositoryConfig> {
        let config = Arc::new(config);
        let message = config
            .messages()
            .render(Message::ConfigurationReplaced, &[self.name.as_str()]);
        let previous = {
            let mut current = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            let next = Snapshot::resolve(config, Some(Arc::clone(&current.provider)));
            std::mem::replace(&mut *current, next)
        };
        log_event_with_fields(
            Event::ConfigurationSwapped,
            &[("repository", &self.name), ("message", &message)],
        );
        previous.config
    }

    pub fn default_cache_policy(&self) -> Option<CachePolicy> {
        self.snapshot().config.default_cache_policy()
    }

    pub fn add_listener(&self, listener: Arc<dyn RepositoryListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RepositoryListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn current(&self) -> Snapshot {
        self.snapshot().clone()
    }

    pub(crate) fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::clone(&self.factory)
    }

    pub(crate) fn listeners(&self) -> Arc<ListenerRegistry> {
        Arc::clone(&self.listeners)
    }

    pub(crate) fn metrics_handle(&self) -> Arc<FederationMetrics> {
        Arc::clone(&self.metrics)
    }

    pub(crate) fn register_connection(&self) {
        self.lifecycle().open_connections += 1;
        self.metrics.increment_connections_opened();
    }

    pub(crate) fn unregister_connection(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.open_connections = lifecycle.open_connections.saturating_sub(1);
        self.metrics.increment_connections_closed();
        if lifecycle.open_connections == 0 && lifecycle.state == RepositoryState::ShutdownRequested {
            self.terminate(&mut lifecycle);
        }
    }

    fn terminate(&self, lifecycle: &mut Lifecycle) {
        lifecycle.state = RepositoryState::Terminated;
        self.terminated.notify_all();
        log_event_with_fields(Event::RepositoryTerminated, &[("repository", &self.name)]);
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FederatedRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedRepository")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("open_connections", &self.open_connections())
            .finish()
    }
}

/// A federated repository can back another federated repository
impl RepositorySource for FederatedRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> ConnectorResult<Box<dyn RepositoryConnection>> {
        let connection = self
            .create_connection(self.name.clone(), None)
            .map_err(|err| ConnectorError::unavailable(&self.name, err.to_string()))?;
        Ok(Box::new(connection))
    }

    fn default_cache_policy(&self) -> Option<CachePolicy> {
        FederatedRepository::default_cache_policy(self)
    }
}
