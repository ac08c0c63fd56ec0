//! Federated repository connection
//!
//! A client session: Open -> Closed, one way. Each `execute` takes the
//! repository's current configuration snapshot, locks per its strategy,
//! and runs the request through a fresh `FederatingExecutor`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::connector::{
    ConnectorError, ConnectorResult, NoOpListener, RepositoryConnection, RepositoryListener,
};
use crate::graph::{CachePolicy, ExecutionContext, Request};
use crate::observability::{log_event_with_fields, Event};

use super::errors::{FederationError, FederationResult};
use super::executor::FederatingExecutor;
use super::repository::FederatedRepository;

pub struct FederatedRepositoryConnection {
    repository: Arc<FederatedRepository>,
    source_name: String,
    user: Option<String>,
    listener: Arc<dyn RepositoryListener>,
    closed: bool,
}

impl FederatedRepositoryConnection {
    /// Register a new session with `repository`
    pub(crate) fn open(repository: Arc<FederatedRepository>, source_name: String, user: Option<String>) -> Self {
        repository.register_connection();
        let listener = NoOpListener::shared();
        repository.add_listener(Arc::clone(&listener));
        log_event_with_fields(
            Event::ConnectionOpened,
            &[("repository", repository.name()), ("source", &source_name)],
        );
        Self {
            repository,
            source_name,
            user,
            listener,
            closed: false,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn repository(&self) -> &Arc<FederatedRepository> {
        &self.repository
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run one request (a composite counts as one)
    pub fn execute(&mut self, context: &ExecutionContext, request: &mut Request) -> FederationResult<()> {
        self.execute_all(context, std::slice::from_mut(request))
    }

    /// Run `requests` in order through one executor; stops at the first error
    pub fn execute_all(&mut self, context: &ExecutionContext, requests: &mut [Request]) -> FederationResult<()> {
        if self.closed {
            return Err(FederationError::Closed(self.source_name.clone()));
        }
        if !self.repository.is_running() {
            return Err(FederationError::ShutDown(self.repository.name().to_string()));
        }

        let snapshot = self.repository.current();
        let mut executor = FederatingExecutor::new(snapshot.config, self.repository.factory())
            .with_listener(self.repository.listeners())
            .with_metrics(self.repository.metrics_handle())
            .with_lock_provider(snapshot.provider);

        for request in requests.iter_mut() {
            let held = snapshot.locking.lock(request)?;
            let result = executor.execute(context, request);
            held.release();
            result?;
        }
        executor.close();
        Ok(())
    }

    /// Replace this session's listener; `None` installs a no-op listener
    pub fn set_listener(&mut self, listener: Option<Arc<dyn RepositoryListener>>) {
        let next = listener.unwrap_or_else(NoOpListener::shared);
        self.repository.remove_listener(&self.listener);
        self.repository.add_listener(Arc::clone(&next));
        self.listener = next;
    }

    /// True while the repository accepts work; no source is contacted
    pub fn ping(&self, _timeout: Duration) -> bool {
        !self.closed && self.repository.is_running()
    }

    /// Deregister the listener, then the connection. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.repository.remove_listener(&self.listener);
        self.repository.unregister_connection();
        log_event_with_fields(
            Event::ConnectionClosed,
            &[("repository", self.repository.name()), ("source", &self.source_name)],
        );
    }
}

impl Drop for FederatedRepositoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for FederatedRepositoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedRepositoryConnection")
            .field("repository", &self.repository.name())
            .field("source_name", &self.source_name)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Lets a federated repository serve as a backing source. Outcome errors
/// stay on the request, as the connector contract expects.
impl RepositoryConnection for FederatedRepositoryConnection {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn ping(&self, timeout: Duration) -> bool {
        FederatedRepositoryConnection::ping(self, timeout)
    }

    fn default_cache_policy(&self) -> Option<CachePolicy> {
        self.repository.default_cache_policy()
    }

    fn set_listener(&mut self, listener: Option<Arc<dyn RepositoryListener>>) {
        FederatedRepositoryConnection::set_listener(self, listener)
    }

    fn execute(&mut self, context: &ExecutionContext, request: &mut Request) -> ConnectorResult<()> {
        match FederatedRepositoryConnection::execute(self, context, request) {
            Ok(()) | Err(FederationError::Request { .. }) => Ok(()),
            Err(FederationError::Closed(name)) => Err(ConnectorError::Closed(name)),
            Err(err @ FederationError::ShutDown(_)) => {
                Err(ConnectorError::unavailable(&self.source_name, err.to_string()))
            }
            Err(err) => Err(ConnectorError::Internal(err.to_string())),
        }
    }

    fn close(&mut self) -> ConnectorResult<()> {
        FederatedRepositoryConnection::close(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ChangeEvent, InMemoryRepositorySource, SourceRegistry};
    use crate::federation::config::FederatedRepositoryConfig;
    use crate::federation::projection::Projection;
    use crate::graph::{Path, Properties, DEFAULT_WORKSPACE};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<ChangeEvent>>,
    }

    impl RepositoryListener for Recording {
        fn notify(&self, _source_name: &str, events: &[ChangeEvent]) {
            self.events.lock().unwrap().extend_from_slice(events);
        }
    }

    fn repository() -> Arc<FederatedRepository> {
        let registry = Arc::new(SourceRegistry::new());
        registry.register(Arc::new(InMemoryRepositorySource::new("cache")));
        registry.register(Arc::new(InMemoryRepositorySource::new("docs")));
        let config = FederatedRepositoryConfig::new(
            "fed",
            Projection::parse("cache", &["/ => /"]).unwrap(),
            vec![Projection::parse("docs", &["/content => /"]).unwrap()],
        )
        .unwrap();
        let repository = FederatedRepository::new(config, registry);
        repository.start().unwrap();
        repository
    }

    #[test]
    fn test_listener_replaced_and_removed_on_close() {
        let repository = repository();
        let mut connection = repository.create_connection("fed", None).unwrap();
        assert_eq!(repository.listener_count(), 1);

        let recording: Arc<dyn RepositoryListener> = Arc::new(Recording::default());
        connection.set_listener(Some(Arc::clone(&recording)));
        assert_eq!(repository.listener_count(), 1);
        assert!(!repository.remove_listener(&NoOpListener::shared()));

        connection.set_listener(None);
        assert_eq!(repository.listener_count(), 1);
        assert!(!repository.remove_listener(&recording));

        connection.close();
        assert_eq!(repository.listener_count(), 0);
        assert_eq!(repository.open_connections(), 0);
    }

    #[test]
    fn test_source_events_reach_listener_in_federated_paths() {
        let repository = repository();
        let mut connection = repository.create_connection("fed", None).unwrap();
        let recording = Arc::new(Recording::default());
        connection.set_listener(Some(recording.clone()));

        let mut request = Request::create_node(
            Path::parse("/content").unwrap(),
            DEFAULT_WORKSPACE,
            "doc1",
            Properties::new(),
        );
        connection
            .execute(&ExecutionContext::anonymous(), &mut request)
            .unwrap();

        let events = recording.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, Path::parse("/content/doc1").unwrap());
    }

    #[test]
    fn test_execute_after_shutdown_fails() {
        let repository = repository();
        let mut connection = repository.create_connection("fed", None).unwrap();
        repository.shutdown();

        let mut request = Request::read_node(Path::root(), DEFAULT_WORKSPACE);
        let err = connection
            .execute(&ExecutionContext::anonymous(), &mut request)
            .unwrap_err();
        assert!(matches!(err, FederationError::ShutDown(_)));
        assert!(!connection.ping(Duration::from_millis(1)));
    }

    #[test]
    fn test_closed_connection_refuses_work() {
        let repository = repository();
        let mut connection = repository.create_connection("fed", Some("ada".into())).unwrap();
        assert_eq!(connection.user(), Some("ada"));
        connection.close();
        connection.close();
        assert_eq!(repository.open_connections(), 0);

        let mut request = Request::read_node(Path::root(), DEFAULT_WORKSPACE);
        assert!(matches!(
            connection.execute(&ExecutionContext::anonymous(), &mut request),
            Err(FederationError::Closed(_))
        ));
    }

    #[test]
    fn test_nested_federation() {
        let inner = repository();
        let registry = Arc::new(SourceRegistry::new());
        registry.register(Arc::new(InMemoryRepositorySource::new("outer-cache")));
        registry.register(inner.clone());

        let config = FederatedRepositoryConfig::new(
            "outer",
            Projection::parse("outer-cache", &["/ => /"]).unwrap(),
            vec![Projection::parse("fed", &["/inner => /"]).unwrap()],
        )
        .unwrap();
        let outer = FederatedRepository::new(config, registry);
        outer.start().unwrap();

        let mut connection = outer.create_connection("outer", None).unwrap();
        let mut request = Request::read_all_children(Path::parse("/inner").unwrap(), DEFAULT_WORKSPACE);
        connection
            .execute(&ExecutionContext::anonymous(), &mut request)
            .unwrap();
        match request {
            Request::ReadAllChildren(r) => {
                assert_eq!(r.children, vec![Path::parse("/inner/content").unwrap()])
            }
            _ => unreachable!(),
        }
        drop(connection);
        assert_eq!(inner.open_connections(), 0);
    }
}
