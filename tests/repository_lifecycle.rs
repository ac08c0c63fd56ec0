//! Repository Lifecycle Tests
//!
//! - Created -> Running -> ShutdownRequested -> Terminated
//! - termination follows the last connection close
//! - listener registration is idempotent
//! - configuration swaps are atomic for concurrent sessions

use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use aerofed::connector::{ChangeEvent, InMemoryRepositorySource, RepositoryListener, SourceRegistry};
use aerofed::federation::{
    FederatedRepository, FederatedRepositoryConfig, FederationError, Projection, RepositoryState,
};
use aerofed::graph::{ExecutionContext, Path, Properties, Request, DEFAULT_WORKSPACE};

// =============================================================================
// Helper Functions
// =============================================================================

struct Quiet;

impl RepositoryListener for Quiet {
    fn notify(&self, _source_name: &str, _events: &[ChangeEvent]) {}
}

/// Holds every notified write for a while, recording when it enters and leaves
struct SlowWrites {
    entered: Mutex<mpsc::Sender<()>>,
    trace: Mutex<Vec<&'static str>>,
}

impl SlowWrites {
    fn new(entered: mpsc::Sender<()>) -> Self {
        Self {
            entered: Mutex::new(entered),
            trace: Mutex::new(Vec::new()),
        }
    }

    fn trace(&self) -> Vec<&'static str> {
        self.trace.lock().unwrap().clone()
    }
}

impl RepositoryListener for SlowWrites {
    fn notify(&self, _source_name: &str, _events: &[ChangeEvent]) {
        self.trace.lock().unwrap().push("enter");
        let _ = self.entered.lock().unwrap().send(());
        thread::sleep(Duration::from_millis(400));
        self.trace.lock().unwrap().push("leave");
    }
}

fn config(rule: &str) -> FederatedRepositoryConfig {
    config_with_cache("cache", rule)
}

fn config_with_cache(cache: &str, rule: &str) -> FederatedRepositoryConfig {
    FederatedRepositoryConfig::new(
        "fed",
        Projection::parse(cache, &["/ => /"]).unwrap(),
        vec![Projection::parse("docs", &[rule]).unwrap()],
    )
    .unwrap()
}

fn repository() -> Arc<FederatedRepository> {
    let registry = Arc::new(SourceRegistry::new());
    registry.register(Arc::new(InMemoryRepositorySource::new("cache")));
    registry.register(Arc::new(InMemoryRepositorySource::new("fresh-cache")));
    registry.register(Arc::new(InMemoryRepositorySource::new("docs")));
    let repository = FederatedRepository::new(config("/content => /"), registry);
    repository.start().unwrap();
    repository
}

fn children_of(repository: &Arc<FederatedRepository>, path: &str) -> Vec<Path> {
    let mut connection = repository.create_connection("fed", None).unwrap();
    let mut request = Request::read_all_children(Path::parse(path).unwrap(), DEFAULT_WORKSPACE);
    connection
        .execute(&ExecutionContext::anonymous(), &mut request)
        .unwrap();
    match request {
        Request::ReadAllChildren(read) => read.children,
        other => panic!("unexpected request {:?}", other),
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_state_progression() {
    let registry = Arc::new(SourceRegistry::new());
    let repository = FederatedRepository::new(config("/content => /"), registry);
    assert_eq!(repository.state(), RepositoryState::Created);

    repository.start().unwrap();
    assert_eq!(repository.state(), RepositoryState::Running);
    assert!(repository.is_running());

    repository.shutdown();
    assert!(!repository.is_running());
    assert_eq!(repository.state(), RepositoryState::Terminated);
    assert!(matches!(repository.start(), Err(FederationError::ShutDown(_))));
}

/// Shutdown with two open connections terminates when the second closes.
#[test]
fn test_termination_follows_last_close() {
    let repository = repository();
    let mut first = repository.create_connection("fed", None).unwrap();
    let mut second = repository.create_connection("fed", None).unwrap();
    assert_eq!(repository.open_connections(), 2);

    repository.shutdown();
    assert_eq!(repository.state(), RepositoryState::ShutdownRequested);
    assert!(!repository.is_terminated());

    first.close();
    assert!(!repository.is_terminated());
    assert!(!repository.await_termination(Duration::from_millis(20)));

    second.close();
    assert!(repository.is_terminated());
    assert!(repository.await_termination(Duration::from_millis(1)));
}

/// A thread waiting on termination wakes when another thread closes the last connection.
#[test]
fn test_await_termination_across_threads() {
    let repository = repository();
    let connection = repository.create_connection("fed", None).unwrap();
    repository.shutdown();

    let (done_tx, done_rx) = mpsc::channel();
    let waiter = {
        let repository = Arc::clone(&repository);
        thread::spawn(move || {
            done_tx
                .send(repository.await_termination(Duration::from_secs(5)))
                .unwrap();
        })
    };

    assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
    drop(connection);
    assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    waiter.join().unwrap();
}

/// Open/close from many threads never leaves the counter off balance.
#[test]
fn test_connection_accounting_under_concurrency() {
    let repository = repository();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let repository = Arc::clone(&repository);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..25 {
                    let mut connection = repository.create_connection("fed", None).unwrap();
                    connection.close();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(repository.open_connections(), 0);
    repository.shutdown();
    assert!(repository.await_termination(Duration::from_millis(100)));

    let metrics = repository.metrics();
    assert_eq!(metrics.connections_opened, 200);
    assert_eq!(metrics.connections_closed, 200);
}

/// Connections can still be handed out after shutdown, but cannot execute.
#[test]
fn test_connection_after_shutdown_cannot_execute() {
    let repository = repository();
    repository.shutdown();

    let mut connection = repository.create_connection("fed", None).unwrap();
    let mut request = Request::read_node(Path::root(), DEFAULT_WORKSPACE);
    assert!(matches!(
        connection.execute(&ExecutionContext::anonymous(), &mut request),
        Err(FederationError::ShutDown(_))
    ));
    connection.close();
    assert_eq!(repository.open_connections(), 0);
    assert!(repository.is_terminated());
}

// =============================================================================
// Listeners
// =============================================================================

#[test]
fn test_listener_registration_is_idempotent() {
    let repository = repository();
    let listener: Arc<dyn RepositoryListener> = Arc::new(Quiet);

    assert!(repository.add_listener(Arc::clone(&listener)));
    assert!(!repository.add_listener(Arc::clone(&listener)));
    assert_eq!(repository.listener_count(), 1);

    assert!(repository.remove_listener(&listener));
    assert!(!repository.remove_listener(&listener));
    assert_eq!(repository.listener_count(), 0);
}

// =============================================================================
// Configuration Swap
// =============================================================================

#[test]
fn test_configuration_swap_visible_to_new_requests() {
    let repository = repository();
    assert_eq!(children_of(&repository, "/"), vec![Path::parse("/content").unwrap()]);

    // The old cache holds merged results for the old layout
    let previous = repository.set_configuration(config_with_cache("fresh-cache", "/docs => /"));
    assert_eq!(previous.source_projections()[0].to_string(), "docs { /content => / }");
    assert_eq!(children_of(&repository, "/"), vec![Path::parse("/docs").unwrap()]);
}

/// Readers racing a swap always see one whole configuration or the other.
#[test]
fn test_configuration_swap_is_atomic_for_readers() {
    let repository = repository();
    let barrier = Arc::new(Barrier::new(3));

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let repository = Arc::clone(&repository);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    let config = repository.configuration();
                    let rule = config.source_projections()[0].rules()[0].to_string();
                    assert!(rule == "/content => /" || rule == "/docs => /", "torn rule {}", rule);
                }
            })
        })
        .collect();

    barrier.wait();
    for i in 0..50 {
        let rule = if i % 2 == 0 { "/docs => /" } else { "/content => /" };
        repository.set_configuration(config(rule));
    }
    for reader in readers {
        reader.join().unwrap();
    }
}

/// A writer admitted before a swap still excludes writers admitted after it.
#[test]
fn test_configuration_swap_keeps_in_flight_write_exclusive() {
    let repository = repository();
    let (entered_tx, entered_rx) = mpsc::channel();
    let slow = Arc::new(SlowWrites::new(entered_tx));
    repository.add_listener(slow.clone());

    let writer = |name: &'static str| {
        let repository = Arc::clone(&repository);
        thread::spawn(move || {
            let mut connection = repository.create_connection("fed", None).unwrap();
            let mut request =
                Request::create_node(Path::parse("/content").unwrap(), DEFAULT_WORKSPACE, name, Properties::new());
            connection
                .execute(&ExecutionContext::anonymous(), &mut request)
                .unwrap();
            assert!(!request.has_error());
        })
    };

    let first = writer("a");
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    repository.set_configuration(config("/content => /"));
    let second = writer("b");

    first.join().unwrap();
    second.join().unwrap();
    assert_eq!(slow.trace(), vec!["enter", "leave", "enter", "leave"]);
    assert_eq!(
        children_of(&repository, "/content"),
        vec![Path::parse("/content/a").unwrap(), Path::parse("/content/b").unwrap()]
    );
}
