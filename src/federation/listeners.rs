//! Repository listeners
//!
//! `ListenerRegistry` is copy-on-write: notification iterates a snapshot,
//! so listeners may be added or removed while a notification is running.
//! `ForwardingListener` sits on a source connection and rewrites that
//! source's change events into federated paths.

use std::sync::{Arc, PoisonError, RwLock};

use crate::connector::{ChangeEvent, ChangeKind, RepositoryListener};
use crate::graph::Path;

use super::projection::Projection;

/// Listeners registered with one federated repository
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Arc<Vec<Arc<dyn RepositoryListener>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if this exact listener is already registered
    pub fn add(&self, listener: Arc<dyn RepositoryListener>) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    /// Returns false if the listener was not registered
    pub fn remove(&self, listener: &Arc<dyn RepositoryListener>) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|existing| same_listener(existing, listener)) {
            return false;
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|existing| !same_listener(existing, listener))
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Vec<Arc<dyn RepositoryListener>>> {
        Arc::clone(&self.listeners.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl RepositoryListener for ListenerRegistry {
    fn notify(&self, source_name: &str, events: &[ChangeEvent]) {
        for listener in self.snapshot().iter() {
            listener.notify(source_name, events);
        }
    }
}

/// Identity comparison on the data pointer; vtable pointers may differ
/// between codegen units for the same object.
fn same_listener(a: &Arc<dyn RepositoryListener>, b: &Arc<dyn RepositoryListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Translates one source's events into the federated namespace
pub struct ForwardingListener {
    repository_name: String,
    projection: Projection,
    downstream: Arc<dyn RepositoryListener>,
}

impl ForwardingListener {
    pub fn new(
        repository_name: impl Into<String>,
        projection: Projection,
        downstream: Arc<dyn RepositoryListener>,
    ) -> Self {
        Self {
            repository_name: repository_name.into(),
            projection,
            downstream,
        }
    }

    /// Every federated counterpart of `event`; events outside the projection vanish
    pub fn translate(&self, event: &ChangeEvent) -> Vec<ChangeEvent> {
        let from_of = |source_from: &Path| self.projection.paths_in_repository(source_from).into_iter().next();
        self.projection
            .paths_in_repository(&event.path)
            .into_iter()
            .map(|path| {
                let kind = match &event.kind {
                    ChangeKind::BranchCopied { from } => match from_of(from) {
                        Some(from) => ChangeKind::BranchCopied { from },
                        None => ChangeKind::NodeCreated,
                    },
                    ChangeKind::BranchMoved { from } => match from_of(from) {
                        Some(from) => ChangeKind::BranchMoved { from },
                        None => ChangeKind::NodeCreated,
                    },
                    other => other.clone(),
                };
                ChangeEvent::new(event.workspace.clone(), path, kind)
            })
            .collect()
    }
}

impl RepositoryListener for ForwardingListener {
    fn notify(&self, _source_name: &str, events: &[ChangeEvent]) {
        let translated: Vec<ChangeEvent> = events.iter().flat_map(|event| self.translate(event)).collect();
        if !translated.is_empty() {
            self.downstream.notify(&self.repository_name, &translated);
        }
    }
}
