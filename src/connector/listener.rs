//! Change notification
//!
//! Sources report the changes a request made after it completes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::Path;

/// What happened at a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    NodeCreated,
    PropertiesUpdated,
    BranchCopied { from: Path },
    BranchMoved { from: Path },
    BranchDeleted,
}

/// One change, located by workspace and (post-change) path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub workspace: String,
    pub path: Path,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(workspace: impl Into<String>, path: Path, kind: ChangeKind) -> Self {
        Self {
            workspace: workspace.into(),
            path,
            kind,
        }
    }
}

/// Receives change notifications from a source or repository
pub trait RepositoryListener: Send + Sync {
    /// Called once per completed request that changed content
    fn notify(&self, source_name: &str, events: &[ChangeEvent]);
}

/// Listener that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpListener;

impl NoOpListener {
    pub fn shared() -> Arc<dyn RepositoryListener> {
        Arc::new(NoOpListener)
    }
}

impl RepositoryListener for NoOpListener {
    fn notify(&self, _source_name: &str, _events: &[ChangeEvent]) {}
}
