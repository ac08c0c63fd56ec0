//! Request Model
//!
//! Every read and write against a repository is a `Request`. Requests are
//! populated in place by whoever processes them: results are written into
//! the output fields, and a failed lookup records a `RequestError` rather
//! than failing the call.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::RequestError;
use super::node::{CachePolicy, NodeConflictBehavior, Properties};
use super::path::Path;

/// Workspace used when a request does not name one
pub const DEFAULT_WORKSPACE: &str = "default";

fn default_workspace() -> String {
    DEFAULT_WORKSPACE.to_string()
}

/// All requests route through this enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    // Reads
    ReadNode(ReadNodeRequest),
    ReadAllChildren(ReadAllChildrenRequest),
    ReadAllProperties(ReadAllPropertiesRequest),

    // Writes
    CreateNode(CreateNodeRequest),
    UpdateProperties(UpdatePropertiesRequest),
    CopyBranch(CopyBranchRequest),
    MoveBranch(MoveBranchRequest),
    DeleteBranch(DeleteBranchRequest),

    // Batch
    Composite(CompositeRequest),
}

impl Request {
    /// Get request name for metrics/logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadNode(_) => "read_node",
            Self::ReadAllChildren(_) => "read_all_children",
            Self::ReadAllProperties(_) => "read_all_properties",
            Self::CreateNode(_) => "create_node",
            Self::UpdateProperties(_) => "update_properties",
            Self::CopyBranch(_) => "copy_branch",
            Self::MoveBranch(_) => "move_branch",
            Self::DeleteBranch(_) => "delete_branch",
            Self::Composite(_) => "composite",
        }
    }

    /// True when no constituent request mutates content
    pub fn is_read_only(&self) -> bool {
        match self {
            Self::ReadNode(_) | Self::ReadAllChildren(_) | Self::ReadAllProperties(_) => true,
            Self::Composite(c) => c.requests.iter().all(Request::is_read_only),
            _ => false,
        }
    }

    /// The primary path this request targets, if it has a single one
    pub fn target(&self) -> Option<&Path> {
        match self {
            Self::ReadNode(r) => Some(&r.at),
            Self::ReadAllChildren(r) => Some(&r.of),
            Self::ReadAllProperties(r) => Some(&r.at),
            Self::CreateNode(r) => Some(&r.under),
            Self::UpdateProperties(r) => Some(&r.on),
            Self::CopyBranch(r) => Some(&r.into),
            Self::MoveBranch(r) => Some(&r.from),
            Self::DeleteBranch(r) => Some(&r.at),
            Self::Composite(_) => None,
        }
    }

    /// Collect workspaces this request only reads into `read`, and the ones it
    /// changes into `changed`. A workspace may land in both sets.
    pub fn classify_workspaces(&self, read: &mut BTreeSet<String>, changed: &mut BTreeSet<String>) {
        match self {
            Self::ReadNode(r) => {
                read.insert(r.workspace.clone());
            }
            Self::ReadAllChildren(r) => {
                read.insert(r.workspace.clone());
            }
            Self::ReadAllProperties(r) => {
                read.insert(r.workspace.clone());
            }
            Self::CreateNode(r) => {
                changed.insert(r.workspace.clone());
            }
            Self::UpdateProperties(r) => {
                changed.insert(r.workspace.clone());
            }
            Self::DeleteBranch(r) => {
                changed.insert(r.workspace.clone());
            }
            Self::MoveBranch(r) => {
                changed.insert(r.workspace.clone());
            }
            Self::CopyBranch(r) => {
                read.insert(r.from_workspace.clone());
                changed.insert(r.into_workspace.clone());
            }
            Self::Composite(c) => {
                for request in &c.requests {
                    request.classify_workspaces(read, changed);
                }
            }
        }
    }

    /// The recorded outcome error, if any (the first one for a composite)
    pub fn error(&self) -> Option<&RequestError> {
        match self {
            Self::ReadNode(r) => r.error.as_ref(),
            Self::ReadAllChildren(r) => r.error.as_ref(),
            Self::ReadAllProperties(r) => r.error.as_ref(),
            Self::CreateNode(r) => r.error.as_ref(),
            Self::UpdateProperties(r) => r.error.as_ref(),
            Self::CopyBranch(r) => r.error.as_ref(),
            Self::MoveBranch(r) => r.error.as_ref(),
            Self::DeleteBranch(r) => r.error.as_ref(),
            Self::Composite(c) => c.requests.iter().find_map(Request::error),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error().is_some()
    }

    /// Record an outcome error. For a composite, it is recorded on every
    /// constituent that does not already carry one.
    pub fn set_error(&mut self, error: RequestError) {
        match self {
            Self::ReadNode(r) => r.error = Some(error),
            Self::ReadAllChildren(r) => r.error = Some(error),
            Self::ReadAllProperties(r) => r.error = Some(error),
            Self::CreateNode(r) => r.error = Some(error),
            Self::UpdateProperties(r) => r.error = Some(error),
            Self::CopyBranch(r) => r.error = Some(error),
            Self::MoveBranch(r) => r.error = Some(error),
            Self::DeleteBranch(r) => r.error = Some(error),
            Self::Composite(c) => {
                for request in c.requests.iter_mut().filter(|r| !r.has_error()) {
                    request.set_error(error.clone());
                }
            }
        }
    }

    // Convenience constructors

    pub fn read_node(at: Path, workspace: impl Into<String>) -> Self {
        Self::ReadNode(ReadNodeRequest::new(at, workspace))
    }

    pub fn read_all_children(of: Path, workspace: impl Into<String>) -> Self {
        Self::ReadAllChildren(ReadAllChildrenRequest::new(of, workspace))
    }

    pub fn read_all_properties(at: Path, workspace: impl Into<String>) -> Self {
        Self::ReadAllProperties(ReadAllPropertiesRequest::new(at, workspace))
    }

    pub fn create_node(
        under: Path,
        workspace: impl Into<String>,
        name: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self::CreateNode(CreateNodeRequest::new(under, workspace, name, properties))
    }

    pub fn update_properties(on: Path, workspace: impl Into<String>, properties: Properties) -> Self {
        Self::UpdateProperties(UpdatePropertiesRequest::new(on, workspace, properties))
    }

    pub fn delete_branch(at: Path, workspace: impl Into<String>) -> Self {
        Self::DeleteBranch(DeleteBranchRequest::new(at, workspace))
    }

    pub fn composite(requests: Vec<Request>) -> Self {
        Self::Composite(CompositeRequest { requests })
    }
}

/// Read a node's properties and children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadNodeRequest {
    pub at: Path,
    #[serde(default = "default_workspace")]
    pub workspace: String,

    #[serde(default)]
    pub actual_location: Option<Path>,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub children: Vec<Path>,
    #[serde(default)]
    pub cache_policy: Option<CachePolicy>,
    #[serde(skip)]
    pub error: Option<RequestError>,
}

impl ReadNodeRequest {
    pub fn new(at: Path, workspace: impl Into<String>) -> Self {
        Self {
            at,
            workspace: workspace.into(),
            actual_location: None,
            uuid: None,
            properties: Properties::new(),
            children: Vec::new(),
            cache_policy: None,
            error: None,
        }
    }
}

/// Read only the children of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadAllChildrenRequest {
    pub of: Path,
    #[serde(default = "default_workspace")]
    pub workspace: String,

    #[serde(default)]
    pub actual_location: Option<Path>,
    #[serde(default)]
    pub children: Vec<Path>,
    #[serde(skip)]
    pub error: Option<RequestError>,
}

impl ReadAllChildrenRequest {
    pub fn new(of: Path, workspace: impl Into<String>) -> Self {
        Self {
            of,
            workspace: workspace.into(),
            actual_location: None,
            children: Vec::new(),
            error: None,
        }
    }
}

/// Read only the properties of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadAllPropertiesRequest {
    pub at: Path,
    #[serde(default = "default_workspace")]
    pub workspace: String,

    #[serde(default)]
    pub actual_location: Option<Path>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(skip)]
    pub error: Option<RequestError>,
}

impl ReadAllPropertiesRequest {
    pub fn new(at: Path, workspace: impl Into<String>) -> Self {
        Self {
            at,
            workspace: workspace.into(),
            actual_location: None,
            properties: Properties::new(),
            error: None,
        }
    }
}

/// Create a child node under an existing parent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    pub under: Path,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub conflict: NodeConflictBehavior,

    #[serde(default)]
    pub actual_location: Option<Path>,
    #[serde(skip)]
    pub error: Option<RequestError>,
}

impl CreateNodeRequest {
    pub fn new(
        under: Path,
        workspace: impl Into<String>,
        name: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self {
            under,
            workspace: workspace.into(),
            name: name.into(),
            properties,
            conflict: NodeConflictBehavior::default(),
            actual_location: None,
            error: None,
        }
    }

    pub fn with_conflict(mut self, conflict: NodeConflictBehavior) -> Self {
        self.conflict = conflict;
        self
    }
}

/// Set properties on a node; a JSON `null` value removes the property
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePropertiesRequest {
    pub on: Path,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    pub properties: Properties,

    #[serde(default)]
    pub actual_location: Option<Path>,
    #[serde(skip)]
    pub error: Option<RequestError>,
}

impl UpdatePropertiesRequest {
    pub fn new(on: Path, workspace: impl Into<String>, properties: Properties) -> Self {
        Self {
            on,
            workspace: workspace.into(),
            properties,
            actual_location: None,
            error: None,
        }
    }
}

/// Copy a branch under a new parent, possibly into another workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyBranchRequest {
    pub from: Path,
    #[serde(default = "default_workspace")]
    pub from_workspace: String,
    pub into: Path,
    #[serde(default = "default_workspace")]
    pub into_workspace: String,
    #[serde(default)]
    pub desired_name: Option<String>,

    #[serde(default)]
    pub actual_location_after: Option<Path>,
    #[serde(skip)]
    pub error: Option<RequestError>,
}

impl CopyBranchRequest {
    pub fn new(
        from: Path,
        from_workspace: impl Into<String>,
        into: Path,
        into_workspace: impl Into<String>,
    ) -> Self {
        Self {
            from,
            from_workspace: from_workspace.into(),
            into,
            into_workspace: into_workspace.into(),
            desired_name: None,
            actual_location_after: None,
            error: None,
        }
    }
}

/// Move a branch under a new parent within one workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveBranchRequest {
    pub from: Path,
    pub into: Path,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default)]
    pub desired_name: Option<String>,

    #[serde(default)]
    pub actual_location_after: Option<Path>,
    #[serde(skip)]
    pub error: Option<RequestError>,
}

impl MoveBranchRequest {
    pub fn new(from: Path, into: Path, workspace: impl Into<String>) -> Self {
        Self {
            from,
            into,
            workspace: workspace.into(),
            desired_name: None,
            actual_location_after: None,
            error: None,
        }
    }
}

/// Delete a node and everything below it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBranchRequest {
    pub at: Path,
    #[serde(default = "default_workspace")]
    pub workspace: String,

    #[serde(default)]
    pub actual_location: Option<Path>,
    #[serde(skip)]
    pub error: Option<RequestError>,
}

impl DeleteBranchRequest {
    pub fn new(at: Path, workspace: impl Into<String>) -> Self {
        Self {
            at,
            workspace: workspace.into(),
            actual_location: None,
            error: None,
        }
    }
}

/// An ordered batch of requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeRequest {
    pub requests: Vec<Request>,
}
