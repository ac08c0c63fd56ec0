//! Graph model for aerofed
//!
//! Paths, properties, and the request model shared by backing sources and
//! the federation layer. A request is processed in place: the processor
//! fills in results, or records a `RequestError` when the node is missing.

mod context;
mod errors;
mod node;
mod path;
mod request;

pub use context::ExecutionContext;
pub use errors::{PathError, RequestError};
pub use node::{
    is_internal_property, CachePolicy, NodeConflictBehavior, Properties, INTERNAL_PREFIX,
    MERGE_PLAN_PROPERTY, UUID_PROPERTY,
};
pub use path::{Path, Segment};
pub use request::{
    CompositeRequest, CopyBranchRequest, CreateNodeRequest, DeleteBranchRequest,
    MoveBranchRequest, ReadAllChildrenRequest, ReadAllPropertiesRequest, ReadNodeRequest,
    Request, UpdatePropertiesRequest, DEFAULT_WORKSPACE,
};
