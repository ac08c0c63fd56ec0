//! aerofed - a federated graph content repository
//!
//! Presents one hierarchical namespace of nodes assembled from several
//! independent backing sources, with a cache source holding merged
//! results.

pub mod cli;
pub mod connector;
pub mod federation;
pub mod graph;
pub mod lock;
pub mod observability;
