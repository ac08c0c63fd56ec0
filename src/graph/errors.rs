//! Graph model error types
//!
//! `PathError` is raised while parsing paths and projection rules. `RequestError` is not
//! raised at all: it is recorded on a request by whoever processed it, the
//! way a backing source reports "no node there" without failing the call.

use thiserror::Error;

use super::path::Path;

/// Malformed path text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path must be absolute: '{0}'")]
    NotAbsolute(String),

    #[error("path must be relative: '{0}'")]
    NotRelative(String),

    #[error("path contains an empty segment")]
    EmptySegment,

    #[error("invalid path segment: '{0}'")]
    InvalidSegment(String),

    /// A projection rule not of the form `<federated> => <source> [$ <exception>]*`
    #[error("malformed projection rule: '{0}'")]
    MalformedRule(String),
}

/// Outcome recorded on a request that could not be satisfied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No node at `path`; `lowest_existing_ancestor` is the deepest ancestor that does exist
    #[error("no node exists at {path} (lowest existing ancestor: {})", display_opt(.lowest_existing_ancestor))]
    PathNotFound {
        path: Path,
        lowest_existing_ancestor: Option<Path>,
    },

    /// A node already exists and the conflict behaviour forbids replacing it
    #[error("a node already exists at {0}")]
    AlreadyExists(Path),

    /// The request cannot be applied as stated (e.g. moving a node below itself)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RequestError {
    /// Returns the stable code for this outcome
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::PathNotFound { .. } => "GRAPH_PATH_NOT_FOUND",
            RequestError::AlreadyExists(_) => "GRAPH_ALREADY_EXISTS",
            RequestError::InvalidRequest(_) => "GRAPH_INVALID_REQUEST",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RequestError::PathNotFound { .. })
    }
}

fn display_opt(path: &Option<Path>) -> String {
    match path {
        Some(path) => path.to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_includes_ancestor() {
        let err = RequestError::PathNotFound {
            path: Path::parse("/a/b").unwrap(),
            lowest_existing_ancestor: Some(Path::parse("/a").unwrap()),
        };
        let text = err.to_string();
        assert!(text.contains("/a/b"));
        assert!(text.contains("lowest existing ancestor: /a"));
        assert!(err.is_not_found());
        assert_eq!(err.code(), "GRAPH_PATH_NOT_FOUND");
    }
}
