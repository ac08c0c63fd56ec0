//! Execution Context
//!
//! Context carried with every request a connection executes.
//! Contains the caller identity and tracing metadata.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

/// Context carried through request execution
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Request ID for tracing
    pub request_id: Uuid,

    /// Name of the authenticated caller, if any
    pub user: Option<String>,

    /// Metadata for observability
    pub metadata: HashMap<String, Value>,

    /// Start time for duration tracking
    started_at: Instant,
}

impl ExecutionContext {
    /// Create a context for the given caller
    pub fn new(user: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user,
            metadata: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Create an anonymous context
    pub fn anonymous() -> Self {
        Self::new(None)
    }

    /// Create a context for a named caller
    pub fn for_user(user: impl Into<String>) -> Self {
        Self::new(Some(user.into()))
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    /// Add metadata for observability
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_get_distinct_request_ids() {
        let a = ExecutionContext::anonymous();
        let b = ExecutionContext::anonymous();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_context_metadata() {
        let ctx = ExecutionContext::for_user("alice").with_metadata("origin", Value::from("cli"));
        assert_eq!(ctx.user.as_deref(), Some("alice"));
        assert_eq!(ctx.metadata["origin"], "cli");
    }
}
