//! Property and cache-policy types shared by every request

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property values keyed by name; multi-valued properties hold a JSON array
pub type Properties = BTreeMap<String, Value>;

/// Prefix reserved for properties owned by the federation layer
pub const INTERNAL_PREFIX: &str = "fed:";

/// Stable identity the federation layer assigns to a federated node
pub const UUID_PROPERTY: &str = "fed:uuid";

/// Serialized merge plan of a node held in the cache source
pub const MERGE_PLAN_PROPERTY: &str = "fed:mergePlan";

/// Whether a property is structural and owned by the federation layer
pub fn is_internal_property(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
}

/// How long information read from a source may be reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Time to live in milliseconds
    pub ttl_ms: u64,
}

impl CachePolicy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn time_to_live(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// How a create request behaves when a child with the same name exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeConflictBehavior {
    /// Add as a new same-name sibling
    #[default]
    Append,
    /// Remove the existing node (and its branch) and create afresh
    Replace,
    /// Keep the existing node and its children, overwrite the given properties
    Update,
    /// Leave the existing node untouched
    DoNotReplace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_properties() {
        assert!(is_internal_property(UUID_PROPERTY));
        assert!(is_internal_property(MERGE_PLAN_PROPERTY));
        assert!(!is_internal_property("title"));
    }

    #[test]
    fn test_cache_policy_ttl() {
        let policy = CachePolicy::new(Duration::from_secs(2));
        assert_eq!(policy.ttl_ms, 2000);
        assert_eq!(policy.time_to_live(), Duration::from_secs(2));
    }
}
