//! Merging per-source contributions into one federated node
//!
//! Every source whose projection touches a federated path contributes
//! something: the node's content, a placeholder listing the children that
//! lead down to the source's regions, or an empty marker when the source
//! covers the path but holds nothing there. The merge plan records which
//! sources contributed and until when, and is stored with the cached node.
//!
//! Merge precedence: contributions are merged in projection declaration
//! order. Children are unioned and deduplicated by name and sibling index;
//! the first property value seen for a name wins.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::graph::{is_internal_property, CachePolicy, Path, Properties};

/// What a source contributed to one federated path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionKind {
    /// The source holds a node here
    Node,
    /// The path lies above the source's regions; only children are synthesized
    Placeholder,
    /// The source covers the path but has no node there
    Empty,
}

/// One source's part of a federated node, already in federated paths
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub source_name: String,
    pub kind: ContributionKind,
    pub properties: Properties,
    pub children: Vec<Path>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Contribution {
    pub fn node(
        source_name: impl Into<String>,
        properties: Properties,
        children: Vec<Path>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            kind: ContributionKind::Node,
            properties,
            children,
            expires_at,
        }
    }

    pub fn placeholder(
        source_name: impl Into<String>,
        children: Vec<Path>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            kind: ContributionKind::Placeholder,
            properties: Properties::new(),
            children,
            expires_at,
        }
    }

    pub fn empty(source_name: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            source_name: source_name.into(),
            kind: ContributionKind::Empty,
            properties: Properties::new(),
            children: Vec::new(),
            expires_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind == ContributionKind::Empty
    }
}

/// Expiry instant for a contribution made at `now` under `policy`; `None` never expires
pub fn expiry_for(policy: Option<CachePolicy>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(policy?.time_to_live()).ok()?;
    now.checked_add_signed(ttl)
}

/// One entry of a merge plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub source: String,
    pub kind: ContributionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Which sources made up a cached node, and until when it may be trusted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    pub entries: Vec<PlanEntry>,
}

impl MergePlan {
    pub fn from_contributions(contributions: &[Contribution]) -> Self {
        Self {
            entries: contributions
                .iter()
                .map(|c| PlanEntry {
                    source: c.source_name.clone(),
                    kind: c.kind,
                    expires_at: c.expires_at,
                })
                .collect(),
        }
    }

    /// A plan is stale as soon as any one of its contributions is
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.expires_at.is_some_and(|at| at <= now))
    }

    /// Earliest expiry over all contributions
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().filter_map(|entry| entry.expires_at).min()
    }

    pub fn sources(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.source.as_str()).collect()
    }

    /// Stored form; a plan always serializes
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// A node as seen through the federated repository
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedNode {
    pub location: Path,
    pub uuid: Uuid,
    /// Visible properties only; internal `fed:` properties are never included
    pub properties: Properties,
    pub children: Vec<Path>,
    pub plan: MergePlan,
}

/// Merge `contributions` for `location`. Returns `None` when no source has
/// anything there.
pub fn merge(location: &Path, contributions: &[Contribution], uuid: Uuid) -> Option<FederatedNode> {
    if contributions.iter().all(Contribution::is_empty) {
        return None;
    }

    let mut seen = BTreeSet::new();
    let mut children = Vec::new();
    let mut properties = Properties::new();
    for contribution in contributions {
        for child in &contribution.children {
            if seen.insert(child.clone()) {
                children.push(child.clone());
            }
        }
        for (name, value) in &contribution.properties {
            if is_internal_property(name) {
                continue;
            }
            properties
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    Some(FederatedNode {
        location: location.clone(),
        uuid,
        properties,
        children,
        plan: MergePlan::from_contributions(contributions),
    })
}
