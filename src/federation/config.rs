//! Federated repository configuration
//!
//! `RepositoryDescriptor` is the serde form read from a JSON file.
//! `FederatedRepositoryConfig` is the validated, immutable bundle the
//! repository runs on. A repository swaps whole configs; it never edits one.
//!
//! ```json
//! {
//!   "name": "fed",
//!   "cache": { "source": "cache", "rules": ["/ => /"] },
//!   "sources": [
//!     { "source": "docs", "rules": ["/content => /"] },
//!     { "source": "archive", "workspace": "2023", "read_only": true,
//!       "rules": ["/archive => / $ tmp"],
//!       "locking": { "provider": "in-process", "strategy": "workspace" } }
//!   ],
//!   "default_cache_policy": { "ttl_ms": 60000 },
//!   "locking": { "strategy": "repository" }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use serde::{Deserialize, Serialize};

use crate::graph::{CachePolicy, Path};
use crate::lock::{LockRegistry, LockSettings, WorkspaceLockStrategy};

use super::errors::{FederationError, FederationResult};
use super::messages::{Message, MessageCatalog};
use super::problems::{Problem, ProblemSeverity, Problems};
use super::projection::{PathRule, Projection};

/// One projection as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionDescriptor {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locking: Option<LockSettings>,
}

impl ProjectionDescriptor {
    pub fn new<S: Into<String>>(source: impl Into<String>, rules: impl IntoIterator<Item = S>) -> Self {
        Self {
            source: source.into(),
            workspace: None,
            read_only: false,
            rules: rules.into_iter().map(Into::into).collect(),
            locking: None,
        }
    }
}

/// Repository configuration as written in a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub name: String,
    #[serde(default)]
    pub cache: Option<ProjectionDescriptor>,
    #[serde(default)]
    pub sources: Vec<ProjectionDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cache_policy: Option<CachePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locking: Option<LockSettings>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub messages: BTreeMap<String, String>,
}

impl RepositoryDescriptor {
    /// Read a descriptor from a JSON file
    pub fn load(path: &std::path::Path) -> FederationResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| FederationError::Configuration {
            repository: path.display().to_string(),
            message: format!("failed to read configuration: {}", e),
        })?;
        Self::from_json(&content).map_err(|e| match e {
            FederationError::Configuration { message, .. } => FederationError::Configuration {
                repository: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_json(content: &str) -> FederationResult<Self> {
        serde_json::from_str(content).map_err(|e| FederationError::Configuration {
            repository: String::new(),
            message: format!("invalid configuration JSON: {}", e),
        })
    }
}

/// Validated configuration of one federated repository
#[derive(Debug)]
pub struct FederatedRepositoryConfig {
    name: String,
    cache: Projection,
    sources: Vec<Projection>,
    default_cache_policy: Option<CachePolicy>,
    lock_settings: LockSettings,
    source_locking: BTreeMap<String, LockSettings>,
    messages: MessageCatalog,
    problems: Problems,
}

impl FederatedRepositoryConfig {
    /// Assemble a config from already-built projections
    pub fn new(
        name: impl Into<String>,
        cache: Projection,
        sources: Vec<Projection>,
    ) -> FederationResult<Self> {
        let builder = Builder::new(name.into(), MessageCatalog::new());
        builder.finish(Some(cache), sources)
    }

    /// Parse and validate a descriptor
    pub fn from_descriptor(descriptor: &RepositoryDescriptor) -> FederationResult<Self> {
        let (messages, unknown) = MessageCatalog::with_overrides(&descriptor.messages);
        let mut builder = Builder::new(descriptor.name.trim().to_string(), messages);
        for name in unknown {
            builder.warn(Message::UnknownMessageOverride, &[&name], None);
        }

        let cache = descriptor
            .cache
            .as_ref()
            .and_then(|cache| builder.projection(cache, "cache"));

        let mut sources = Vec::new();
        for (i, source) in descriptor.sources.iter().enumerate() {
            let location = format!("sources[{}]", i);
            if let Some(projection) = builder.projection(source, &location) {
                if let Some(locking) = &source.locking {
                    builder.check_locking(source.source.as_str(), locking, &location);
                    builder
                        .source_locking
                        .entry(source.source.clone())
                        .or_insert_with(|| locking.clone());
                }
                sources.push(projection);
            }
        }

        builder.default_cache_policy = descriptor.default_cache_policy;
        if let Some(locking) = &descriptor.locking {
            let scope = descriptor.name.clone();
            builder.check_locking(&scope, locking, "locking");
            builder.lock_settings = locking.clone();
        }

        builder.finish(cache, sources)
    }

    pub fn with_default_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.default_cache_policy = Some(policy);
        self
    }

    /// Replace the repository-level lock settings; identifiers that will not
    /// resolve are recorded here and nowhere else
    pub fn with_lock_settings(mut self, settings: LockSettings) -> Self {
        for reason in unresolvable_locking(&settings) {
            let message = self
                .messages
                .render(Message::LockResolutionFallback, &[self.name.as_str(), reason.as_str()]);
            self.problems.add(
                Problem::new(ProblemSeverity::Warning, Message::LockResolutionFallback.name(), message)
                    .with_resource(self.name.clone())
                    .with_location("locking"),
            );
        }
        self.lock_settings = settings;
        if self.widens_workspace_locking() {
            let message = self
                .messages
                .render(Message::WorkspaceLockingWidened, &[self.name.as_str()]);
            self.problems.add(
                Problem::new(ProblemSeverity::Warning, Message::WorkspaceLockingWidened.name(), message)
                    .with_resource(self.name.clone())
                    .with_location("locking"),
            );
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_projection(&self) -> &Projection {
        &self.cache
    }

    /// Source projections in declaration order, de-duplicated by source
    pub fn source_projections(&self) -> &[Projection] {
        &self.sources
    }

    pub fn default_cache_policy(&self) -> Option<CachePolicy> {
        self.default_cache_policy
    }

    /// Repository-level lock settings
    pub fn lock_settings(&self) -> &LockSettings {
        &self.lock_settings
    }

    /// Whether any projection, the cache included, sends every federated
    /// workspace to one fixed source workspace
    pub fn pins_workspaces(&self) -> bool {
        pins_workspaces(&self.cache, &self.sources)
    }

    /// Workspace locking is requested but cannot isolate pinned workspaces,
    /// so the repository runs with repository locking instead
    pub fn widens_workspace_locking(&self) -> bool {
        self.lock_settings.strategy == WorkspaceLockStrategy::NAME && self.pins_workspaces()
    }

    /// Lock settings a backing source was configured with, if any
    pub fn source_lock_settings(&self, source_name: &str) -> Option<&LockSettings> {
        self.source_locking.get(source_name)
    }

    pub fn messages(&self) -> &MessageCatalog {
        &self.messages
    }

    pub fn problems(&self) -> &Problems {
        &self.problems
    }

    /// Source projections whose regions contain `path`, in declaration order
    pub fn resolve_projections(&self, path: &Path) -> Vec<&Projection> {
        self.sources
            .iter()
            .filter(|projection| projection.covers(path))
            .collect()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(Projection::source_name).collect()
    }
}

/// Accumulates problems while a config is assembled
struct Builder {
    name: String,
    messages: MessageCatalog,
    problems: Problems,
    default_cache_policy: Option<CachePolicy>,
    lock_settings: LockSettings,
    source_locking: BTreeMap<String, LockSettings>,
}

impl Builder {
    fn new(name: String, messages: MessageCatalog) -> Self {
        Self {
            name,
            messages,
            problems: Problems::new(),
            default_cache_policy: None,
            lock_settings: LockSettings::default(),
            source_locking: BTreeMap::new(),
        }
    }

    fn record(&self, severity: ProblemSeverity, message: Message, args: &[&str], location: Option<&str>) {
        let mut problem = Problem::new(severity, message.name(), self.messages.render(message, args))
            .with_resource(self.name.clone());
        if let Some(location) = location {
            problem = problem.with_location(location);
        }
        self.problems.add(problem);
    }

    fn error(&self, message: Message, args: &[&str], location: Option<&str>) {
        self.record(ProblemSeverity::Error, message, args, location);
    }

    fn warn(&self, message: Message, args: &[&str], location: Option<&str>) {
        self.record(ProblemSeverity::Warning, message, args, location);
    }

    fn projection(&self, descriptor: &ProjectionDescriptor, location: &str) -> Option<Projection> {
        let mut rules = Vec::new();
        for (i, rule) in descriptor.rules.iter().enumerate() {
            match PathRule::parse(rule) {
                Ok(parsed) => rules.push(parsed),
                Err(err) => {
                    let cause = err.to_string();
                    let rule_location = format!("{}.rules[{}]", location, i);
                    self.error(
                        Message::InvalidProjectionRule,
                        &[rule, &descriptor.source, &cause],
                        Some(&rule_location),
                    );
                    return None;
                }
            }
        }
        if rules.is_empty() {
            self.warn(Message::ProjectionWithoutRules, &[&descriptor.source], Some(location));
        }

        let mut projection = Projection::new(descriptor.source.clone(), rules).read_only(descriptor.read_only);
        if let Some(workspace) = &descriptor.workspace {
            projection = projection.with_workspace(workspace.clone());
        }
        Some(projection)
    }

    fn check_locking(&self, scope: &str, settings: &LockSettings, location: &str) {
        for reason in unresolvable_locking(settings) {
            self.warn(Message::LockResolutionFallback, &[scope, &reason], Some(location));
        }
    }

    fn finish(
        self,
        cache: Option<Projection>,
        sources: Vec<Projection>,
    ) -> FederationResult<FederatedRepositoryConfig> {
        let mut usable = true;
        if self.name.trim().is_empty() {
            self.error(Message::BlankRepositoryName, &[], Some("name"));
            usable = false;
        }
        if cache.as_ref().map_or(true, |cache| cache.rules().is_empty()) {
            self.error(Message::MissingCacheProjection, &[&self.name], Some("cache"));
            usable = false;
        }

        let mut seen = BTreeSet::new();
        let mut unique = Vec::with_capacity(sources.len());
        for projection in sources {
            if seen.insert(projection.source_name().to_string()) {
                unique.push(projection);
            } else {
                self.warn(
                    Message::DuplicateSourceProjection,
                    &[projection.source_name()],
                    Some("sources"),
                );
            }
        }
        if unique.is_empty() {
            self.error(Message::MissingSourceProjections, &[&self.name], Some("sources"));
            usable = false;
        }

        let Some(cache) = cache.filter(|_| usable) else {
            return Err(self.failure());
        };
        if self.lock_settings.strategy == WorkspaceLockStrategy::NAME && pins_workspaces(&cache, &unique) {
            self.warn(Message::WorkspaceLockingWidened, &[&self.name], Some("locking"));
        }

        Ok(FederatedRepositoryConfig {
            name: self.name,
            cache,
            sources: unique,
            default_cache_policy: self.default_cache_policy,
            lock_settings: self.lock_settings,
            source_locking: self.source_locking,
            messages: self.messages,
            problems: self.problems,
        })
    }

    fn failure(&self) -> FederationError {
        let message = self
            .problems
            .snapshot()
            .into_iter()
            .filter(|problem| problem.severity == ProblemSeverity::Error)
            .map(|problem| problem.message)
            .collect::<Vec<_>>()
            .join("; ");
        FederationError::Configuration {
            repository: self.name.clone(),
            message,
        }
    }
}

fn unresolvable_locking(settings: &LockSettings) -> Vec<String> {
    let registry = LockRegistry::global();
    let mut reasons = Vec::new();
    if !registry.has_provider(&settings.provider) {
        reasons.push(format!("unknown lock provider '{}'", settings.provider));
    }
    if !registry.has_strategy(&settings.strategy) {
        reasons.push(format!("unknown lock strategy '{}'", settings.strategy));
    }
    reasons
}

fn pins_workspaces(cache: &Projection, sources: &[Projection]) -> bool {
    cache.workspace().is_some() || sources.iter().any(|projection| projection.workspace().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    fn descriptor(value: serde_json::Value) -> RepositoryDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_from_descriptor() {
        let config = FederatedRepositoryConfig::from_descriptor(&descriptor(json!({
            "name": "fed",
            "cache": {"source": "cache", "rules": ["/ => /"]},
            "sources": [
                {"source": "a", "rules": ["/data/a => /"]},
                {"source": "b", "workspace": "main", "read_only": true, "rules": ["/data/b => /"],
                 "locking": {"provider": "in-process", "strategy": "workspace"}}
            ],
            "default_cache_policy": {"ttl_ms": 1000}
        })))
        .unwrap();

        assert_eq!(config.name(), "fed");
        assert_eq!(config.source_names(), vec!["a", "b"]);
        assert_eq!(config.default_cache_policy(), Some(CachePolicy { ttl_ms: 1000 }));
        assert!(config.source_projections()[1].is_read_only());
        assert_eq!(config.source_projections()[1].workspace(), Some("main"));
        assert_eq!(config.source_lock_settings("b").unwrap().strategy, "workspace");
        assert!(config.source_lock_settings("a").is_none());
        assert!(config.problems().is_empty());
    }

    #[test]
    fn test_resolve_projections() {
        let config = FederatedRepositoryConfig::new(
            "fed",
            Projection::parse("cache", &["/ => /"]).unwrap(),
            vec![
                Projection::parse("a", &["/data => /"]).unwrap(),
                Projection::parse("b", &["/data/b => /"]).unwrap(),
            ],
        )
        .unwrap();

        let names = |path: &str| -> Vec<String> {
            config
                .resolve_projections(&p(path))
                .iter()
                .map(|projection| projection.source_name().to_string())
                .collect()
        };
        assert_eq!(names("/data/b/x"), vec!["a", "b"]);
        assert_eq!(names("/data/c"), vec!["a"]);
        assert!(names("/other").is_empty());
        assert!(names("/").is_empty());
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let err = FederatedRepositoryConfig::from_descriptor(&descriptor(json!({
            "name": "  ",
            "cache": {"source": "cache", "rules": ["/ => /"]},
            "sources": [{"source": "a", "rules": ["/ => /"]}]
        })))
        .unwrap_err();
        assert_eq!(err.code(), "FED_CONFIGURATION");
        assert!(err.to_string().contains("must not be blank"));
    }

    #[test]
    fn test_missing_cache_and_sources_are_rejected() {
        let err = FederatedRepositoryConfig::from_descriptor(&descriptor(json!({"name": "fed"})))
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("no cache projection"));
        assert!(text.contains("no source projections"));
    }

    #[test]
    fn test_invalid_rule_drops_only_that_source() {
        let config = FederatedRepositoryConfig::from_descriptor(&descriptor(json!({
            "name": "fed",
            "cache": {"source": "cache", "rules": ["/ => /"]},
            "sources": [
                {"source": "bad", "rules": ["/x"]},
                {"source": "good", "rules": ["/ => /"]}
            ]
        })))
        .unwrap();
        assert_eq!(config.source_names(), vec!["good"]);
        assert!(config.problems().has_errors());
        let problem = &config.problems().snapshot()[0];
        assert_eq!(problem.code, "invalid_projection_rule");
        assert_eq!(problem.location.as_deref(), Some("sources[0].rules[0]"));
    }

    #[test]
    fn test_duplicate_sources_keep_first() {
        let config = FederatedRepositoryConfig::new(
            "fed",
            Projection::parse("cache", &["/ => /"]).unwrap(),
            vec![
                Projection::parse("a", &["/one => /"]).unwrap(),
                Projection::parse("a", &["/two => /"]).unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(config.source_projections().len(), 1);
        assert!(config.source_projections()[0].is_top_level_path(&p("/one")));
        assert!(config.problems().has_warnings());
    }

    #[test]
    fn test_unknown_lock_identifiers_are_warnings() {
        let config = FederatedRepositoryConfig::from_descriptor(&descriptor(json!({
            "name": "fed",
            "cache": {"source": "cache", "rules": ["/ => /"]},
            "sources": [{"source": "a", "rules": ["/ => /"],
                         "locking": {"provider": "zookeeper", "strategy": "workspace"}}],
            "locking": {"strategy": "optimistic"},
            "messages": {"unheard_of": "x"}
        })))
        .unwrap();
        let codes: Vec<String> = config
            .problems()
            .snapshot()
            .into_iter()
            .map(|problem| problem.code)
            .collect();
        assert_eq!(
            codes,
            vec![
                "unknown_message_override",
                "lock_resolution_fallback",
                "lock_resolution_fallback"
            ]
        );
        assert!(!config.problems().has_errors());
        assert_eq!(config.lock_settings().strategy, "optimistic");
        assert_eq!(config.lock_settings().provider, "in-process");
    }

    #[test]
    fn test_pinned_workspaces_widen_workspace_locking() {
        let config = FederatedRepositoryConfig::from_descriptor(&descriptor(json!({
            "name": "fed",
            "cache": {"source": "cache", "rules": ["/ => /"]},
            "sources": [{"source": "a", "rules": ["/ => /"], "workspace": "main"}],
            "locking": {"strategy": "workspace"}
        })))
        .unwrap();
        assert!(config.pins_workspaces());
        assert!(config.widens_workspace_locking());
        let codes: Vec<String> = config
            .problems()
            .snapshot()
            .into_iter()
            .map(|problem| problem.code)
            .collect();
        assert_eq!(codes, vec!["workspace_locking_widened"]);
    }

    #[test]
    fn test_lock_settings_record_each_problem_once() {
        let config = FederatedRepositoryConfig::from_descriptor(&descriptor(json!({
            "name": "fed",
            "cache": {"source": "cache", "rules": ["/ => /"]},
            "sources": [{"source": "a", "rules": ["/ => /"]}]
        })))
        .unwrap()
        .with_lock_settings(LockSettings {
            provider: "in-process".to_string(),
            strategy: "optimistic".to_string(),
        });
        let codes: Vec<String> = config
            .problems()
            .snapshot()
            .into_iter()
            .map(|problem| problem.code)
            .collect();
        assert_eq!(codes, vec!["lock_resolution_fallback"]);
        assert!(!config.widens_workspace_locking());
    }

    #[test]
    fn test_invalid_json() {
        let err = RepositoryDescriptor::from_json("{ not json").unwrap_err();
        assert_eq!(err.code(), "FED_CONFIGURATION");
    }
}
