//! Lock manager
//!
//! Resolves a (provider, strategy) identifier pair into live instances.
//! Identifiers name entries in a `LockRegistry`; the built-in entries are
//! always present and callers may register more.
//!
//! Resolution never fails: an unknown identifier is logged and replaced by
//! the default (in-process provider, repository strategy), and the error is
//! handed back so the caller can record it as a diagnostic.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::observability::{log_event_with_fields, Event};

use super::errors::{LockError, LockResult};
use super::provider::{InProcessLockProvider, LockProvider};
use super::strategy::{LockStrategy, NoLockStrategy, RepositoryLockStrategy, WorkspaceLockStrategy};

/// Builds a provider instance
pub type ProviderConstructor = Arc<dyn Fn() -> LockResult<Arc<dyn LockProvider>> + Send + Sync>;

/// Builds a strategy over a provider; the first argument is the lock scope
/// (usually the repository or source name)
pub type StrategyConstructor =
    Arc<dyn Fn(&str, Arc<dyn LockProvider>) -> Arc<dyn LockStrategy> + Send + Sync>;

/// The two lock identifiers, as configured or persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_provider() -> String {
    InProcessLockProvider::NAME.to_string()
}

fn default_strategy() -> String {
    RepositoryLockStrategy::NAME.to_string()
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            strategy: default_strategy(),
        }
    }
}

impl LockSettings {
    /// Property key the provider identifier is persisted under
    pub const PROVIDER_KEY: &'static str = "lockProvider";
    /// Property key the strategy identifier is persisted under
    pub const STRATEGY_KEY: &'static str = "lockStrategy";

    pub fn new(provider: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            strategy: strategy.into(),
        }
    }

    /// Write both identifiers into a persisted property map
    pub fn write_to(&self, properties: &mut BTreeMap<String, String>) {
        properties.insert(Self::PROVIDER_KEY.to_string(), self.provider.clone());
        properties.insert(Self::STRATEGY_KEY.to_string(), self.strategy.clone());
    }

    /// Read both identifiers back; a missing key keeps its default
    pub fn read_from(properties: &BTreeMap<String, String>) -> Self {
        let mut settings = Self::default();
        if let Some(provider) = properties.get(Self::PROVIDER_KEY) {
            settings.provider = provider.clone();
        }
        if let Some(strategy) = properties.get(Self::STRATEGY_KEY) {
            settings.strategy = strategy.clone();
        }
        settings
    }
}

/// Named constructors for providers and strategies
pub struct LockRegistry {
    providers: RwLock<HashMap<String, ProviderConstructor>>,
    strategies: RwLock<HashMap<String, StrategyConstructor>>,
}

impl LockRegistry {
    /// A registry holding only the built-in entries
    pub fn with_defaults() -> Self {
        let registry = Self {
            providers: RwLock::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
        };
        registry.register_provider(InProcessLockProvider::NAME, || {
            Ok(Arc::new(InProcessLockProvider::new()) as Arc<dyn LockProvider>)
        });
        registry.register_strategy(RepositoryLockStrategy::NAME, |scope, provider| {
            Arc::new(RepositoryLockStrategy::new(scope, provider)) as Arc<dyn LockStrategy>
        });
        registry.register_strategy(WorkspaceLockStrategy::NAME, |scope, provider| {
            Arc::new(WorkspaceLockStrategy::new(scope, provider)) as Arc<dyn LockStrategy>
        });
        registry.register_strategy(NoLockStrategy::NAME, |_, _| {
            Arc::new(NoLockStrategy) as Arc<dyn LockStrategy>
        });
        registry
    }

    /// Process-wide registry
    pub fn global() -> &'static LockRegistry {
        static GLOBAL: OnceLock<LockRegistry> = OnceLock::new();
        GLOBAL.get_or_init(LockRegistry::with_defaults)
    }

    /// Register (or replace) a provider under `name`
    pub fn register_provider<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> LockResult<Arc<dyn LockProvider>> + Send + Sync + 'static,
    {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(constructor));
    }

    /// Register (or replace) a strategy under `name`
    pub fn register_strategy<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&str, Arc<dyn LockProvider>) -> Arc<dyn LockStrategy> + Send + Sync + 'static,
    {
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(constructor));
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Construct the provider registered under `name`
    pub fn provider(&self, name: &str) -> LockResult<Arc<dyn LockProvider>> {
        let constructor = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| LockError::UnknownProvider(name.to_string()))?;
        constructor()
    }

    /// Construct the strategy registered under `name`
    pub fn strategy(
        &self,
        name: &str,
        scope: &str,
        provider: Arc<dyn LockProvider>,
    ) -> LockResult<Arc<dyn LockStrategy>> {
        let constructor = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| LockError::UnknownStrategy(name.to_string()))?;
        Ok(constructor(scope, provider))
    }
}

impl fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        let mut strategies: Vec<String> = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        providers.sort();
        strategies.sort();
        f.debug_struct("LockRegistry")
            .field("providers", &providers)
            .field("strategies", &strategies)
            .finish()
    }
}

/// Outcome of resolving lock settings
pub struct ResolvedLocking {
    pub provider: Arc<dyn LockProvider>,
    pub strategy: Arc<dyn LockStrategy>,
    /// Identifiers that could not be resolved and were replaced by defaults
    pub fallbacks: Vec<LockError>,
}

impl fmt::Debug for ResolvedLocking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedLocking")
            .field("provider", &self.provider.name())
            .field("strategy", &self.strategy.name())
            .field("fallbacks", &self.fallbacks)
            .finish()
    }
}

/// Holds the configured identifiers for one source (or repository) and
/// turns them into a live strategy
#[derive(Debug)]
pub struct LockManager {
    settings: RwLock<LockSettings>,
    registry: &'static LockRegistry,
}

impl LockManager {
    /// Manager over the process-wide registry
    pub fn new(settings: LockSettings) -> Self {
        Self::with_registry(settings, LockRegistry::global())
    }

    pub fn with_registry(settings: LockSettings, registry: &'static LockRegistry) -> Self {
        Self {
            settings: RwLock::new(settings),
            registry,
        }
    }

    pub fn settings(&self) -> LockSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn provider_kind(&self) -> String {
        self.settings().provider
    }

    pub fn set_provider_kind(&self, provider: impl Into<String>) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .provider = provider.into();
    }

    pub fn strategy_kind(&self) -> String {
        self.settings().strategy
    }

    pub fn set_strategy_kind(&self, strategy: impl Into<String>) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .strategy = strategy.into();
    }

    /// Copy the identifiers into a persisted property map
    pub fn copy_to(&self, properties: &mut BTreeMap<String, String>) {
        self.settings().write_to(properties);
    }

    /// Replace the identifiers from a persisted property map
    pub fn copy_from(&self, properties: &BTreeMap<String, String>) {
        *self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = LockSettings::read_from(properties);
    }

    /// Build the strategy for `scope`, falling back to defaults on unknown identifiers
    pub fn resolve(&self, scope: &str) -> ResolvedLocking {
        self.resolve_with(scope, None)
    }

    /// Like `resolve`, but keeps `retained` when it is the provider the
    /// settings name (or the default a fallback would pick), so domains
    /// already locked through it stay locked for the new strategy
    pub fn resolve_with(&self, scope: &str, retained: Option<Arc<dyn LockProvider>>) -> ResolvedLocking {
        let settings = self.settings();
        let mut fallbacks = Vec::new();

        let provider = match retained.as_ref().filter(|p| p.name() == settings.provider) {
            Some(provider) => Arc::clone(provider),
            None => match self.registry.provider(&settings.provider) {
                Ok(provider) => provider,
                Err(err) => {
                    log_fallback(scope, &err);
                    fallbacks.push(err);
                    retained
                        .filter(|p| p.name() == InProcessLockProvider::NAME)
                        .unwrap_or_else(|| Arc::new(InProcessLockProvider::new()))
                }
            },
        };

        let strategy = match self
            .registry
            .strategy(&settings.strategy, scope, Arc::clone(&provider))
        {
            Ok(strategy) => strategy,
            Err(err) => {
                log_fallback(scope, &err);
                fallbacks.push(err);
                Arc::new(RepositoryLockStrategy::new(scope, Arc::clone(&provider)))
            }
        };

        ResolvedLocking {
            provider,
            strategy,
            fallbacks,
        }
    }
}

fn log_fallback(scope: &str, err: &LockError) {
    let message = err.to_string();
    log_event_with_fields(
        Event::LockFallback,
        &[("scope", scope), ("code", err.code()), ("error", &message)],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_without_fallback() {
        let manager = LockManager::new(LockSettings::default());
        let resolved = manager.resolve("repo");
        assert_eq!(resolved.strategy.name(), "repository");
        assert!(resolved.fallbacks.is_empty());
    }

    #[test]
    fn test_named_strategies_resolve() {
        for name in ["repository", "workspace", "none"] {
            let manager = LockManager::new(LockSettings::new("in-process", name));
            assert_eq!(manager.resolve("repo").strategy.name(), name);
        }
    }

    #[test]
    fn test_unknown_identifiers_fall_back() {
        let manager = LockManager::new(LockSettings::new("zookeeper", "optimistic"));
        let resolved = manager.resolve("repo");
        assert_eq!(resolved.strategy.name(), "repository");
        assert_eq!(
            resolved.fallbacks,
            vec![
                LockError::UnknownProvider("zookeeper".into()),
                LockError::UnknownStrategy("optimistic".into()),
            ]
        );
    }

    #[test]
    fn test_retained_provider_is_reused() {
        let first = LockManager::new(LockSettings::default()).resolve("repo");
        let second = LockManager::new(LockSettings::new("in-process", "workspace"))
            .resolve_with("repo", Some(Arc::clone(&first.provider)));
        assert!(Arc::ptr_eq(&first.provider, &second.provider));
        assert_eq!(second.strategy.name(), "workspace");

        let fallback = LockManager::new(LockSettings::new("zookeeper", "repository"))
            .resolve_with("repo", Some(Arc::clone(&first.provider)));
        assert!(Arc::ptr_eq(&first.provider, &fallback.provider));
        assert_eq!(fallback.fallbacks.len(), 1);
    }

    #[test]
    fn test_accessors() {
        let manager = LockManager::new(LockSettings::default());
        manager.set_strategy_kind("workspace");
        manager.set_provider_kind("in-process");
        assert_eq!(manager.strategy_kind(), "workspace");
        assert_eq!(manager.provider_kind(), "in-process");
    }

    #[test]
    fn test_copy_to_and_from_properties() {
        let manager = LockManager::new(LockSettings::new("in-process", "workspace"));
        let mut properties = BTreeMap::new();
        manager.copy_to(&mut properties);
        assert_eq!(properties[LockSettings::STRATEGY_KEY], "workspace");

        let other = LockManager::new(LockSettings::default());
        other.copy_from(&properties);
        assert_eq!(other.settings(), manager.settings());
    }

    #[test]
    fn test_missing_property_keeps_default() {
        let mut properties = BTreeMap::new();
        properties.insert(LockSettings::STRATEGY_KEY.to_string(), "none".to_string());
        let settings = LockSettings::read_from(&properties);
        assert_eq!(settings.provider, "in-process");
        assert_eq!(settings.strategy, "none");
    }

    #[test]
    fn test_registration_hook() {
        static REGISTRY: OnceLock<LockRegistry> = OnceLock::new();
        let registry = REGISTRY.get_or_init(LockRegistry::with_defaults);
        registry.register_strategy("always-none", |_, _| {
            Arc::new(NoLockStrategy) as Arc<dyn LockStrategy>
        });
        assert!(registry.has_strategy("always-none"));

        let manager =
            LockManager::with_registry(LockSettings::new("in-process", "always-none"), registry);
        let resolved = manager.resolve("repo");
        assert_eq!(resolved.strategy.name(), "none");
        assert!(resolved.fallbacks.is_empty());
    }

    #[test]
    fn test_provider_failure_falls_back() {
        static REGISTRY: OnceLock<LockRegistry> = OnceLock::new();
        let registry = REGISTRY.get_or_init(LockRegistry::with_defaults);
        registry.register_provider("broken", || {
            Err(LockError::ProviderUnavailable {
                provider: "broken".into(),
                domain: "*".into(),
                reason: "not configured".into(),
            })
        });

        let manager = LockManager::with_registry(LockSettings::new("broken", "workspace"), registry);
        let resolved = manager.resolve("repo");
        assert_eq!(resolved.strategy.name(), "workspace");
        assert_eq!(resolved.fallbacks.len(), 1);
        assert!(resolved.fallbacks[0].is_fatal());
    }
}
