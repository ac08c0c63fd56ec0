//! Message templates
//!
//! Diagnostics are rendered from named templates with positional `{0}`,
//! `{1}`, ... placeholders. A configuration may override any template by
//! name.

use std::collections::{BTreeMap, HashMap};

/// Named message templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Message {
    BlankRepositoryName,
    MissingCacheProjection,
    MissingSourceProjections,
    InvalidProjectionRule,
    ProjectionWithoutRules,
    DuplicateSourceProjection,
    LockResolutionFallback,
    WorkspaceLockingWidened,
    UnknownMessageOverride,
    ConfigurationReplaced,
}

impl Message {
    pub const ALL: [Message; 10] = [
        Message::BlankRepositoryName,
        Message::MissingCacheProjection,
        Message::MissingSourceProjections,
        Message::InvalidProjectionRule,
        Message::ProjectionWithoutRules,
        Message::DuplicateSourceProjection,
        Message::LockResolutionFallback,
        Message::WorkspaceLockingWidened,
        Message::UnknownMessageOverride,
        Message::ConfigurationReplaced,
    ];

    /// Name used in configuration overrides and as the problem code
    pub fn name(&self) -> &'static str {
        match self {
            Message::BlankRepositoryName => "blank_repository_name",
            Message::MissingCacheProjection => "missing_cache_projection",
            Message::MissingSourceProjections => "missing_source_projections",
            Message::InvalidProjectionRule => "invalid_projection_rule",
            Message::ProjectionWithoutRules => "projection_without_rules",
            Message::DuplicateSourceProjection => "duplicate_source_projection",
            Message::LockResolutionFallback => "lock_resolution_fallback",
            Message::WorkspaceLockingWidened => "workspace_locking_widened",
            Message::UnknownMessageOverride => "unknown_message_override",
            Message::ConfigurationReplaced => "configuration_replaced",
        }
    }

    pub fn from_name(name: &str) -> Option<Message> {
        Message::ALL.into_iter().find(|message| message.name() == name)
    }

    pub fn default_template(&self) -> &'static str {
        match self {
            Message::BlankRepositoryName => "the repository name must not be blank",
            Message::MissingCacheProjection => "repository '{0}' has no cache projection",
            Message::MissingSourceProjections => "repository '{0}' has no source projections",
            Message::InvalidProjectionRule => {
                "rule '{0}' of source '{1}' is not a valid projection rule: {2}"
            }
            Message::ProjectionWithoutRules => "projection of source '{0}' has no rules",
            Message::DuplicateSourceProjection => {
                "source '{0}' is projected more than once; only its first projection is used"
            }
            Message::LockResolutionFallback => {
                "lock settings for '{0}' could not be resolved ({1}); using in-process repository locking"
            }
            Message::WorkspaceLockingWidened => {
                "repository '{0}' pins projections to fixed workspaces; workspace locking is widened to repository locking"
            }
            Message::UnknownMessageOverride => "message override '{0}' names no known message",
            Message::ConfigurationReplaced => "configuration of repository '{0}' was replaced",
        }
    }
}

/// Templates in effect for one configuration
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    overrides: HashMap<Message, String>,
}

impl MessageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply overrides by message name; returns the names that match no message
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> (Self, Vec<String>) {
        let mut catalog = Self::new();
        let mut unknown = Vec::new();
        for (name, template) in overrides {
            match Message::from_name(name) {
                Some(message) => {
                    catalog.overrides.insert(message, template.clone());
                }
                None => unknown.push(name.clone()),
            }
        }
        (catalog, unknown)
    }

    pub fn template(&self, message: Message) -> &str {
        self.overrides
            .get(&message)
            .map(String::as_str)
            .unwrap_or_else(|| message.default_template())
    }

    /// Substitute `{n}` with `args[n]`; placeholders without an argument stay as written
    pub fn render(&self, message: Message, args: &[&str]) -> String {
        let mut text = self.template(message).to_string();
        for (i, arg) in args.iter().enumerate() {
            text = text.replace(&format!("{{{}}}", i), arg);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for message in Message::ALL {
            assert_eq!(Message::from_name(message.name()), Some(message));
        }
        assert_eq!(Message::from_name("nope"), None);
    }

    #[test]
    fn test_render_default() {
        let catalog = MessageCatalog::new();
        assert_eq!(
            catalog.render(Message::InvalidProjectionRule, &["/a", "src", "bad"]),
            "rule '/a' of source 'src' is not a valid projection rule: bad"
        );
    }

    #[test]
    fn test_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "missing_cache_projection".to_string(),
            "{0}: cache projection required".to_string(),
        );
        overrides.insert("bogus".to_string(), "x".to_string());

        let (catalog, unknown) = MessageCatalog::with_overrides(&overrides);
        assert_eq!(unknown, vec!["bogus".to_string()]);
        assert_eq!(
            catalog.render(Message::MissingCacheProjection, &["fed"]),
            "fed: cache projection required"
        );
    }

    #[test]
    fn test_missing_argument_leaves_placeholder() {
        let catalog = MessageCatalog::new();
        assert_eq!(
            catalog.render(Message::LockResolutionFallback, &["src"]),
            "lock settings for 'src' could not be resolved ({1}); using in-process repository locking"
        );
    }
}
