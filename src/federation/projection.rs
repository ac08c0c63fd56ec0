//! Projections
//!
//! A projection maps regions of the federated namespace onto regions of
//! one source's namespace. Each region is a `PathRule`:
//!
//! ```text
//! /data/a => /            # federated /data/a is the source root
//! /content => /docs $ tmp  # except everything under /docs/tmp
//! ```
//!
//! Translation is a pure function in both directions and is invertible for
//! every path inside a rule's region.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::graph::{Path, PathError, DEFAULT_WORKSPACE};

fn rule_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?P<federated>[^=$]+)=>(?P<source>[^=$]+)(?P<exceptions>(?:\$[^=$]*)*)$").ok()
        })
        .as_ref()
}

/// One (federated region, source region) pair with optional exclusions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathRule {
    repository_path: Path,
    source_path: Path,
    /// Relative to `source_path`
    exceptions: Vec<Path>,
}

impl PathRule {
    pub fn new(repository_path: Path, source_path: Path) -> Self {
        Self {
            repository_path,
            source_path,
            exceptions: Vec::new(),
        }
    }

    /// Exclude `exception` (relative to the source path) and everything below it
    pub fn with_exception(mut self, exception: Path) -> Self {
        self.exceptions.push(exception);
        self
    }

    /// Parse `<federated path> => <source path> [$ <relative exception>]*`
    pub fn parse(definition: &str) -> Result<Self, PathError> {
        let definition = definition.trim();
        let captures = rule_pattern()
            .and_then(|pattern| pattern.captures(definition))
            .ok_or_else(|| PathError::MalformedRule(definition.to_string()))?;

        let repository_path = Path::parse(&captures["federated"])?;
        let source_path = Path::parse(&captures["source"])?;

        let mut rule = PathRule::new(repository_path, source_path);
        for exception in captures["exceptions"].split('$').skip(1) {
            let exception = exception.trim();
            if exception.is_empty() {
                return Err(PathError::MalformedRule(definition.to_string()));
            }
            rule.exceptions
                .push(Path::from_segments(Path::parse_relative(exception)?));
        }
        Ok(rule)
    }

    /// Where the content appears in the federated namespace
    pub fn path_in_repository(&self) -> &Path {
        &self.repository_path
    }

    /// Where the content lives in the source
    pub fn path_in_source(&self) -> &Path {
        &self.source_path
    }

    pub fn exceptions(&self) -> &[Path] {
        &self.exceptions
    }

    /// Whether `source_path` is inside this rule's source region
    pub fn includes(&self, source_path: &Path) -> bool {
        let Some(relative) = source_path.relative_to(&self.source_path) else {
            return false;
        };
        if relative.is_empty() {
            return true;
        }
        let relative = Path::from_segments(relative.to_vec());
        !self
            .exceptions
            .iter()
            .any(|exception| relative.is_at_or_below(exception))
    }

    /// Translate a federated path into this rule's source, if covered
    pub fn source_path_for(&self, repository_path: &Path) -> Option<Path> {
        let relative = repository_path.relative_to(&self.repository_path)?;
        let translated = self.source_path.join(relative);
        self.includes(&translated).then_some(translated)
    }

    /// Translate a source path back into the federated namespace, if covered
    pub fn repository_path_for(&self, source_path: &Path) -> Option<Path> {
        if !self.includes(source_path) {
            return None;
        }
        let relative = source_path.relative_to(&self.source_path)?;
        Some(self.repository_path.join(relative))
    }
}

impl fmt::Display for PathRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.repository_path, self.source_path)?;
        for exception in &self.exceptions {
            let text = exception.to_string();
            write!(f, " $ {}", text.trim_start_matches('/'))?;
        }
        Ok(())
    }
}

/// Immutable mapping between the federated namespace and one source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Projection {
    source_name: String,
    workspace: Option<String>,
    rules: Vec<PathRule>,
    read_only: bool,
    simple: bool,
}

impl Projection {
    pub fn new(source_name: impl Into<String>, rules: Vec<PathRule>) -> Self {
        let simple = is_simple(&rules);
        Self {
            source_name: source_name.into(),
            workspace: None,
            rules,
            read_only: false,
            simple,
        }
    }

    /// Project a named workspace of the source instead of the request's workspace
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Parse every rule string; the first malformed one fails the whole projection
    pub fn parse<S: AsRef<str>>(source_name: impl Into<String>, rules: &[S]) -> Result<Self, PathError> {
        let rules = rules
            .iter()
            .map(|rule| PathRule::parse(rule.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(source_name, rules))
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The projected workspace, if pinned
    pub fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref()
    }

    /// Workspace a request against `requested` should use in this source
    pub fn workspace_for<'a>(&'a self, requested: &'a str) -> &'a str {
        match self.workspace.as_deref() {
            Some(workspace) => workspace,
            None if requested.is_empty() => DEFAULT_WORKSPACE,
            None => requested,
        }
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// No two rules' federated regions nest or coincide, so every
    /// federated path maps to at most one source path
    pub fn is_simple(&self) -> bool {
        self.simple
    }

    /// Whether any rule covers `repository_path`
    pub fn covers(&self, repository_path: &Path) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.source_path_for(repository_path).is_some())
    }

    /// All source paths `repository_path` maps to, in rule order
    pub fn paths_in_source(&self, repository_path: &Path) -> Vec<Path> {
        let mut seen = BTreeSet::new();
        self.rules
            .iter()
            .filter_map(|rule| rule.source_path_for(repository_path))
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }

    /// All federated paths `source_path` maps to, in rule order
    pub fn paths_in_repository(&self, source_path: &Path) -> Vec<Path> {
        let mut seen = BTreeSet::new();
        self.rules
            .iter()
            .filter_map(|rule| rule.repository_path_for(source_path))
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }

    /// Federated roots of this projection's regions, in rule order
    pub fn top_level_paths(&self) -> Vec<Path> {
        let mut seen = BTreeSet::new();
        self.rules
            .iter()
            .map(|rule| rule.path_in_repository().clone())
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }

    pub fn is_top_level_path(&self, repository_path: &Path) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.path_in_repository() == repository_path)
    }
}

fn is_simple(rules: &[PathRule]) -> bool {
    rules.iter().enumerate().all(|(i, rule)| {
        rules[i + 1..].iter().all(|other| {
            !rule.path_in_repository().is_at_or_above(other.path_in_repository())
                && !other.path_in_repository().is_at_or_above(rule.path_in_repository())
        })
    })
}

impl Ord for Projection {
    fn cmp(&self, other: &Self) -> Ordering {
        self.source_name
            .cmp(&other.source_name)
            .then_with(|| self.workspace.cmp(&other.workspace))
            .then_with(|| self.rules.cmp(&other.rules))
            .then_with(|| self.read_only.cmp(&other.read_only))
    }
}

impl PartialOrd for Projection {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source_name)?;
        if let Some(workspace) = &self.workspace {
            write!(f, "::{}", workspace)?;
        }
        write!(f, " {{ ")?;
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", rule)?;
        }
        write!(f, " }}")?;
        if self.read_only {
            write!(f, " (read-only)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    #[test]
    fn test_parse_rule() {
        let rule = PathRule::parse("/content => /docs $ tmp $ a/b").unwrap();
        assert_eq!(rule.path_in_repository(), &p("/content"));
        assert_eq!(rule.path_in_source(), &p("/docs"));
        assert_eq!(rule.exceptions(), &[p("/tmp"), p("/a/b")]);
        assert_eq!(rule.to_string(), "/content => /docs $ tmp $ a/b");
    }

    #[test]
    fn test_parse_rejects_malformed_rules() {
        assert!(matches!(
            PathRule::parse("/content"),
            Err(PathError::MalformedRule(_))
        ));
        assert!(matches!(
            PathRule::parse("/a => /b $ "),
            Err(PathError::MalformedRule(_))
        ));
        assert!(matches!(
            PathRule::parse("content => /"),
            Err(PathError::NotAbsolute(_))
        ));
        assert!(matches!(
            PathRule::parse("/a => / $ /abs"),
            Err(PathError::NotRelative(_))
        ));
    }

    #[test]
    fn test_translation_both_ways() {
        let rule = PathRule::parse("/content => /").unwrap();
        assert_eq!(rule.source_path_for(&p("/content/doc1")), Some(p("/doc1")));
        assert_eq!(rule.source_path_for(&p("/content")), Some(Path::root()));
        assert_eq!(rule.source_path_for(&p("/other")), None);
        assert_eq!(rule.repository_path_for(&p("/doc1")), Some(p("/content/doc1")));
    }

    #[test]
    fn test_exceptions_exclude_branch() {
        let rule = PathRule::parse("/content => /docs $ tmp").unwrap();
        assert!(rule.source_path_for(&p("/content/tmp")).is_none());
        assert!(rule.source_path_for(&p("/content/tmp/x")).is_none());
        assert_eq!(rule.source_path_for(&p("/content/tmpx")), Some(p("/docs/tmpx")));
        assert!(rule.repository_path_for(&p("/docs/tmp/y")).is_none());
        assert!(rule.repository_path_for(&p("/elsewhere")).is_none());
    }

    #[test]
    fn test_simple_detection() {
        let simple = Projection::parse("s", &["/a => /x", "/b => /y"]).unwrap();
        assert!(simple.is_simple());
        let nested = Projection::parse("s", &["/a => /x", "/a/b => /y"]).unwrap();
        assert!(!nested.is_simple());
    }

    #[test]
    fn test_paths_and_top_level() {
        let projection = Projection::parse("s", &["/a => /x", "/b => /x"]).unwrap();
        assert_eq!(
            projection.paths_in_repository(&p("/x/1")),
            vec![p("/a/1"), p("/b/1")]
        );
        assert_eq!(projection.paths_in_source(&p("/b/1")), vec![p("/x/1")]);
        assert_eq!(projection.top_level_paths(), vec![p("/a"), p("/b")]);
        assert!(projection.is_top_level_path(&p("/b")));
        assert!(!projection.is_top_level_path(&p("/b/1")));
    }

    #[test]
    fn test_workspace_mapping() {
        let plain = Projection::parse("s", &["/ => /"]).unwrap();
        assert_eq!(plain.workspace_for("main"), "main");
        let pinned = plain.clone().with_workspace("archive");
        assert_eq!(pinned.workspace_for("main"), "archive");
    }

    #[test]
    fn test_ordering_by_source_then_rules() {
        let b = Projection::parse("b", &["/a => /"]).unwrap();
        let a2 = Projection::parse("a", &["/z => /"]).unwrap();
        let a1 = Projection::parse("a", &["/m => /"]).unwrap();
        let mut projections = vec![b.clone(), a2.clone(), a1.clone()];
        projections.sort();
        assert_eq!(projections, vec![a1, a2, b]);
    }
}
