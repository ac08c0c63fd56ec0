//! Absolute paths in a node tree
//!
//! A path is a sequence of segments, each a name plus a 1-based
//! same-name-sibling index: `/a/b[2]/c`. The index is omitted from the
//! string form when it is 1.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::PathError;

/// One step of a path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    name: String,
    index: usize,
}

impl Segment {
    /// Segment with SNS index 1
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_index(name, 1)
    }

    /// Segment with an explicit SNS index (clamped to at least 1)
    pub fn with_index(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index: index.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Parse `name` or `name[n]`
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PathError::EmptySegment);
        }
        if text == "." || text == ".." {
            return Err(PathError::InvalidSegment(text.to_string()));
        }
        match text.find('[') {
            None => {
                if text.contains(']') {
                    return Err(PathError::InvalidSegment(text.to_string()));
                }
                Ok(Self::new(text))
            }
            Some(open) => {
                let name = &text[..open];
                let rest = &text[open + 1..];
                let index_text = rest
                    .strip_suffix(']')
                    .ok_or_else(|| PathError::InvalidSegment(text.to_string()))?;
                let index: usize = index_text
                    .parse()
                    .map_err(|_| PathError::InvalidSegment(text.to_string()))?;
                if name.is_empty() || index == 0 {
                    return Err(PathError::InvalidSegment(text.to_string()));
                }
                Ok(Self::with_index(name, index))
            }
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 1 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.index)
        }
    }
}

/// An absolute path; the root has no segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// The root path `/`
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Parse an absolute path such as `/a/b[2]`
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let text = text.trim();
        let body = text
            .strip_prefix('/')
            .ok_or_else(|| PathError::NotAbsolute(text.to_string()))?;
        Self::parse_segments(body)
    }

    /// Parse a relative path such as `b/c` (used for rule exceptions)
    pub fn parse_relative(text: &str) -> Result<Vec<Segment>, PathError> {
        let text = text.trim();
        if text.starts_with('/') {
            return Err(PathError::NotRelative(text.to_string()));
        }
        Ok(Self::parse_segments(text)?.segments)
    }

    fn parse_segments(body: &str) -> Result<Self, PathError> {
        let body = body.trim_end_matches('/');
        if body.is_empty() {
            return Ok(Self::root());
        }
        let segments = body
            .split('/')
            .map(Segment::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last_segment(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Parent path, or `None` for the root
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// The ancestor (or self) with exactly `depth` segments
    pub fn ancestor_at_depth(&self, depth: usize) -> Option<Path> {
        if depth > self.depth() {
            return None;
        }
        Some(Self {
            segments: self.segments[..depth].to_vec(),
        })
    }

    /// Append one segment
    pub fn child(&self, segment: Segment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Append a relative sequence of segments
    pub fn join(&self, relative: &[Segment]) -> Path {
        let mut segments = self.segments.clone();
        segments.extend_from_slice(relative);
        Self { segments }
    }

    /// Strictly above `other`
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.depth() < other.depth() && other.segments.starts_with(&self.segments)
    }

    /// Equal to or above `other`
    pub fn is_at_or_above(&self, other: &Path) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Equal to or below `other`
    pub fn is_at_or_below(&self, other: &Path) -> bool {
        other.is_at_or_above(self)
    }

    /// Segments of `self` below `ancestor`, or `None` if `ancestor` is not at or above
    pub fn relative_to(&self, ancestor: &Path) -> Option<&[Segment]> {
        if ancestor.is_at_or_above(self) {
            Some(&self.segments[ancestor.depth()..])
        } else {
            None
        }
    }

    /// All proper ancestors, root first
    pub fn ancestors(&self) -> impl Iterator<Item = Path> + '_ {
        (0..self.depth()).map(move |depth| Self {
            segments: self.segments[..depth].to_vec(),
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(p("/").to_string(), "/");
        assert_eq!(p("/a/b[2]/c").to_string(), "/a/b[2]/c");
        assert_eq!(p("/a/b[1]").to_string(), "/a/b");
        assert_eq!(p("/a/").to_string(), "/a");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(Path::parse("a/b"), Err(PathError::NotAbsolute(_))));
        assert!(matches!(Path::parse("/a//b"), Err(PathError::EmptySegment)));
        assert!(Path::parse("/a[0]").is_err());
        assert!(Path::parse("/a[x]").is_err());
        assert!(Path::parse("/..").is_err());
    }

    #[test]
    fn test_ancestry() {
        assert!(p("/").is_ancestor_of(&p("/a")));
        assert!(p("/a").is_ancestor_of(&p("/a/b")));
        assert!(!p("/a").is_ancestor_of(&p("/a")));
        assert!(p("/a").is_at_or_above(&p("/a")));
        assert!(!p("/a").is_ancestor_of(&p("/ab")));
        assert!(!p("/a[2]").is_ancestor_of(&p("/a/b")));
        assert!(p("/a/b").is_at_or_below(&p("/a")));
    }

    #[test]
    fn test_relative_and_join() {
        let rel = p("/a/b/c").relative_to(&p("/a")).unwrap().to_vec();
        assert_eq!(p("/x").join(&rel), p("/x/b/c"));
        assert!(p("/a").relative_to(&p("/b")).is_none());
    }

    #[test]
    fn test_parent_and_ancestors() {
        assert_eq!(p("/a/b").parent(), Some(p("/a")));
        assert_eq!(p("/").parent(), None);
        let ancestors: Vec<_> = p("/a/b/c").ancestors().collect();
        assert_eq!(ancestors, vec![p("/"), p("/a"), p("/a/b")]);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&p("/a/b[3]")).unwrap();
        assert_eq!(json, "\"/a/b[3]\"");
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p("/a/b[3]"));
    }
}
