use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub const PATH_SEPARATOR: char = '/';

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("topic path must not be empty")]
    Empty,
    #[error("topic path '{path}' contains an empty segment")]
    EmptySegment { path: String },
    #[error("topic path '{path}' contains a control character")]
    ControlCharacter { path: String },
}

/// A validated, slash-delimited topic path.
///
/// A single leading `/` is accepted and dropped, so `/a/b` and `a/b` name the
/// same topic. Paths order segment by segment, which places a topic directly
/// before its descendants (`a`, `a/b`, `a/b/c`, `a-b`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPath(String);

impl TopicPath {
    pub fn new(path: impl AsRef<str>) -> Result<Self, PathError> {
        let raw = path.as_ref();
        let trimmed = raw.strip_prefix(PATH_SEPARATOR).unwrap_or(raw);
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        if trimmed.split(PATH_SEPARATOR).any(str::is_empty) {
            return Err(PathError::EmptySegment { path: raw.to_owned() });
        }
        if trimmed.chars().any(char::is_control) {
            return Err(PathError::ControlCharacter { path: raw.to_owned() });
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(PATH_SEPARATOR)
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    pub fn parent(&self) -> Option<TopicPath> {
        self.0.rsplit_once(PATH_SEPARATOR).map(|(parent, _)| Self(parent.to_owned()))
    }

    pub fn child(&self, segment: &str) -> Result<TopicPath, PathError> {
        Self::new(format!("{}{PATH_SEPARATOR}{segment}", self.0))
    }

    /// True if `self` equals `other` or lies beneath it.
    pub fn is_within(&self, other: &TopicPath) -> bool {
        self.is_descendant_of(other) || self == other
    }

    pub fn is_descendant_of(&self, other: &TopicPath) -> bool {
        self.0.len() > other.0.len()
            && self.0.starts_with(other.0.as_str())
            && self.0[other.0.len()..].starts_with(PATH_SEPARATOR)
    }
}

/// Paths order lexicographically by their text, so a parent precedes its
/// descendants but a subtree need not be contiguous (`a-b` sorts between
/// `a` and `a/b`).
impl Ord for TopicPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for TopicPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TopicPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TopicPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicPath> for String {
    fn from(value: TopicPath) -> Self {
        value.0
    }
}

impl AsRef<str> for TopicPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> TopicPath {
        TopicPath::new(raw).expect("valid path")
    }

    #[test]
    fn leading_separator_is_dropped() {
        assert_eq!(path("/a/b"), path("a/b"));
        assert_eq!(path("/a/b").as_str(), "a/b");
    }

    #[test]
    fn rejects_empty_and_malformed_paths() {
        assert_eq!(TopicPath::new(""), Err(PathError::Empty));
        assert_eq!(TopicPath::new("/"), Err(PathError::Empty));
        assert!(matches!(TopicPath::new("a//b"), Err(PathError::EmptySegment { .. })));
        assert!(matches!(TopicPath::new("a/b/"), Err(PathError::EmptySegment { .. })));
        assert!(matches!(TopicPath::new("a/\u{7}"), Err(PathError::ControlCharacter { .. })));
    }

    #[test]
    fn orders_lexicographically_by_text() {
        let mut paths = vec![path("a/b"), path("b"), path("a/c"), path("a"), path("a-b"), path("a/b/x")];
        paths.sort();
        let ordered: Vec<&str> = paths.iter().map(TopicPath::as_str).collect();
        assert_eq!(ordered, vec!["a", "a-b", "a/b", "a/b/x", "a/c", "b"]);
    }

    #[test]
    fn descendant_checks_respect_segment_boundaries() {
        assert!(path("a/b/c").is_descendant_of(&path("a/b")));
        assert!(!path("a/bc").is_descendant_of(&path("a/b")));
        assert!(!path("a/b").is_descendant_of(&path("a/b")));
        assert!(path("a/b").is_within(&path("a/b")));
        assert_eq!(path("a/b/c").parent(), Some(path("a/b")));
        assert_eq!(path("a").parent(), None);
    }
}
