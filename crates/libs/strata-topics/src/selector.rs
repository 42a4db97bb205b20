//! Topic selectors.
//!
//! A selector is an immutable predicate over topic paths, written as an
//! expression:
//!
//! | Prefix | Meaning |
//! |---|---|
//! | `>` (or none) | exact path |
//! | `?` | split-path pattern, one regex per segment |
//! | `*` | full-path pattern, one regex over the whole path |
//! | `#` | selector set, members separated by `////` |
//!
//! Path and split-path selectors accept a trailing descendant qualifier:
//! `//` selects the path and its descendants, `/` selects descendants only.

use crate::path::{PathError, TopicPath, PATH_SEPARATOR};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

pub const PATH_PREFIX: char = '>';
pub const SPLIT_PATTERN_PREFIX: char = '?';
pub const FULL_PATTERN_PREFIX: char = '*';
pub const SELECTOR_SET_PREFIX: char = '#';
pub const SELECTOR_SET_DELIMITER: &str = "////";

const REGEX_METACHARACTERS: &[char] =
    &['.', '*', '+', '?', '[', ']', '(', ')', '{', '}', '|', '^', '$', '\\'];

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("selector expression must not be empty")]
    Empty,
    #[error("selector set '{expression}' has no members")]
    EmptySet { expression: String },
    #[error("invalid path in selector '{expression}': {source}")]
    InvalidPath { expression: String, source: PathError },
    #[error("invalid pattern in selector '{expression}': {message}")]
    InvalidPattern { expression: String, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Qualifier {
    Exact,
    WithDescendants,
    DescendantsOnly,
}

impl Qualifier {
    fn split(body: &str) -> (&str, Qualifier) {
        if let Some(stripped) = body.strip_suffix("//") {
            (stripped, Qualifier::WithDescendants)
        } else if let Some(stripped) = body.strip_suffix(PATH_SEPARATOR) {
            (stripped, Qualifier::DescendantsOnly)
        } else {
            (body, Qualifier::Exact)
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Qualifier::Exact => "",
            Qualifier::WithDescendants => "//",
            Qualifier::DescendantsOnly => "/",
        }
    }

    /// Whether a path of `depth` segments qualifies once its leading segments
    /// matched the selector's `len` segments.
    fn accepts(self, depth: usize, len: usize) -> bool {
        match self {
            Qualifier::Exact => depth == len,
            Qualifier::WithDescendants => depth >= len,
            Qualifier::DescendantsOnly => depth > len,
        }
    }
}

#[derive(Clone, Debug)]
enum Segment {
    Literal(String),
    Pattern(Regex),
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == segment,
            Segment::Pattern(regex) => regex.is_match(segment),
        }
    }
}

#[derive(Clone, Debug)]
enum Kind {
    Path { path: TopicPath, qualifier: Qualifier },
    SplitPattern { segments: Vec<Segment>, qualifier: Qualifier },
    FullPattern { regex: Regex, prefix: String },
    Set(Vec<TopicSelector>),
}

/// An immutable topic path predicate.
///
/// Equality and hashing are structural over the canonical expression, so
/// `a/b` equals `>a/b` and set members compare without regard to order.
#[derive(Clone, Debug)]
pub struct TopicSelector {
    kind: Kind,
    expression: String,
}

impl TopicSelector {
    pub fn parse(expression: &str) -> Result<Self, SelectorError> {
        let mut chars = expression.chars();
        match chars.next() {
            None => Err(SelectorError::Empty),
            Some(PATH_PREFIX) => Self::parse_path(expression, chars.as_str()),
            Some(SPLIT_PATTERN_PREFIX) => Self::parse_split(expression, chars.as_str()),
            Some(FULL_PATTERN_PREFIX) => Self::parse_full(expression, chars.as_str()),
            Some(SELECTOR_SET_PREFIX) => {
                let members = chars
                    .as_str()
                    .split(SELECTOR_SET_DELIMITER)
                    .filter(|member| !member.is_empty())
                    .map(Self::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                if members.is_empty() {
                    return Err(SelectorError::EmptySet { expression: expression.to_owned() });
                }
                Ok(Self::union(members))
            }
            Some(_) => Self::parse_path(expression, expression),
        }
    }

    /// Selects a single path exactly.
    pub fn path(path: &TopicPath) -> Self {
        Self::from_kind(Kind::Path { path: path.clone(), qualifier: Qualifier::Exact })
    }

    /// Selects a path and all its descendants.
    pub fn branch(path: &TopicPath) -> Self {
        Self::from_kind(Kind::Path { path: path.clone(), qualifier: Qualifier::WithDescendants })
    }

    pub fn any_of(selectors: impl IntoIterator<Item = TopicSelector>) -> Result<Self, SelectorError> {
        let members: Vec<_> = selectors.into_iter().collect();
        if members.is_empty() {
            return Err(SelectorError::EmptySet { expression: SELECTOR_SET_PREFIX.to_string() });
        }
        Ok(Self::union(members))
    }

    pub fn any_of_expressions<I, S>(expressions: I) -> Result<Self, SelectorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let members = expressions
            .into_iter()
            .map(|expression| Self::parse(expression.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::any_of(members)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_set(&self) -> bool {
        matches!(self.kind, Kind::Set(_))
    }

    pub fn selects(&self, path: &str) -> bool {
        let path = path.strip_prefix(PATH_SEPARATOR).unwrap_or(path);
        if path.is_empty() {
            return false;
        }
        match &self.kind {
            Kind::Path { path: selected, qualifier } => match qualifier {
                Qualifier::Exact => path == selected.as_str(),
                Qualifier::WithDescendants => {
                    path == selected.as_str() || is_beneath(path, selected.as_str())
                }
                Qualifier::DescendantsOnly => is_beneath(path, selected.as_str()),
            },
            Kind::SplitPattern { segments, qualifier } => {
                let parts: Vec<&str> = path.split(PATH_SEPARATOR).collect();
                parts.len() >= segments.len()
                    && qualifier.accepts(parts.len(), segments.len())
                    && segments.iter().zip(&parts).all(|(segment, part)| segment.matches(part))
            }
            Kind::FullPattern { regex, .. } => regex.is_match(path),
            Kind::Set(members) => members.iter().any(|member| member.selects(path)),
        }
    }

    pub fn selects_path(&self, path: &TopicPath) -> bool {
        self.selects(path.as_str())
    }

    /// The longest literal run of whole leading segments every selected path
    /// must start with, or `""` when there is none.
    pub fn path_prefix(&self) -> String {
        match &self.kind {
            Kind::Path { path, .. } => path.as_str().to_owned(),
            Kind::SplitPattern { segments, .. } => segments
                .iter()
                .map_while(|segment| match segment {
                    Segment::Literal(literal) => Some(literal.as_str()),
                    Segment::Pattern(_) => None,
                })
                .collect::<Vec<_>>()
                .join("/"),
            Kind::FullPattern { prefix, .. } => prefix.clone(),
            Kind::Set(members) => {
                let prefixes: Vec<String> = members.iter().map(TopicSelector::path_prefix).collect();
                common_segment_prefix(&prefixes)
            }
        }
    }

    fn parse_path(expression: &str, body: &str) -> Result<Self, SelectorError> {
        let (raw, qualifier) = Qualifier::split(body);
        let path = TopicPath::new(raw).map_err(|source| SelectorError::InvalidPath {
            expression: expression.to_owned(),
            source,
        })?;
        Ok(Self::from_kind(Kind::Path { path, qualifier }))
    }

    fn parse_split(expression: &str, body: &str) -> Result<Self, SelectorError> {
        let (raw, qualifier) = Qualifier::split(body);
        let raw = raw.strip_prefix(PATH_SEPARATOR).unwrap_or(raw);
        if raw.is_empty() {
            return Err(SelectorError::InvalidPath {
                expression: expression.to_owned(),
                source: PathError::Empty,
            });
        }
        let segments = raw
            .split(PATH_SEPARATOR)
            .map(|segment| {
                if segment.is_empty() {
                    Err(SelectorError::InvalidPath {
                        expression: expression.to_owned(),
                        source: PathError::EmptySegment { path: raw.to_owned() },
                    })
                } else if segment.contains(REGEX_METACHARACTERS) {
                    anchored(expression, segment).map(Segment::Pattern)
                } else {
                    Ok(Segment::Literal(segment.to_owned()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_kind(Kind::SplitPattern { segments, qualifier }))
    }

    fn parse_full(expression: &str, body: &str) -> Result<Self, SelectorError> {
        if body.is_empty() {
            return Err(SelectorError::InvalidPattern {
                expression: expression.to_owned(),
                message: "empty pattern".into(),
            });
        }
        let regex = anchored(expression, body)?;
        let body = body.strip_prefix(PATH_SEPARATOR).unwrap_or(body);
        let prefix = match body.find(REGEX_METACHARACTERS) {
            None => body.to_owned(),
            Some(index) => match body[..index].rfind(PATH_SEPARATOR) {
                Some(end) => body[..end].to_owned(),
                None => String::new(),
            },
        };
        Ok(Self::from_kind(Kind::FullPattern { regex, prefix }))
    }

    fn union(members: Vec<TopicSelector>) -> Self {
        let mut unique = BTreeMap::new();
        for member in members {
            match member.kind {
                Kind::Set(nested) => {
                    for selector in nested {
                        unique.insert(selector.expression.clone(), selector);
                    }
                }
                _ => {
                    unique.insert(member.expression.clone(), member);
                }
            }
        }
        let mut members: Vec<TopicSelector> = unique.into_values().collect();
        if members.len() == 1 {
            if let Some(only) = members.pop() {
                return only;
            }
        }
        Self::from_kind(Kind::Set(members))
    }

    fn from_kind(kind: Kind) -> Self {
        let expression = match &kind {
            Kind::Path { path, qualifier } => format!("{PATH_PREFIX}{path}{}", qualifier.suffix()),
            Kind::SplitPattern { segments, qualifier } => {
                let body = segments
                    .iter()
                    .map(|segment| match segment {
                        Segment::Literal(literal) => literal.clone(),
                        Segment::Pattern(regex) => unanchored(regex.as_str()).to_owned(),
                    })
                    .collect::<Vec<_>>()
                    .join("/");
                format!("{SPLIT_PATTERN_PREFIX}{body}{}", qualifier.suffix())
            }
            Kind::FullPattern { regex, .. } => {
                format!("{FULL_PATTERN_PREFIX}{}", unanchored(regex.as_str()))
            }
            Kind::Set(members) => {
                let body = members
                    .iter()
                    .map(|member| member.expression.as_str())
                    .collect::<Vec<_>>()
                    .join(SELECTOR_SET_DELIMITER);
                format!("{SELECTOR_SET_PREFIX}{body}")
            }
        };
        Self { kind, expression }
    }
}

fn is_beneath(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with(PATH_SEPARATOR)
}

fn anchored(expression: &str, pattern: &str) -> Result<Regex, SelectorError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|err| SelectorError::InvalidPattern {
        expression: expression.to_owned(),
        message: err.to_string(),
    })
}

fn unanchored(anchored: &str) -> &str {
    anchored
        .strip_prefix("^(?:")
        .and_then(|inner| inner.strip_suffix(")$"))
        .unwrap_or(anchored)
}

fn common_segment_prefix(prefixes: &[String]) -> String {
    let mut iter = prefixes.iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let mut common: Vec<&str> =
        first.split(PATH_SEPARATOR).filter(|segment| !segment.is_empty()).collect();
    for prefix in iter {
        let segments: Vec<&str> = prefix.split(PATH_SEPARATOR).collect();
        let shared = common.iter().zip(&segments).take_while(|(a, b)| a == b).count();
        common.truncate(shared);
    }
    common.join("/")
}

impl PartialEq for TopicSelector {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for TopicSelector {}

impl Hash for TopicSelector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expression.hash(state);
    }
}

impl fmt::Display for TopicSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for TopicSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Conversion accepted wherever an operation takes a selector.
pub trait IntoSelector {
    fn into_selector(self) -> Result<TopicSelector, SelectorError>;
}

impl IntoSelector for TopicSelector {
    fn into_selector(self) -> Result<TopicSelector, SelectorError> {
        Ok(self)
    }
}

impl IntoSelector for &TopicSelector {
    fn into_selector(self) -> Result<TopicSelector, SelectorError> {
        Ok(self.clone())
    }
}

impl IntoSelector for &TopicPath {
    fn into_selector(self) -> Result<TopicSelector, SelectorError> {
        Ok(TopicSelector::path(self))
    }
}

impl IntoSelector for &str {
    fn into_selector(self) -> Result<TopicSelector, SelectorError> {
        TopicSelector::parse(self)
    }
}

impl IntoSelector for String {
    fn into_selector(self) -> Result<TopicSelector, SelectorError> {
        TopicSelector::parse(&self)
    }
}

impl IntoSelector for &String {
    fn into_selector(self) -> Result<TopicSelector, SelectorError> {
        TopicSelector::parse(self)
    }
}
