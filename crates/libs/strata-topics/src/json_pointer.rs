//! RFC 6901 JSON pointers.

use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PointerError {
    #[error("JSON pointer '{pointer}' must be empty or start with '/'")]
    MissingLeadingSlash { pointer: String },
    #[error("JSON pointer '{pointer}' has an invalid escape sequence")]
    InvalidEscape { pointer: String },
}

/// Result of resolving a pointer against a document. Explicit `null` and a
/// missing member are different outcomes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Lookup<'a> {
    Absent,
    Null,
    Value(&'a JsonValue),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsonPointer {
    tokens: Vec<String>,
}

impl JsonPointer {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(pointer: &str) -> Result<Self, PointerError> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(body) = pointer.strip_prefix('/') else {
            return Err(PointerError::MissingLeadingSlash { pointer: pointer.to_owned() });
        };
        let tokens = body
            .split('/')
            .map(|token| unescape(token).ok_or_else(|| PointerError::InvalidEscape { pointer: pointer.to_owned() }))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn child(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token.into());
        Self { tokens }
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.tokens.split_last()?;
        Some(Self { tokens: rest.to_vec() })
    }

    /// True if `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &JsonPointer) -> bool {
        other.tokens.starts_with(&self.tokens)
    }

    pub fn lookup<'a>(&self, document: &'a JsonValue) -> Lookup<'a> {
        let mut current = document;
        for token in &self.tokens {
            let next = match current {
                JsonValue::Object(members) => members.get(token),
                JsonValue::Array(items) => array_index(token).and_then(|index| items.get(index)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Lookup::Absent,
            }
        }
        match current {
            JsonValue::Null => Lookup::Null,
            value => Lookup::Value(value),
        }
    }
}

fn unescape(token: &str) -> Option<String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn array_index(token: &str) -> Option<usize> {
    if token.len() > 1 && token.starts_with('0') {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", token.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

impl FromStr for JsonPointer {
    type Err = PointerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pointer(raw: &str) -> JsonPointer {
        JsonPointer::parse(raw).expect("valid pointer")
    }

    #[test]
    fn escapes_round_trip_through_display() {
        let p = pointer("/a~1b/c~0d");
        assert_eq!(p.tokens(), ["a/b".to_string(), "c~d".to_string()]);
        assert_eq!(p.to_string(), "/a~1b/c~0d");
        assert!(JsonPointer::parse("a").is_err());
        assert!(JsonPointer::parse("/a~2").is_err());
    }

    #[test]
    fn lookup_distinguishes_null_from_absent() {
        let doc = json!({"a": {"b": null, "c": [10, 20]}});
        assert_eq!(pointer("/a/b").lookup(&doc), Lookup::Null);
        assert_eq!(pointer("/a/x").lookup(&doc), Lookup::Absent);
        assert_eq!(pointer("/a/c/1").lookup(&doc), Lookup::Value(&json!(20)));
        assert_eq!(pointer("/a/c/01").lookup(&doc), Lookup::Absent);
        assert_eq!(pointer("/a/c/-").lookup(&doc), Lookup::Absent);
        assert_eq!(pointer("").lookup(&doc), Lookup::Value(&doc));
    }

    #[test]
    fn prefix_relation() {
        assert!(pointer("/a").is_prefix_of(&pointer("/a/b")));
        assert!(pointer("/a").is_prefix_of(&pointer("/a")));
        assert!(JsonPointer::root().is_prefix_of(&pointer("/z")));
        assert!(!pointer("/a/b").is_prefix_of(&pointer("/a")));
        assert!(!pointer("/a").is_prefix_of(&pointer("/ab")));
        assert_eq!(pointer("/a/b").parent(), Some(pointer("/a")));
    }
}
