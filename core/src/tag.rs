//! Tags are the unit the query engine filters on.
//!
//! A tag is a (key, value) pair attached to an event. Unlike the compile-time
//! domain identifiers of earlier designs, tags are plain runtime strings:
//! any consumer can invent a new tag key without touching a schema. The only
//! rule is that both the key and the value must be non-empty.
use std::fmt;

/// Error returned when a tag's key or value is empty.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("tag key and value must be non-empty strings (got key={key:?}, value={value:?})")]
pub struct InvalidTag {
    key: String,
    value: String,
}

/// A (key, value) pair attached to an event.
///
/// Multiple tags on the same event are ordered by insertion but are matched
/// as a set: a query matches when every tag it requires is present,
/// regardless of the order the event carries them in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Creates a new tag, rejecting empty keys or values.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, InvalidTag> {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return Err(InvalidTag { key, value });
        }
        Ok(Self { key, value })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Canonical `key=value` wire form used both in the `tags` column and in
    /// tag-based idempotency/statement identifiers.
    pub fn canonical(&self) -> String {
        format!("{}={}", self.key, self.value)
    }

    /// Parses the canonical `key=value` form back into a `Tag`.
    pub fn parse(s: &str) -> Result<Self, InvalidTag> {
        match s.split_once('=') {
            Some((key, value)) => Tag::new(key, value),
            None => Err(InvalidTag {
                key: s.to_string(),
                value: String::new(),
            }),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_builds_a_valid_tag() {
        let tag = Tag::new("wallet_id", "w1").unwrap();
        assert_eq!(tag.key(), "wallet_id");
        assert_eq!(tag.value(), "w1");
        assert_eq!(tag.canonical(), "wallet_id=w1");
    }

    #[test]
    fn it_rejects_empty_key_or_value() {
        assert!(Tag::new("", "w1").is_err());
        assert!(Tag::new("wallet_id", "").is_err());
    }

    #[test]
    fn it_round_trips_through_canonical_form() {
        let tag = Tag::new("statement_id", "w1:2026:07").unwrap();
        let parsed = Tag::parse(&tag.canonical()).unwrap();
        assert_eq!(tag, parsed);
    }

    #[test]
    fn it_rejects_parsing_a_string_without_a_separator() {
        assert!(Tag::parse("no-separator").is_err());
    }
}
