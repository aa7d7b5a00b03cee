//! JSON pointer paths.
//!
//! Pointers address a property (or sub-property) of a JSON resource. They are
//! used three ways: as diagnostic context in validation errors, as patch
//! operation targets, and as the field paths of query filter assertions.
//! Tokens follow RFC 6901, including the `~0`/`~1` escapes and the `-`
//! end-of-array marker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The end-of-array marker token recognized in patch targets.
pub const APPEND_TOKEN: &str = "-";

/// A parsed JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPointer {
    tokens: Vec<String>,
}

impl JsonPointer {
    /// The empty pointer, addressing the whole document.
    pub fn root() -> Self {
        Self { tokens: Vec::new() }
    }

    /// Parse a pointer. Both the canonical leading-slash form (`/a/b`) and
    /// the bare form (`a/b`) are accepted; the empty string is the root.
    pub fn parse(s: &str) -> Self {
        let s = s.strip_prefix('/').unwrap_or(s);
        if s.is_empty() {
            return Self::root();
        }
        Self {
            tokens: s.split('/').map(unescape_token).collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The first token, if any.
    pub fn head(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    /// Everything after the first token.
    pub fn tail(&self) -> JsonPointer {
        JsonPointer {
            tokens: self.tokens.iter().skip(1).cloned().collect(),
        }
    }

    /// A new pointer with `token` appended. Used to build diagnostic paths
    /// while descending a mapper tree.
    pub fn child(&self, token: &str) -> JsonPointer {
        let mut tokens = self.tokens.clone();
        tokens.push(token.to_string());
        JsonPointer { tokens }
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    /// True when the sole remaining token is the `-` append marker.
    pub fn is_append(&self) -> bool {
        self.tokens.len() == 1 && self.tokens[0] == APPEND_TOKEN
    }

    /// True when the first token is a numeric array index.
    pub fn head_is_index(&self) -> bool {
        self.head()
            .is_some_and(|t| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()))
    }
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", escape_token(token))?;
        }
        Ok(())
    }
}

impl From<JsonPointer> for String {
    fn from(p: JsonPointer) -> String {
        p.to_string()
    }
}

impl TryFrom<String> for JsonPointer {
    type Error = std::convert::Infallible;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Ok(JsonPointer::parse(&s))
    }
}

impl From<&str> for JsonPointer {
    fn from(s: &str) -> Self {
        JsonPointer::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_bare_forms() {
        assert_eq!(JsonPointer::parse("/a/b"), JsonPointer::parse("a/b"));
        assert!(JsonPointer::parse("").is_root());
        assert_eq!(JsonPointer::parse("/a/b").head(), Some("a"));
        assert_eq!(JsonPointer::parse("/a/b").tail().head(), Some("b"));
    }

    #[test]
    fn escapes_round_trip() {
        let p = JsonPointer::root().child("a/b").child("c~d");
        assert_eq!(p.to_string(), "/a~1b/c~0d");
        assert_eq!(JsonPointer::parse(&p.to_string()), p);
    }

    #[test]
    fn recognizes_append_and_index_tokens() {
        assert!(JsonPointer::parse("/-").is_append());
        assert!(!JsonPointer::parse("/a/-").is_append());
        assert!(JsonPointer::parse("/0").head_is_index());
        assert!(!JsonPointer::parse("/-").head_is_index());
        assert!(!JsonPointer::parse("/name").head_is_index());
    }
}
