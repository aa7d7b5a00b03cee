//! Directory entries, attributes, and modifications.
//!
//! This is the gateway's own view of directory data, independent of any wire
//! library. Attribute values are strings; binary syntaxes travel base64
//! encoded, which matches their JSON representation.

use crate::ldap::dn::Dn;
use std::fmt;

/// The attribute carrying an entry's object classes.
pub const OBJECT_CLASS: &str = "objectClass";

/// A named attribute with zero or more values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when any value normalizes equal to `value`.
    pub fn contains_value(&self, value: &str) -> bool {
        let needle = normalize_value(value);
        self.values.iter().any(|v| normalize_value(v) == needle)
    }
}

/// A directory entry: a DN plus its attributes.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub dn: Dn,
    attributes: Vec<Attribute>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attributes: Vec::new(),
        }
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Case-insensitive attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.attribute(name)
            .and_then(|a| a.values.first())
            .map(String::as_str)
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.attribute(name).map(|a| a.values.as_slice()).unwrap_or(&[])
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|a| !a.is_empty())
    }

    pub fn object_classes(&self) -> impl Iterator<Item = &str> {
        self.values(OBJECT_CLASS).iter().map(String::as_str)
    }

    /// Add values to an attribute, creating it if needed.
    pub fn put(&mut self, attribute: Attribute) {
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(&attribute.name))
        {
            Some(existing) => {
                for value in attribute.values {
                    if !existing.contains_value(&value) {
                        existing.values.push(value);
                    }
                }
            }
            None => self.attributes.push(attribute),
        }
    }

    /// Replace an attribute's values wholesale. Empty values remove it.
    pub fn replace(&mut self, attribute: Attribute) {
        self.remove_attribute(&attribute.name);
        if !attribute.is_empty() {
            self.attributes.push(attribute);
        }
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attributes.retain(|a| !a.name.eq_ignore_ascii_case(name));
    }

    /// Remove specific values; the attribute disappears when none remain.
    pub fn remove_values(&mut self, name: &str, values: &[String]) {
        if let Some(attr) = self
            .attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            for value in values {
                let needle = normalize_value(value);
                attr.values.retain(|v| normalize_value(v) != needle);
            }
        }
        self.attributes.retain(|a| !a.values.is_empty());
    }
}

/// The kind of change carried by a [`Modification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    Add,
    /// With values: remove those values. Without: remove the attribute.
    Delete,
    Replace,
    /// Atomic integer increment; the single value is the delta.
    Increment,
}

/// One attribute-level change within a modify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub kind: ModificationKind,
    pub attribute: Attribute,
}

impl Modification {
    pub fn add(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            kind: ModificationKind::Add,
            attribute: Attribute::new(name, values),
        }
    }

    pub fn delete(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            kind: ModificationKind::Delete,
            attribute: Attribute::new(name, values),
        }
    }

    pub fn replace(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            kind: ModificationKind::Replace,
            attribute: Attribute::new(name, values),
        }
    }

    pub fn increment(name: impl Into<String>, delta: impl Into<String>) -> Self {
        Self {
            kind: ModificationKind::Increment,
            attribute: Attribute::new(name, vec![delta.into()]),
        }
    }
}

impl fmt::Display for Modification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ModificationKind::Add => "add",
            ModificationKind::Delete => "delete",
            ModificationKind::Replace => "replace",
            ModificationKind::Increment => "increment",
        };
        write!(f, "{kind} {}: {:?}", self.attribute.name, self.attribute.values)
    }
}

/// Fold a value under caseIgnore directory matching: lowercase, trim, and
/// collapse internal whitespace runs. Used for value diffing, DN comparison,
/// and reference resolution.
pub fn normalize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for c in value.trim().chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for lower in c.to_lowercase() {
            out.push(lower);
        }
    }
    out
}
