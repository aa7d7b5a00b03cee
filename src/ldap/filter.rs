//! LDAP search filters.
//!
//! A tagged union over the filter grammar of RFC 4515, plus the two constant
//! filters the translator folds with: always-true renders as `(&)` and
//! always-false as `(|)`. The smart constructors [`LdapFilter::and`] and
//! [`LdapFilter::or`] perform that folding so composed filters stay minimal.

use crate::ldap::entry::{Entry, normalize_value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdapFilter {
    And(Vec<LdapFilter>),
    Or(Vec<LdapFilter>),
    Not(Box<LdapFilter>),
    Equality(String, String),
    Present(String),
    Substring {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        r#final: Option<String>,
    },
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    Extensible {
        attribute: Option<String>,
        matching_rule: Option<String>,
        value: String,
    },
    /// The contradiction-free conjunction `(&)`.
    AlwaysTrue,
    /// The empty disjunction `(|)`.
    AlwaysFalse,
}

impl LdapFilter {
    /// Conjunction with constant folding: always-true children are dropped
    /// and any always-false child collapses the whole filter.
    pub fn and(filters: Vec<LdapFilter>) -> LdapFilter {
        let mut kept = Vec::with_capacity(filters.len());
        for filter in filters {
            match filter {
                LdapFilter::AlwaysTrue => {}
                LdapFilter::AlwaysFalse => return LdapFilter::AlwaysFalse,
                other => kept.push(other),
            }
        }
        match (kept.pop(), kept.is_empty()) {
            (None, _) => LdapFilter::AlwaysTrue,
            (Some(only), true) => only,
            (Some(last), false) => {
                kept.push(last);
                LdapFilter::And(kept)
            }
        }
    }

    /// Disjunction with constant folding, the dual of [`LdapFilter::and`].
    pub fn or(filters: Vec<LdapFilter>) -> LdapFilter {
        let mut kept = Vec::with_capacity(filters.len());
        for filter in filters {
            match filter {
                LdapFilter::AlwaysFalse => {}
                LdapFilter::AlwaysTrue => return LdapFilter::AlwaysTrue,
                other => kept.push(other),
            }
        }
        match (kept.pop(), kept.is_empty()) {
            (None, _) => LdapFilter::AlwaysFalse,
            (Some(only), true) => only,
            (Some(last), false) => {
                kept.push(last);
                LdapFilter::Or(kept)
            }
        }
    }

    /// Negation, flipping the constant filters.
    pub fn not(filter: LdapFilter) -> LdapFilter {
        match filter {
            LdapFilter::AlwaysTrue => LdapFilter::AlwaysFalse,
            LdapFilter::AlwaysFalse => LdapFilter::AlwaysTrue,
            LdapFilter::Not(inner) => *inner,
            other => LdapFilter::Not(Box::new(other)),
        }
    }

    pub fn equality(attribute: impl Into<String>, value: impl Into<String>) -> LdapFilter {
        LdapFilter::Equality(attribute.into(), value.into())
    }

    pub fn present(attribute: impl Into<String>) -> LdapFilter {
        LdapFilter::Present(attribute.into())
    }

    pub fn starts_with(attribute: impl Into<String>, prefix: impl Into<String>) -> LdapFilter {
        LdapFilter::Substring {
            attribute: attribute.into(),
            initial: Some(prefix.into()),
            any: Vec::new(),
            r#final: None,
        }
    }

    pub fn contains(attribute: impl Into<String>, infix: impl Into<String>) -> LdapFilter {
        LdapFilter::Substring {
            attribute: attribute.into(),
            initial: None,
            any: vec![infix.into()],
            r#final: None,
        }
    }

    /// Parse an RFC 4515 filter string. Used for configured base search
    /// filters, so failures are configuration errors.
    pub fn parse(s: &str) -> std::result::Result<LdapFilter, String> {
        let (filter, rest) = parse_filter(s.trim())?;
        if !rest.trim().is_empty() {
            return Err(format!("trailing content after filter: '{rest}'"));
        }
        Ok(filter)
    }

    pub fn is_always_false(&self) -> bool {
        matches!(self, LdapFilter::AlwaysFalse)
    }

    pub fn is_always_true(&self) -> bool {
        matches!(self, LdapFilter::AlwaysTrue)
    }

    /// Evaluate against an entry under caseIgnore matching. This powers the
    /// in-memory directory backend and assertion-control checks; a real
    /// directory evaluates filters server side.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            LdapFilter::And(fs) => fs.iter().all(|f| f.matches(entry)),
            LdapFilter::Or(fs) => fs.iter().any(|f| f.matches(entry)),
            LdapFilter::Not(f) => !f.matches(entry),
            LdapFilter::Equality(attr, value) => {
                let needle = normalize_value(value);
                entry
                    .values(attr)
                    .iter()
                    .any(|v| normalize_value(v) == needle)
            }
            LdapFilter::Present(attr) => entry.has_attribute(attr),
            LdapFilter::Substring {
                attribute,
                initial,
                any,
                r#final,
            } => entry.values(attribute).iter().any(|v| {
                let v = normalize_value(v);
                let mut pos = 0;
                if let Some(prefix) = initial {
                    let prefix = normalize_value(prefix);
                    if !v.starts_with(&prefix) {
                        return false;
                    }
                    pos = prefix.len();
                }
                for fragment in any {
                    let fragment = normalize_value(fragment);
                    match v[pos..].find(&fragment) {
                        Some(at) => pos += at + fragment.len(),
                        None => return false,
                    }
                }
                match r#final {
                    Some(suffix) => v[pos..].ends_with(&normalize_value(suffix)),
                    None => true,
                }
            }),
            LdapFilter::GreaterOrEqual(attr, value) => {
                entry.values(attr).iter().any(|v| compare_values(v, value) >= 0)
            }
            LdapFilter::LessOrEqual(attr, value) => {
                entry.values(attr).iter().any(|v| compare_values(v, value) <= 0)
            }
            // Extensible matching rules are directory-specific; the in-memory
            // backend only honors plain attribute equality for them.
            LdapFilter::Extensible {
                attribute: Some(attr),
                value,
                ..
            } => {
                let needle = normalize_value(value);
                entry
                    .values(attr)
                    .iter()
                    .any(|v| normalize_value(v) == needle)
            }
            LdapFilter::Extensible { attribute: None, .. } => false,
            LdapFilter::AlwaysTrue => true,
            LdapFilter::AlwaysFalse => false,
        }
    }
}

/// Ordering comparison: numeric when both sides parse as integers, otherwise
/// normalized string order.
fn compare_values(a: &str, b: &str) -> i8 {
    let ordering = match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => normalize_value(a).cmp(&normalize_value(b)),
    };
    ordering as i8
}

fn parse_filter(s: &str) -> std::result::Result<(LdapFilter, &str), String> {
    let s = s.trim_start();
    let inner = s
        .strip_prefix('(')
        .ok_or_else(|| format!("expected '(' at '{s}'"))?;
    match inner.chars().next() {
        Some('&') => {
            let (children, rest) = parse_set(&inner[1..])?;
            Ok((LdapFilter::and(children), rest))
        }
        Some('|') => {
            let (children, rest) = parse_set(&inner[1..])?;
            Ok((LdapFilter::or(children), rest))
        }
        Some('!') => {
            let (child, rest) = parse_filter(&inner[1..])?;
            let rest = rest
                .strip_prefix(')')
                .ok_or_else(|| format!("unclosed '(!' near '{rest}'"))?;
            Ok((LdapFilter::not(child), rest))
        }
        Some(_) => {
            let close = inner
                .find(')')
                .ok_or_else(|| format!("unclosed filter at '{s}'"))?;
            let item = parse_item(&inner[..close])?;
            Ok((item, &inner[close + 1..]))
        }
        None => Err("unexpected end of filter".to_string()),
    }
}

fn parse_set(mut s: &str) -> std::result::Result<(Vec<LdapFilter>, &str), String> {
    let mut children = Vec::new();
    loop {
        if let Some(rest) = s.trim_start().strip_prefix(')') {
            return Ok((children, rest));
        }
        let (child, rest) = parse_filter(s)?;
        children.push(child);
        s = rest;
    }
}

/// One `attr OP value` item, already stripped of its parentheses.
fn parse_item(s: &str) -> std::result::Result<LdapFilter, String> {
    let eq = s
        .find('=')
        .ok_or_else(|| format!("filter item '{s}' has no '='"))?;
    let (lhs, value) = (&s[..eq], &s[eq + 1..]);
    if let Some(attribute) = lhs.strip_suffix('>') {
        return Ok(LdapFilter::GreaterOrEqual(
            attribute.to_string(),
            unescape_filter_value(value),
        ));
    }
    if let Some(attribute) = lhs.strip_suffix('<') {
        return Ok(LdapFilter::LessOrEqual(
            attribute.to_string(),
            unescape_filter_value(value),
        ));
    }
    if let Some(lhs) = lhs.strip_suffix(':') {
        let (attribute, rule) = match lhs.split_once(':') {
            Some((attr, rule)) => (attr, Some(rule.to_string())),
            None => (lhs, None),
        };
        return Ok(LdapFilter::Extensible {
            attribute: (!attribute.is_empty()).then(|| attribute.to_string()),
            matching_rule: rule,
            value: unescape_filter_value(value),
        });
    }
    let attribute = lhs.to_string();
    if value == "*" {
        return Ok(LdapFilter::Present(attribute));
    }
    if !value.contains('*') {
        return Ok(LdapFilter::Equality(
            attribute,
            unescape_filter_value(value),
        ));
    }
    let mut parts = value.split('*').map(unescape_filter_value);
    let initial = parts.next().filter(|p| !p.is_empty());
    let mut any: Vec<String> = parts.collect();
    let r#final = any.pop().filter(|p| !p.is_empty());
    any.retain(|p| !p.is_empty());
    Ok(LdapFilter::Substring {
        attribute,
        initial,
        any,
        r#final,
    })
}

fn unescape_filter_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            if let Ok(byte) = u8::from_str_radix(&value[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Escape a filter assertion value per RFC 4515. Non-ASCII text passes
/// through as raw UTF-8; only the filter delimiters need escaping.
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' | '(' | ')' | '\\' | '\0' => out.push_str(&format!("\\{:02x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for LdapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdapFilter::And(fs) => {
                f.write_str("(&")?;
                for inner in fs {
                    write!(f, "{inner}")?;
                }
                f.write_str(")")
            }
            LdapFilter::Or(fs) => {
                f.write_str("(|")?;
                for inner in fs {
                    write!(f, "{inner}")?;
                }
                f.write_str(")")
            }
            LdapFilter::Not(inner) => write!(f, "(!{inner})"),
            LdapFilter::Equality(attr, value) => {
                write!(f, "({attr}={})", escape_filter_value(value))
            }
            LdapFilter::Present(attr) => write!(f, "({attr}=*)"),
            LdapFilter::Substring {
                attribute,
                initial,
                any,
                r#final,
            } => {
                write!(f, "({attribute}=")?;
                if let Some(prefix) = initial {
                    write!(f, "{}", escape_filter_value(prefix))?;
                }
                f.write_str("*")?;
                for fragment in any {
                    write!(f, "{}*", escape_filter_value(fragment))?;
                }
                if let Some(suffix) = r#final {
                    write!(f, "{}", escape_filter_value(suffix))?;
                }
                f.write_str(")")
            }
            LdapFilter::GreaterOrEqual(attr, value) => {
                write!(f, "({attr}>={})", escape_filter_value(value))
            }
            LdapFilter::LessOrEqual(attr, value) => {
                write!(f, "({attr}<={})", escape_filter_value(value))
            }
            LdapFilter::Extensible {
                attribute,
                matching_rule,
                value,
            } => {
                f.write_str("(")?;
                if let Some(attr) = attribute {
                    f.write_str(attr)?;
                }
                if let Some(rule) = matching_rule {
                    write!(f, ":{rule}")?;
                }
                write!(f, ":={})", escape_filter_value(value))
            }
            LdapFilter::AlwaysTrue => f.write_str("(&)"),
            LdapFilter::AlwaysFalse => f.write_str("(|)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::dn::Dn;
    use crate::ldap::entry::Attribute;

    fn entry() -> Entry {
        let mut e = Entry::new(Dn::parse("cn=test").unwrap());
        e.put(Attribute::new(
            "objectClass",
            vec!["top".into(), "person".into()],
        ));
        e.put(Attribute::single("cn", "LDAP Connection Handler"));
        e.put(Attribute::single("port", "389"));
        e
    }

    #[test]
    fn and_folds_constants() {
        let x = LdapFilter::equality("cn", "x");
        assert_eq!(
            LdapFilter::and(vec![LdapFilter::AlwaysTrue, x.clone()]),
            x
        );
        assert_eq!(
            LdapFilter::and(vec![LdapFilter::AlwaysFalse, x.clone()]),
            LdapFilter::AlwaysFalse
        );
        assert_eq!(
            LdapFilter::or(vec![LdapFilter::AlwaysFalse, x.clone()]),
            x
        );
        assert_eq!(
            LdapFilter::or(vec![LdapFilter::AlwaysTrue, x]),
            LdapFilter::AlwaysTrue
        );
        assert_eq!(LdapFilter::not(LdapFilter::AlwaysTrue), LdapFilter::AlwaysFalse);
    }

    #[test]
    fn renders_rfc4515() {
        let filter = LdapFilter::and(vec![
            LdapFilter::equality("objectClass", "person"),
            LdapFilter::not(LdapFilter::present("deleted")),
        ]);
        assert_eq!(filter.to_string(), "(&(objectClass=person)(!(deleted=*)))");
        assert_eq!(LdapFilter::AlwaysTrue.to_string(), "(&)");
        assert_eq!(LdapFilter::AlwaysFalse.to_string(), "(|)");
        assert_eq!(
            LdapFilter::equality("cn", "a*b").to_string(),
            "(cn=a\\2ab)"
        );
    }

    #[test]
    fn non_ascii_values_render_as_raw_utf8() {
        let filter = LdapFilter::equality("cn", "José");
        assert_eq!(filter.to_string(), "(cn=José)");
        assert_eq!(LdapFilter::parse("(cn=José)").unwrap(), filter);

        let filter = LdapFilter::equality("cn", "(Zoë)");
        assert_eq!(filter.to_string(), "(cn=\\28Zoë\\29)");
        assert_eq!(LdapFilter::parse(&filter.to_string()).unwrap(), filter);
    }

    #[test]
    fn parses_rfc4515_strings() {
        assert_eq!(
            LdapFilter::parse("(cn=alice)").unwrap(),
            LdapFilter::equality("cn", "alice")
        );
        assert_eq!(
            LdapFilter::parse("(&(objectClass=person)(!(deleted=*)))").unwrap(),
            LdapFilter::and(vec![
                LdapFilter::equality("objectClass", "person"),
                LdapFilter::not(LdapFilter::present("deleted")),
            ])
        );
        assert_eq!(LdapFilter::parse("(&)").unwrap(), LdapFilter::AlwaysTrue);
        assert_eq!(LdapFilter::parse("(|)").unwrap(), LdapFilter::AlwaysFalse);
        assert_eq!(
            LdapFilter::parse("(cn=a*b*c)").unwrap(),
            LdapFilter::Substring {
                attribute: "cn".into(),
                initial: Some("a".into()),
                any: vec!["b".into()],
                r#final: Some("c".into()),
            }
        );
        assert_eq!(
            LdapFilter::parse("(uidNumber>=1000)").unwrap(),
            LdapFilter::GreaterOrEqual("uidNumber".into(), "1000".into())
        );
        assert_eq!(
            LdapFilter::parse("(cn=parens \\28\\29)").unwrap(),
            LdapFilter::equality("cn", "parens ()")
        );
        assert_eq!(
            LdapFilter::parse("(member:1.2.840.113556.1.4.1941:=cn=x)").unwrap(),
            LdapFilter::Extensible {
                attribute: Some("member".into()),
                matching_rule: Some("1.2.840.113556.1.4.1941".into()),
                value: "cn=x".into(),
            }
        );
        assert!(LdapFilter::parse("(cn=alice").is_err());
        assert!(LdapFilter::parse("(cn=a)(cn=b)").is_err());
        assert!(LdapFilter::parse("cn=alice").is_err());
    }

    #[test]
    fn parse_round_trips_rendering() {
        for text in [
            "(&(objectClass=person)(|(cn=a)(cn=b)))",
            "(!(uid=*))",
            "(sn=sm*th)",
        ] {
            let filter = LdapFilter::parse(text).unwrap();
            assert_eq!(filter.to_string(), text);
        }
    }

    #[test]
    fn matches_under_normalization() {
        let e = entry();
        assert!(LdapFilter::equality("cn", "ldap  connection HANDLER").matches(&e));
        assert!(LdapFilter::starts_with("cn", "LDAP").matches(&e));
        assert!(LdapFilter::contains("cn", "connection").matches(&e));
        assert!(LdapFilter::present("port").matches(&e));
        assert!(LdapFilter::GreaterOrEqual("port".into(), "100".into()).matches(&e));
        assert!(!LdapFilter::LessOrEqual("port".into(), "100".into()).matches(&e));
        assert!(LdapFilter::AlwaysTrue.matches(&e));
        assert!(!LdapFilter::AlwaysFalse.matches(&e));
    }
}
