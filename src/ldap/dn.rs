//! Distinguished names and DN templates.
//!
//! DNs are modeled as ordered RDN lists, leaf first, the same shape the
//! directory wire format uses. Only single-AVA RDNs are supported; the
//! gateway never generates multi-valued RDNs and treats them as opaque if a
//! directory returns one.

use crate::error::{Error, Result};
use crate::ldap::entry::normalize_value;
use std::fmt;

/// A single relative distinguished name, `attribute=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    pub attribute: String,
    pub value: String,
}

impl Rdn {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute, escape_value(&self.value))
    }
}

/// A distinguished name. The empty DN is the directory root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    pub fn root() -> Self {
        Self { rdns: Vec::new() }
    }

    /// Parse a DN string. Handles backslash escapes within values; an empty
    /// string yields the root DN.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::root());
        }
        let mut rdns = Vec::new();
        for component in split_unescaped(s, ',') {
            let component = component.trim();
            let eq = find_unescaped(component, '=').ok_or_else(|| {
                Error::internal(format!("malformed DN component '{component}' in '{s}'"))
            })?;
            let attribute = component[..eq].trim().to_string();
            let value = unescape_value(component[eq + 1..].trim());
            if attribute.is_empty() {
                return Err(Error::internal(format!("empty attribute type in DN '{s}'")));
            }
            rdns.push(Rdn { attribute, value });
        }
        Ok(Self { rdns })
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Number of RDN levels below the root.
    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    /// The leaf RDN, if this is not the root.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// The DN one level up. The root is its own parent.
    pub fn parent(&self) -> Dn {
        Dn {
            rdns: self.rdns.iter().skip(1).cloned().collect(),
        }
    }

    /// A child DN formed by prepending `rdn`.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    /// True when `self` equals `ancestor` or sits beneath it.
    pub fn is_subordinate_of(&self, ancestor: &Dn) -> bool {
        if ancestor.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - ancestor.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(&ancestor.rdns)
            .all(|(a, b)| rdn_matches(a, b))
    }

    /// A case/whitespace-normalized rendering suitable as a map key.
    pub fn normalized(&self) -> String {
        self.rdns
            .iter()
            .map(|rdn| {
                format!(
                    "{}={}",
                    rdn.attribute.to_ascii_lowercase(),
                    normalize_value(&rdn.value)
                )
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// DN equality under directory normalization rules.
    pub fn matches(&self, other: &Dn) -> bool {
        self.rdns.len() == other.rdns.len()
            && self.rdns.iter().zip(&other.rdns).all(|(a, b)| rdn_matches(a, b))
    }
}

fn rdn_matches(a: &Rdn, b: &Rdn) -> bool {
    a.attribute.eq_ignore_ascii_case(&b.attribute)
        && normalize_value(&a.value) == normalize_value(&b.value)
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for rdn in &self.rdns {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
            first = false;
        }
        Ok(())
    }
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (i == 0 && (c == ' ' || c == '#'))
            || (i == last && c == ' ');
        if needs_escape {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn find_unescaped(s: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == target {
            return Some(i);
        }
    }
    None
}

/// One template RDN value part: a literal run or a `{var}` placeholder.
#[derive(Debug, Clone)]
enum ValuePart {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone)]
struct TemplateRdn {
    attribute: String,
    parts: Vec<ValuePart>,
}

/// A compiled DN template.
///
/// Templates are written in DN syntax with `{var}` placeholders, e.g.
/// `uid={uid},ou=people`. Trailing `..` components walk up the routing DN
/// before the fragment is prepended; a leading `/` marks the template as
/// absolute from the directory root.
#[derive(Debug, Clone)]
pub struct DnTemplate {
    rdns: Vec<TemplateRdn>,
    parent_hops: usize,
    absolute: bool,
    variables: Vec<String>,
}

impl DnTemplate {
    /// Compile a template string. Fails on malformed components or unclosed
    /// placeholders; this is a configuration-time check.
    pub fn compile(template: &str) -> std::result::Result<Self, String> {
        let (absolute, body) = match template.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, template),
        };
        let mut rdns = Vec::new();
        let mut parent_hops = 0usize;
        let mut variables = Vec::new();
        if !body.trim().is_empty() {
            for component in split_unescaped(body, ',') {
                let component = component.trim();
                if component == ".." {
                    parent_hops += 1;
                    continue;
                }
                if parent_hops > 0 {
                    return Err("'..' components must trail the DN fragment".to_string());
                }
                let eq = find_unescaped(component, '=')
                    .ok_or_else(|| format!("component '{component}' has no '='"))?;
                let attribute = component[..eq].trim().to_string();
                if attribute.is_empty() {
                    return Err(format!("component '{component}' has an empty attribute"));
                }
                let parts = parse_value_parts(component[eq + 1..].trim())?;
                for part in &parts {
                    if let ValuePart::Variable(name) = part {
                        if !variables.contains(name) {
                            variables.push(name.clone());
                        }
                    }
                }
                rdns.push(TemplateRdn { attribute, parts });
            }
        }
        if absolute && parent_hops > 0 {
            return Err("an absolute template cannot contain '..'".to_string());
        }
        Ok(Self {
            rdns,
            parent_hops,
            absolute,
            variables,
        })
    }

    /// Whether evaluation starts from the directory root rather than the
    /// routing DN.
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn parent_hops(&self) -> usize {
        self.parent_hops
    }

    /// Names of the `{var}` placeholders, in first-appearance order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// True when the template contributes at least one RDN level of its own,
    /// i.e. entries created beneath it may need intermediate glue entries.
    pub fn has_intermediate_levels(&self) -> bool {
        !self.rdns.is_empty()
    }

    /// Evaluate against a base DN, resolving placeholders through `lookup`.
    /// An unresolvable variable is a configuration error, surfaced as an
    /// internal failure rather than a client error.
    pub fn evaluate(
        &self,
        base: &Dn,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Dn> {
        let mut base = if self.absolute { Dn::root() } else { base.clone() };
        for _ in 0..self.parent_hops {
            base = base.parent();
        }
        // Prepend fragment RDNs from the base side inward.
        for template_rdn in self.rdns.iter().rev() {
            let mut value = String::new();
            for part in &template_rdn.parts {
                match part {
                    ValuePart::Literal(s) => value.push_str(s),
                    ValuePart::Variable(name) => {
                        let resolved = lookup(name).ok_or_else(|| {
                            Error::internal(format!(
                                "unresolved DN template variable '{{{name}}}'"
                            ))
                        })?;
                        value.push_str(&resolved);
                    }
                }
            }
            base = base.child(Rdn::new(template_rdn.attribute.clone(), value));
        }
        Ok(base)
    }
}

fn parse_value_parts(value: &str) -> std::result::Result<Vec<ValuePart>, String> {
    let mut parts = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(ValuePart::Literal(unescape_value(&rest[..open])));
        }
        let close = rest[open..]
            .find('}')
            .ok_or_else(|| format!("unclosed '{{' in '{value}'"))?;
        let name = &rest[open + 1..open + close];
        if name.is_empty() {
            return Err(format!("empty placeholder in '{value}'"));
        }
        parts.push(ValuePart::Variable(name.to_string()));
        rest = &rest[open + close + 1..];
    }
    if !rest.is_empty() {
        parts.push(ValuePart::Literal(unescape_value(rest)));
    }
    if parts.is_empty() {
        return Err(format!("empty RDN value in '{value}'"));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_round_trip() {
        let dn = Dn::parse("uid=alice,ou=people,dc=example,dc=com").unwrap();
        assert_eq!(dn.depth(), 4);
        assert_eq!(dn.rdn().unwrap().value, "alice");
        assert_eq!(dn.to_string(), "uid=alice,ou=people,dc=example,dc=com");
        assert_eq!(dn.parent().to_string(), "ou=people,dc=example,dc=com");
    }

    #[test]
    fn escaped_values_survive() {
        let dn = Dn::root().child(Rdn::new("cn", "Smith, John"));
        assert_eq!(dn.to_string(), "cn=Smith\\, John");
        let reparsed = Dn::parse(&dn.to_string()).unwrap();
        assert_eq!(reparsed.rdn().unwrap().value, "Smith, John");
    }

    #[test]
    fn trailing_space_is_escaped_after_multibyte_text() {
        let dn = Dn::root().child(Rdn::new("cn", "José "));
        assert_eq!(dn.to_string(), "cn=José\\ ");
        let reparsed = Dn::parse(&dn.to_string()).unwrap();
        assert_eq!(reparsed.rdn().unwrap().value, "José ");
    }

    #[test]
    fn normalized_folds_case_and_whitespace() {
        let a = Dn::parse("CN=LDAP  Connection Handler,dc=Example").unwrap();
        let b = Dn::parse("cn=ldap connection handler,DC=example").unwrap();
        assert_eq!(a.normalized(), b.normalized());
        assert!(a.matches(&b));
    }

    #[test]
    fn subordinate_check() {
        let base = Dn::parse("ou=people,dc=example").unwrap();
        let child = Dn::parse("uid=a,ou=people,dc=example").unwrap();
        assert!(child.is_subordinate_of(&base));
        assert!(base.is_subordinate_of(&base));
        assert!(!base.is_subordinate_of(&child));
    }

    #[test]
    fn template_relative_with_parent_hops() {
        let template = DnTemplate::compile("ou=groups,..").unwrap();
        let base = Dn::parse("ou=people,dc=example").unwrap();
        let dn = template.evaluate(&base, &|_| None).unwrap();
        assert_eq!(dn.to_string(), "ou=groups,dc=example");
    }

    #[test]
    fn template_variables_resolve() {
        let template = DnTemplate::compile("cn={device},ou=devices").unwrap();
        assert_eq!(template.variables(), ["device".to_string()]);
        let base = Dn::parse("uid=alice,ou=people,dc=example").unwrap();
        let dn = template
            .evaluate(&base, &|name| {
                (name == "device").then(|| "laptop".to_string())
            })
            .unwrap();
        assert_eq!(dn.to_string(), "cn=laptop,ou=devices,uid=alice,ou=people,dc=example");
    }

    #[test]
    fn template_unresolved_variable_is_internal_error() {
        let template = DnTemplate::compile("cn={missing}").unwrap();
        let err = template.evaluate(&Dn::root(), &|_| None).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn absolute_template_ignores_base() {
        let template = DnTemplate::compile("/dc=example,dc=com").unwrap();
        let base = Dn::parse("ou=ignored,o=elsewhere").unwrap();
        let dn = template.evaluate(&base, &|_| None).unwrap();
        assert_eq!(dn.to_string(), "dc=example,dc=com");
        assert!(template.is_absolute());
    }

    #[test]
    fn misplaced_parent_hop_is_rejected() {
        assert!(DnTemplate::compile("..,ou=x").is_err());
        assert!(DnTemplate::compile("/ou=x,..").is_err());
    }
}
