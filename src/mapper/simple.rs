//! Simple mapper: one JSON scalar (or list of scalars) backed by one LDAP
//! attribute.

use crate::error::{Error, Result};
use crate::filter::FilterOp;
use crate::ldap::{Attribute, Entry, LdapFilter, Modification, normalize_value};
use crate::mapper::{Writability, check_writable};
use crate::path::JsonPointer;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

/// The JSON-side type of a simple property, driving both directions of the
/// value conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimpleType {
    #[default]
    String,
    Integer,
    Boolean,
    /// ISO 8601 in JSON, generalized time in the directory.
    DateTime,
    /// Base64 text in JSON, passed through to the directory verbatim.
    Binary,
}

const GENERALIZED_TIME: &str = "%Y%m%d%H%M%SZ";

#[derive(Debug, Clone)]
pub struct SimpleMapper {
    pub ldap_attribute: String,
    pub value_type: SimpleType,
    pub required: bool,
    pub multi_valued: bool,
    pub writability: Writability,
    pub default_values: Vec<Value>,
}

impl SimpleMapper {
    pub fn new(ldap_attribute: impl Into<String>) -> Self {
        Self {
            ldap_attribute: ldap_attribute.into(),
            value_type: SimpleType::String,
            required: false,
            multi_valued: false,
            writability: Writability::ReadWrite,
            default_values: Vec::new(),
        }
    }

    fn encode(&self, path: &JsonPointer, value: &Value) -> Result<String> {
        let type_error = |expected: &str| {
            Error::bad_request(format!("field '{path}' expects a {expected} value"))
        };
        match (self.value_type, value) {
            (SimpleType::String, Value::String(s)) => Ok(s.clone()),
            (SimpleType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Ok(n.to_string())
            }
            (SimpleType::Boolean, Value::Bool(b)) => {
                Ok(if *b { "TRUE" } else { "FALSE" }.to_string())
            }
            (SimpleType::DateTime, Value::String(s)) => {
                let parsed = DateTime::parse_from_rfc3339(s)
                    .map_err(|_| type_error("ISO 8601 date-time"))?;
                Ok(parsed
                    .with_timezone(&Utc)
                    .format(GENERALIZED_TIME)
                    .to_string())
            }
            (SimpleType::Binary, Value::String(s)) => {
                BASE64.decode(s).map_err(|_| type_error("base64"))?;
                Ok(s.clone())
            }
            (SimpleType::String, _) => Err(type_error("string")),
            (SimpleType::Integer, _) => Err(type_error("integer")),
            (SimpleType::Boolean, _) => Err(type_error("boolean")),
            (SimpleType::DateTime, _) => Err(type_error("ISO 8601 date-time")),
            (SimpleType::Binary, _) => Err(type_error("base64")),
        }
    }

    /// Lenient decoding: a directory value that does not parse under the
    /// declared type is surfaced as a plain string rather than failing the
    /// whole read.
    fn decode(&self, raw: &str) -> Value {
        match self.value_type {
            SimpleType::String | SimpleType::Binary => Value::String(raw.to_string()),
            SimpleType::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            SimpleType::Boolean => match raw.trim().to_ascii_uppercase().as_str() {
                "TRUE" => Value::Bool(true),
                "FALSE" => Value::Bool(false),
                _ => Value::String(raw.to_string()),
            },
            SimpleType::DateTime => NaiveDateTime::parse_from_str(raw.trim(), GENERALIZED_TIME)
                .map(|naive| {
                    Value::String(
                        naive
                            .and_utc()
                            .to_rfc3339_opts(SecondsFormat::Secs, true),
                    )
                })
                .unwrap_or_else(|_| Value::String(raw.to_string())),
        }
    }

    /// Normalization used for diffing. Binary values compare exactly (base64
    /// is case-significant); everything else folds under caseIgnore.
    fn norm(&self, raw: &str) -> String {
        match self.value_type {
            SimpleType::Binary => raw.to_string(),
            _ => normalize_value(raw),
        }
    }

    /// Encode a supplied JSON value into attribute values, enforcing the
    /// single/multi shape.
    fn encode_values(&self, path: &JsonPointer, value: &Value) -> Result<Vec<String>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => {
                if !self.multi_valued {
                    return Err(Error::bad_request(format!(
                        "field '{path}' is single-valued and cannot hold a list"
                    )));
                }
                items.iter().map(|item| self.encode(path, item)).collect()
            }
            single => {
                if self.multi_valued {
                    return Err(Error::bad_request(format!(
                        "field '{path}' is multi-valued and expects a list"
                    )));
                }
                Ok(vec![self.encode(path, single)?])
            }
        }
    }

    fn default_attribute_values(&self, path: &JsonPointer) -> Result<Vec<String>> {
        self.default_values
            .iter()
            .map(|v| self.encode(path, v))
            .collect()
    }

    pub fn create(&self, path: &JsonPointer, value: Option<&Value>) -> Result<Vec<Attribute>> {
        let apply = check_writable(self.writability, true, value.is_some(), path)?;
        let values = if apply {
            self.encode_values(path, value.unwrap_or(&Value::Null))?
        } else {
            self.default_attribute_values(path)?
        };
        if values.is_empty() {
            if self.required {
                return Err(Error::bad_request(format!(
                    "required field '{path}' is missing or empty"
                )));
            }
            return Ok(Vec::new());
        }
        Ok(vec![Attribute::new(self.ldap_attribute.clone(), values)])
    }

    pub fn read(&self, entry: &Entry) -> Result<Option<Value>> {
        let raw = entry.values(&self.ldap_attribute);
        if raw.is_empty() {
            return Ok(None);
        }
        let mut decoded: Vec<Value> = raw.iter().map(|v| self.decode(v)).collect();
        // A declared single-valued property with unexpected extra values is
        // returned as a list rather than rejected.
        if !self.multi_valued && decoded.len() == 1 {
            Ok(decoded.pop())
        } else {
            Ok(Some(Value::Array(decoded)))
        }
    }

    pub fn update(
        &self,
        path: &JsonPointer,
        entry: &Entry,
        new_value: Option<&Value>,
    ) -> Result<Vec<Modification>> {
        let current = entry.values(&self.ldap_attribute);
        if !self.writability.writable_on_update() {
            if let Some(new_value) = new_value {
                let target = match self.encode_values(path, new_value) {
                    Ok(target) => target,
                    Err(_) if self.writability.discards_writes() => return Ok(Vec::new()),
                    Err(err) => return Err(err),
                };
                let unchanged = target.len() == current.len()
                    && target
                        .iter()
                        .zip(current)
                        .all(|(a, b)| self.norm(a) == self.norm(b));
                if !unchanged && !self.writability.discards_writes() {
                    return Err(Error::bad_request(format!(
                        "field '{path}' is read-only and cannot be modified"
                    )));
                }
            }
            return Ok(Vec::new());
        }

        let target = match new_value {
            Some(v) => self.encode_values(path, v)?,
            None => Vec::new(),
        };
        if self.required && target.is_empty() {
            return Err(Error::bad_request(format!(
                "required field '{path}' cannot be emptied"
            )));
        }
        Ok(self.diff(current, target))
    }

    /// Minimal delete-then-add diff. Deletes are emitted first so an add of
    /// a re-cased value cannot collide under permissive-modify.
    fn diff(&self, current: &[String], target: Vec<String>) -> Vec<Modification> {
        if target.is_empty() {
            if current.is_empty() {
                return Vec::new();
            }
            return vec![Modification::delete(self.ldap_attribute.clone(), Vec::new())];
        }
        let current_keys: Vec<String> = current.iter().map(|v| self.norm(v)).collect();
        let target_keys: Vec<String> = target.iter().map(|v| self.norm(v)).collect();
        let removed: Vec<String> = current
            .iter()
            .zip(&current_keys)
            .filter(|(_, key)| !target_keys.contains(key))
            .map(|(v, _)| v.clone())
            .collect();
        let added: Vec<String> = target
            .iter()
            .zip(&target_keys)
            .filter(|(_, key)| !current_keys.contains(key))
            .map(|(v, _)| v.clone())
            .collect();
        let mut mods = Vec::new();
        if !removed.is_empty() {
            mods.push(Modification::delete(self.ldap_attribute.clone(), removed));
        }
        if !added.is_empty() {
            mods.push(Modification::add(self.ldap_attribute.clone(), added));
        }
        mods
    }

    pub fn patch(
        &self,
        path: &JsonPointer,
        operation: &crate::patch::PatchOperation,
    ) -> Result<Vec<Modification>> {
        use crate::patch::PatchOp;

        if !self.writability.writable_on_update() {
            if self.writability.discards_writes() {
                return Ok(Vec::new());
            }
            return Err(Error::bad_request(format!(
                "field '{path}' is read-only and cannot be patched"
            )));
        }

        let target = &operation.path;
        if target.is_root() {
            return match operation.op {
                PatchOp::Add => {
                    let value = required_value(path, operation)?;
                    let values = self.encode_values(path, value)?;
                    if self.multi_valued {
                        Ok(vec![Modification::add(self.ldap_attribute.clone(), values)])
                    } else {
                        Ok(vec![Modification::replace(
                            self.ldap_attribute.clone(),
                            values,
                        )])
                    }
                }
                PatchOp::Replace => {
                    let value = required_value(path, operation)?;
                    let values = self.encode_values(path, value)?;
                    if values.is_empty() {
                        self.check_removable(path)?;
                        Ok(vec![Modification::delete(
                            self.ldap_attribute.clone(),
                            Vec::new(),
                        )])
                    } else {
                        Ok(vec![Modification::replace(
                            self.ldap_attribute.clone(),
                            values,
                        )])
                    }
                }
                PatchOp::Remove => match &operation.value {
                    None | Some(Value::Null) => {
                        self.check_removable(path)?;
                        Ok(vec![Modification::delete(
                            self.ldap_attribute.clone(),
                            Vec::new(),
                        )])
                    }
                    Some(value) => {
                        let values = self.encode_values(path, value)?;
                        Ok(vec![Modification::delete(
                            self.ldap_attribute.clone(),
                            values,
                        )])
                    }
                },
                PatchOp::Increment => {
                    if self.value_type != SimpleType::Integer {
                        return Err(Error::bad_request(format!(
                            "field '{path}' is not an integer and cannot be incremented"
                        )));
                    }
                    let value = required_value(path, operation)?;
                    let delta = self.encode(path, value)?;
                    Ok(vec![Modification::increment(
                        self.ldap_attribute.clone(),
                        delta,
                    )])
                }
            };
        }

        if target.is_append() {
            if !self.multi_valued {
                return Err(Error::not_supported(format!(
                    "field '{path}' is single-valued; append is meaningless"
                )));
            }
            if operation.op != PatchOp::Add {
                return Err(Error::bad_request(format!(
                    "append target on '{path}' only supports 'add'"
                )));
            }
            let value = required_value(path, operation)?;
            // Only a single value may be appended; list payloads must target
            // the whole property instead.
            if value.is_array() {
                return Err(Error::not_supported(format!(
                    "append to '{path}' takes a single value, not a list"
                )));
            }
            let encoded = self.encode(path, value)?;
            return Ok(vec![Modification::add(
                self.ldap_attribute.clone(),
                vec![encoded],
            )]);
        }

        if target.head_is_index() {
            // LDAP attributes are unordered sets; positional addressing has
            // no stable meaning.
            return Err(Error::not_supported(format!(
                "indexed patch targets are not supported on '{path}'"
            )));
        }

        Err(Error::bad_request(format!(
            "field '{path}' has no sub-field '{target}'"
        )))
    }

    fn check_removable(&self, path: &JsonPointer) -> Result<()> {
        if self.required {
            return Err(Error::bad_request(format!(
                "required field '{path}' cannot be removed"
            )));
        }
        Ok(())
    }

    pub fn ldap_attributes(&self, out: &mut BTreeSet<String>) {
        out.insert(self.ldap_attribute.clone());
    }

    pub fn ldap_filter(
        &self,
        sub_path: Option<&JsonPointer>,
        operator: &FilterOp,
        value: Option<&Value>,
    ) -> LdapFilter {
        if sub_path.is_some_and(|p| !p.is_root()) {
            return LdapFilter::AlwaysFalse;
        }
        if matches!(operator, FilterOp::Present) {
            return LdapFilter::present(self.ldap_attribute.clone());
        }
        let Some(value) = value else {
            return LdapFilter::AlwaysFalse;
        };
        let Ok(encoded) = self.encode(&JsonPointer::root(), value) else {
            return LdapFilter::AlwaysFalse;
        };
        let attr = self.ldap_attribute.clone();
        match operator {
            FilterOp::Equals => LdapFilter::equality(attr, encoded),
            FilterOp::Contains => LdapFilter::contains(attr, encoded),
            FilterOp::StartsWith => LdapFilter::starts_with(attr, encoded),
            FilterOp::GreaterOrEqual => LdapFilter::GreaterOrEqual(attr, encoded),
            FilterOp::LessOrEqual => LdapFilter::LessOrEqual(attr, encoded),
            FilterOp::GreaterThan => LdapFilter::and(vec![
                LdapFilter::GreaterOrEqual(attr.clone(), encoded.clone()),
                LdapFilter::not(LdapFilter::equality(attr, encoded)),
            ]),
            FilterOp::LessThan => LdapFilter::and(vec![
                LdapFilter::LessOrEqual(attr.clone(), encoded.clone()),
                LdapFilter::not(LdapFilter::equality(attr, encoded)),
            ]),
            FilterOp::Extended(rule) => LdapFilter::Extensible {
                attribute: Some(attr),
                matching_rule: Some(rule.clone()),
                value: encoded,
            },
            FilterOp::Present => LdapFilter::present(attr),
        }
    }
}

fn required_value<'a>(
    path: &JsonPointer,
    operation: &'a crate::patch::PatchOperation,
) -> Result<&'a Value> {
    operation.value.as_ref().ok_or_else(|| {
        Error::bad_request(format!("patch of '{path}' requires a value"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::Dn;
    use crate::patch::PatchOperation;
    use proptest::prelude::*;
    use serde_json::json;

    fn mapper() -> SimpleMapper {
        SimpleMapper {
            multi_valued: true,
            ..SimpleMapper::new("mail")
        }
    }

    fn entry_with(values: &[&str]) -> Entry {
        let mut entry = Entry::new(Dn::parse("uid=test").unwrap());
        entry.put(Attribute::new(
            "mail",
            values.iter().map(|v| v.to_string()).collect(),
        ));
        entry
    }

    #[test]
    fn create_requires_required_fields() {
        let mapper = SimpleMapper {
            required: true,
            ..SimpleMapper::new("uid")
        };
        let err = mapper.create(&JsonPointer::parse("/uid"), None).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn create_applies_defaults_when_absent() {
        let mapper = SimpleMapper {
            default_values: vec![json!("active")],
            ..SimpleMapper::new("status")
        };
        let attrs = mapper.create(&JsonPointer::parse("/status"), None).unwrap();
        assert_eq!(attrs[0].values, ["active".to_string()]);
    }

    #[test]
    fn read_tolerates_unexpected_multiple_values() {
        let mapper = SimpleMapper::new("mail");
        let value = mapper.read(&entry_with(&["a@x", "b@x"])).unwrap().unwrap();
        assert_eq!(value, json!(["a@x", "b@x"]));
    }

    #[test]
    fn update_is_idempotent_on_current_projection() {
        let mapper = mapper();
        let entry = entry_with(&["a@x", "b@x"]);
        let current = mapper.read(&entry).unwrap().unwrap();
        let mods = mapper
            .update(&JsonPointer::parse("/mail"), &entry, Some(&current))
            .unwrap();
        assert!(mods.is_empty());
    }

    #[test]
    fn update_produces_minimal_delete_then_add() {
        let mapper = mapper();
        let entry = entry_with(&["a@x", "b@x"]);
        let mods = mapper
            .update(
                &JsonPointer::parse("/mail"),
                &entry,
                Some(&json!(["b@x", "c@x"])),
            )
            .unwrap();
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0].kind, crate::ldap::ModificationKind::Delete);
        assert_eq!(mods[0].attribute.values, ["a@x".to_string()]);
        assert_eq!(mods[1].kind, crate::ldap::ModificationKind::Add);
        assert_eq!(mods[1].attribute.values, ["c@x".to_string()]);
    }

    #[test]
    fn readonly_field_rejects_divergent_update() {
        let mapper = SimpleMapper {
            writability: Writability::ReadOnly,
            ..SimpleMapper::new("entryUUID")
        };
        let mut entry = Entry::new(Dn::parse("uid=test").unwrap());
        entry.put(Attribute::single("entryUUID", "abc"));
        let same = mapper
            .update(&JsonPointer::parse("/id"), &entry, Some(&json!("abc")))
            .unwrap();
        assert!(same.is_empty());
        let err = mapper
            .update(&JsonPointer::parse("/id"), &entry, Some(&json!("xyz")))
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn patch_append_rejects_list_payload() {
        let mapper = mapper();
        let op = PatchOperation::add("/-", json!(["a@x", "b@x"]));
        let err = mapper.patch(&JsonPointer::parse("/mail"), &op).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));

        let op = PatchOperation::add("/-", json!("a@x"));
        let mods = mapper.patch(&JsonPointer::parse("/mail"), &op).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].kind, crate::ldap::ModificationKind::Add);
    }

    #[test]
    fn patch_rejects_numeric_index() {
        let mapper = mapper();
        let op = PatchOperation::replace("/0", json!("a@x"));
        let err = mapper.patch(&JsonPointer::parse("/mail"), &op).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn boolean_and_datetime_conversions() {
        let flag = SimpleMapper {
            value_type: SimpleType::Boolean,
            ..SimpleMapper::new("enabled")
        };
        let attrs = flag
            .create(&JsonPointer::parse("/enabled"), Some(&json!(true)))
            .unwrap();
        assert_eq!(attrs[0].values, ["TRUE".to_string()]);

        let stamp = SimpleMapper {
            value_type: SimpleType::DateTime,
            ..SimpleMapper::new("expires")
        };
        let attrs = stamp
            .create(
                &JsonPointer::parse("/expires"),
                Some(&json!("2024-06-01T12:30:00Z")),
            )
            .unwrap();
        assert_eq!(attrs[0].values, ["20240601123000Z".to_string()]);
        let mut entry = Entry::new(Dn::root());
        entry.put(Attribute::single("expires", "20240601123000Z"));
        assert_eq!(
            stamp.read(&entry).unwrap().unwrap(),
            json!("2024-06-01T12:30:00Z")
        );
    }

    #[test]
    fn filter_rendering() {
        let mapper = SimpleMapper::new("cn");
        let f = mapper.ldap_filter(None, &FilterOp::Equals, Some(&json!("x")));
        assert_eq!(f.to_string(), "(cn=x)");
        let f = mapper.ldap_filter(None, &FilterOp::Contains, Some(&json!("x")));
        assert_eq!(f.to_string(), "(cn=*x*)");
        let f = mapper.ldap_filter(None, &FilterOp::Present, None);
        assert_eq!(f.to_string(), "(cn=*)");
        // Type-mismatched values cannot be expressed.
        let int = SimpleMapper {
            value_type: SimpleType::Integer,
            ..SimpleMapper::new("port")
        };
        assert!(
            int.ldap_filter(None, &FilterOp::Equals, Some(&json!("text")))
                .is_always_false()
        );
    }

    proptest! {
        #[test]
        fn string_values_round_trip(value in "[a-zA-Z0-9 .@-]{1,40}") {
            let mapper = SimpleMapper::new("description");
            let path = JsonPointer::parse("/description");
            let attrs = mapper.create(&path, Some(&json!(value))).unwrap();
            let mut entry = Entry::new(Dn::root());
            for attr in attrs {
                entry.put(attr);
            }
            let read = mapper.read(&entry).unwrap().unwrap();
            prop_assert_eq!(read, json!(value));
        }
    }
}
