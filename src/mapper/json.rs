//! JSON-syntax attribute mapper: an arbitrary JSON value stored as the text
//! of a single LDAP attribute value.

use crate::error::{Error, Result};
use crate::filter::FilterOp;
use crate::ldap::{Attribute, Entry, LdapFilter, Modification};
use crate::mapper::{Writability, check_writable};
use crate::patch::{PatchOp, PatchOperation};
use crate::path::JsonPointer;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct JsonMapper {
    pub ldap_attribute: String,
    pub required: bool,
    pub multi_valued: bool,
    pub writability: Writability,
    /// Extensible matching rule for server-side JSON filtering, when the
    /// directory provides one.
    pub matching_rule: Option<String>,
}

impl JsonMapper {
    pub fn new(ldap_attribute: impl Into<String>) -> Self {
        Self {
            ldap_attribute: ldap_attribute.into(),
            required: false,
            multi_valued: false,
            writability: Writability::ReadWrite,
            matching_rule: None,
        }
    }

    /// Serialize values. serde_json's map is ordered, so equal values always
    /// serialize identically and text comparison is a sound diff.
    fn encode_values(&self, path: &JsonPointer, value: &Value) -> Result<Vec<String>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) if self.multi_valued => items
                .iter()
                .map(|item| serde_json::to_string(item).map_err(Error::from))
                .collect(),
            _ if self.multi_valued => Err(Error::bad_request(format!(
                "field '{path}' is multi-valued and expects a list"
            ))),
            single => Ok(vec![serde_json::to_string(single)?]),
        }
    }

    /// Lenient decode: attribute text that is not valid JSON is surfaced as
    /// a plain string.
    fn decode(&self, raw: &str) -> Value {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    }

    pub fn create(&self, path: &JsonPointer, value: Option<&Value>) -> Result<Vec<Attribute>> {
        let apply = check_writable(self.writability, true, value.is_some(), path)?;
        let values = if apply {
            self.encode_values(path, value.unwrap_or(&Value::Null))?
        } else {
            Vec::new()
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
                let target = self.encode_values(path, new_value).unwrap_or_default();
                if target != current && !self.writability.discards_writes() {
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
        if target.is_empty() {
            if current.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![Modification::delete(
                self.ldap_attribute.clone(),
                Vec::new(),
            )]);
        }
        let removed: Vec<String> = current
            .iter()
            .filter(|v| !target.contains(v))
            .cloned()
            .collect();
        let added: Vec<String> = target
            .iter()
            .filter(|v| !current.contains(v))
            .cloned()
            .collect();
        let mut mods = Vec::new();
        if !removed.is_empty() {
            mods.push(Modification::delete(self.ldap_attribute.clone(), removed));
        }
        if !added.is_empty() {
            mods.push(Modification::add(self.ldap_attribute.clone(), added));
        }
        Ok(mods)
    }

    pub fn patch(&self, path: &JsonPointer, operation: &PatchOperation) -> Result<Vec<Modification>> {
        if !self.writability.writable_on_update() {
            if self.writability.discards_writes() {
                return Ok(Vec::new());
            }
            return Err(Error::bad_request(format!(
                "field '{path}' is read-only and cannot be patched"
            )));
        }
        // The attribute value is an opaque JSON document; only whole-value
        // operations have directory-expressible semantics.
        if !operation.path.is_root() {
            return Err(Error::not_supported(format!(
                "patch targets inside JSON field '{path}' are not supported"
            )));
        }
        match operation.op {
            PatchOp::Add | PatchOp::Replace => {
                let value = operation.value.as_ref().ok_or_else(|| {
                    Error::bad_request(format!("patch of '{path}' requires a value"))
                })?;
                let values = self.encode_values(path, value)?;
                if values.is_empty() {
                    return Ok(vec![Modification::delete(
                        self.ldap_attribute.clone(),
                        Vec::new(),
                    )]);
                }
                Ok(vec![Modification::replace(
                    self.ldap_attribute.clone(),
                    values,
                )])
            }
            PatchOp::Remove => Ok(vec![Modification::delete(
                self.ldap_attribute.clone(),
                Vec::new(),
            )]),
            PatchOp::Increment => Err(Error::bad_request(format!(
                "JSON field '{path}' cannot be incremented"
            ))),
        }
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
        match operator {
            FilterOp::Present => LdapFilter::present(self.ldap_attribute.clone()),
            FilterOp::Equals => match (&self.matching_rule, value) {
                (Some(rule), Some(v)) => match serde_json::to_string(v) {
                    Ok(encoded) => LdapFilter::Extensible {
                        attribute: Some(self.ldap_attribute.clone()),
                        matching_rule: Some(rule.clone()),
                        value: encoded,
                    },
                    Err(_) => LdapFilter::AlwaysFalse,
                },
                _ => LdapFilter::AlwaysFalse,
            },
            _ => LdapFilter::AlwaysFalse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::Dn;
    use serde_json::json;

    #[test]
    fn round_trips_structured_values() {
        let mapper = JsonMapper::new("jsonProfile");
        let path = JsonPointer::parse("/profile");
        let value = json!({"theme": "dark", "fontSize": 14});
        let attrs = mapper.create(&path, Some(&value)).unwrap();
        let mut entry = Entry::new(Dn::root());
        for attr in attrs {
            entry.put(attr);
        }
        assert_eq!(mapper.read(&entry).unwrap().unwrap(), value);
    }

    #[test]
    fn update_of_identical_value_is_empty() {
        let mapper = JsonMapper::new("jsonProfile");
        let path = JsonPointer::parse("/profile");
        // Key order differs; canonical serialization still matches.
        let stored = json!({"a": 1, "b": 2});
        let attrs = mapper.create(&path, Some(&stored)).unwrap();
        let mut entry = Entry::new(Dn::root());
        for attr in attrs {
            entry.put(attr);
        }
        let resubmitted = json!({"b": 2, "a": 1});
        let mods = mapper.update(&path, &entry, Some(&resubmitted)).unwrap();
        assert!(mods.is_empty());
    }

    #[test]
    fn sub_field_patch_is_unsupported() {
        let mapper = JsonMapper::new("jsonProfile");
        let op = crate::patch::PatchOperation::replace("/theme", json!("light"));
        let err = mapper.patch(&JsonPointer::parse("/profile"), &op).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }
}
