//! Constant mapper: a fixed JSON value with no backing attribute.

use crate::error::{Error, Result};
use crate::filter::FilterOp;
use crate::ldap::{Attribute, LdapFilter, Modification, normalize_value};
use crate::path::JsonPointer;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ConstantMapper {
    pub value: Value,
}

impl ConstantMapper {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn create(&self, path: &JsonPointer, value: Option<&Value>) -> Result<Vec<Attribute>> {
        match value {
            None => Ok(Vec::new()),
            Some(v) if *v == self.value => Ok(Vec::new()),
            Some(_) => Err(Error::bad_request(format!(
                "field '{path}' is constant and cannot be written"
            ))),
        }
    }

    pub fn read(&self) -> Result<Option<Value>> {
        Ok(Some(self.value.clone()))
    }

    pub fn update(&self, path: &JsonPointer, new_value: Option<&Value>) -> Result<Vec<Modification>> {
        match new_value {
            None => Ok(Vec::new()),
            Some(v) if *v == self.value => Ok(Vec::new()),
            Some(_) => Err(Error::bad_request(format!(
                "field '{path}' is constant and cannot be modified"
            ))),
        }
    }

    pub fn patch(&self, path: &JsonPointer) -> Result<Vec<Modification>> {
        Err(Error::bad_request(format!(
            "field '{path}' is constant and cannot be patched"
        )))
    }

    /// Comparisons against a constant evaluate statically.
    pub fn ldap_filter(
        &self,
        sub_path: Option<&JsonPointer>,
        operator: &FilterOp,
        value: Option<&Value>,
    ) -> LdapFilter {
        if sub_path.is_some_and(|p| !p.is_root()) {
            return LdapFilter::AlwaysFalse;
        }
        match (operator, value) {
            (FilterOp::Present, _) => LdapFilter::AlwaysTrue,
            (FilterOp::Equals, Some(v)) => {
                let matches = match (v, &self.value) {
                    (Value::String(a), Value::String(b)) => {
                        normalize_value(a) == normalize_value(b)
                    }
                    (a, b) => a == b,
                };
                if matches {
                    LdapFilter::AlwaysTrue
                } else {
                    LdapFilter::AlwaysFalse
                }
            }
            _ => LdapFilter::AlwaysFalse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_divergent_writes_and_accepts_echoes() {
        let mapper = ConstantMapper::new(json!("frozen"));
        let path = JsonPointer::parse("/kind");
        assert!(mapper.create(&path, Some(&json!("frozen"))).unwrap().is_empty());
        assert!(mapper.create(&path, Some(&json!("thawed"))).is_err());
        assert!(mapper.update(&path, None).unwrap().is_empty());
        assert!(mapper.patch(&path).is_err());
    }

    #[test]
    fn filters_evaluate_statically() {
        let mapper = ConstantMapper::new(json!("frozen"));
        assert!(
            mapper
                .ldap_filter(None, &FilterOp::Equals, Some(&json!("FROZEN")))
                .is_always_true()
        );
        assert!(
            mapper
                .ldap_filter(None, &FilterOp::Equals, Some(&json!("other")))
                .is_always_false()
        );
        assert!(mapper.ldap_filter(None, &FilterOp::Present, None).is_always_true());
    }
}
