//! Resource-type mapper: exposes the resolved type id as a JSON field.
//!
//! The field doubles as the creation discriminator when a resource has
//! subtypes; the orchestrator consumes it before encoding, so by the time
//! this mapper runs, a supplied value only needs to agree with the type
//! being written.

use crate::error::{Error, Result};
use crate::filter::FilterOp;
use crate::ldap::{Attribute, LdapFilter, Modification};
use crate::mapper::MapperContext;
use crate::path::JsonPointer;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ResourceTypeMapper;

impl ResourceTypeMapper {
    pub fn create(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        value: Option<&Value>,
    ) -> Result<Vec<Attribute>> {
        match value {
            None => Ok(Vec::new()),
            Some(Value::String(name)) if name.eq_ignore_ascii_case(cx.type_name) => Ok(Vec::new()),
            Some(_) => Err(Error::bad_request(format!(
                "field '{path}' does not name the resource type being created"
            ))),
        }
    }

    pub fn read(&self, cx: &MapperContext<'_>) -> Result<Option<Value>> {
        Ok(Some(Value::String(cx.type_name.to_string())))
    }

    pub fn update(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        new_value: Option<&Value>,
    ) -> Result<Vec<Modification>> {
        match new_value {
            None => Ok(Vec::new()),
            Some(Value::String(name)) if name.eq_ignore_ascii_case(cx.type_name) => Ok(Vec::new()),
            Some(_) => Err(Error::bad_request(format!(
                "field '{path}' is read-only; a resource cannot change type"
            ))),
        }
    }

    pub fn patch(&self, path: &JsonPointer) -> Result<Vec<Modification>> {
        Err(Error::bad_request(format!(
            "field '{path}' is read-only; a resource cannot change type"
        )))
    }

    pub fn ldap_filter(
        &self,
        cx: &MapperContext<'_>,
        sub_path: Option<&JsonPointer>,
        operator: &FilterOp,
        value: Option<&Value>,
    ) -> LdapFilter {
        if sub_path.is_some_and(|p| !p.is_root()) {
            return LdapFilter::AlwaysFalse;
        }
        match (operator, value) {
            (FilterOp::Present, _) => LdapFilter::AlwaysTrue,
            (FilterOp::Equals, Some(Value::String(name))) => {
                if name.eq_ignore_ascii_case(cx.type_name) {
                    LdapFilter::AlwaysTrue
                } else {
                    LdapFilter::AlwaysFalse
                }
            }
            _ => LdapFilter::AlwaysFalse,
        }
    }
}
