//! The property mapper tree.
//!
//! A [`PropertyMapper`] translates between one JSON value (or sub-value) and
//! one or more LDAP attributes. Mappers are built once from configuration,
//! immutable, and shared across concurrent requests. The tree is recursive:
//! object mappers fan out across children, reference mappers delegate to the
//! mapper describing the referenced entry's shape.
//!
//! Each operation takes the JSON pointer of the value being mapped, used only
//! for diagnostics, so validation failures name the offending field.
//!
//! Reference resolution and filter-candidate expansion need the directory,
//! which makes most operations asynchronous; recursion is broken with boxed
//! futures, and child fan-out runs concurrently with an all-complete join
//! that surfaces the first error only after every sibling has finished.

pub mod constant;
pub mod json;
pub mod object;
pub mod reference;
pub mod resource_type;
pub mod simple;

pub use constant::ConstantMapper;
pub use json::JsonMapper;
pub use object::ObjectMapper;
pub use reference::ReferenceMapper;
pub use resource_type::ResourceTypeMapper;
pub use simple::{SimpleMapper, SimpleType};

use crate::connection::DirectoryConnection;
use crate::error::{Error, Result};
use crate::filter::FilterOp;
use crate::ldap::{Attribute, Entry, LdapFilter, Modification};
use crate::patch::PatchOperation;
use crate::path::JsonPointer;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeSet;

/// Per-request state handed down the mapper tree.
pub struct MapperContext<'a> {
    /// The connection reference mappers resolve through.
    pub connection: &'a dyn DirectoryConnection,
    /// The resolved resource type id, read by resource-type mappers.
    pub type_name: &'a str,
}

/// When writes to a property are accepted, and what happens to forbidden
/// ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Writability {
    ReadOnly,
    /// Read-only, but writes are silently discarded instead of rejected.
    ReadOnlyDiscardWrites,
    CreateOnly,
    CreateOnlyDiscardWrites,
    #[default]
    ReadWrite,
}

impl Writability {
    pub fn writable_on_create(self) -> bool {
        !matches!(self, Self::ReadOnly | Self::ReadOnlyDiscardWrites)
    }

    pub fn writable_on_update(self) -> bool {
        matches!(self, Self::ReadWrite)
    }

    pub fn discards_writes(self) -> bool {
        matches!(self, Self::ReadOnlyDiscardWrites | Self::CreateOnlyDiscardWrites)
    }
}

/// A node in the mapper tree.
#[derive(Debug, Clone)]
pub enum PropertyMapper {
    Constant(ConstantMapper),
    ResourceType(ResourceTypeMapper),
    Simple(SimpleMapper),
    Json(JsonMapper),
    Object(ObjectMapper),
    Reference(ReferenceMapper),
}

impl PropertyMapper {
    /// Encode a full-resource-creation value into LDAP attributes.
    pub fn create<'a>(
        &'a self,
        cx: &'a MapperContext<'a>,
        path: &'a JsonPointer,
        value: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<Vec<Attribute>>> {
        Box::pin(async move {
            match self {
                Self::Constant(m) => m.create(path, value),
                Self::ResourceType(m) => m.create(cx, path, value),
                Self::Simple(m) => m.create(path, value),
                Self::Json(m) => m.create(path, value),
                Self::Object(m) => m.create(cx, path, value).await,
                Self::Reference(m) => m.create(cx, path, value).await,
            }
        })
    }

    /// Decode a directory entry into a JSON value, or `None` when the
    /// backing attributes are absent.
    pub fn read<'a>(
        &'a self,
        cx: &'a MapperContext<'a>,
        path: &'a JsonPointer,
        entry: &'a Entry,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            match self {
                Self::Constant(m) => m.read(),
                Self::ResourceType(m) => m.read(cx),
                Self::Simple(m) => m.read(entry),
                Self::Json(m) => m.read(entry),
                Self::Object(m) => m.read(cx, path, entry).await,
                Self::Reference(m) => m.read(cx, path, entry).await,
            }
        })
    }

    /// Compute the minimal modification list taking `entry` to `new_value`.
    pub fn update<'a>(
        &'a self,
        cx: &'a MapperContext<'a>,
        path: &'a JsonPointer,
        entry: &'a Entry,
        new_value: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<Vec<Modification>>> {
        Box::pin(async move {
            match self {
                Self::Constant(m) => m.update(path, new_value),
                Self::ResourceType(m) => m.update(cx, path, new_value),
                Self::Simple(m) => m.update(path, entry, new_value),
                Self::Json(m) => m.update(path, entry, new_value),
                Self::Object(m) => m.update(cx, path, entry, new_value).await,
                Self::Reference(m) => m.update(cx, path, entry, new_value).await,
            }
        })
    }

    /// Translate one patch operation, whose `path` is relative to this
    /// mapper, into modifications.
    pub fn patch<'a>(
        &'a self,
        cx: &'a MapperContext<'a>,
        path: &'a JsonPointer,
        operation: &'a PatchOperation,
    ) -> BoxFuture<'a, Result<Vec<Modification>>> {
        Box::pin(async move {
            match self {
                Self::Constant(m) => m.patch(path),
                Self::ResourceType(m) => m.patch(path),
                Self::Simple(m) => m.patch(path, operation),
                Self::Json(m) => m.patch(path, operation),
                Self::Object(m) => m.patch(cx, path, operation).await,
                Self::Reference(m) => m.patch(cx, path, operation).await,
            }
        })
    }

    /// Accumulate the LDAP attributes a subsequent read of `sub_path` (the
    /// whole value when `None`) would need.
    pub fn ldap_attributes(&self, sub_path: Option<&JsonPointer>, out: &mut BTreeSet<String>) {
        match self {
            Self::Constant(_) | Self::ResourceType(_) => {}
            Self::Simple(m) => m.ldap_attributes(out),
            Self::Json(m) => m.ldap_attributes(out),
            Self::Object(m) => m.ldap_attributes(sub_path, out),
            Self::Reference(m) => m.ldap_attributes(out),
        }
    }

    /// Render one comparison as an LDAP filter. A mapper that cannot express
    /// the comparison renders the always-false filter rather than failing,
    /// so unmapped leaves compose under and/or/not.
    pub fn ldap_filter<'a>(
        &'a self,
        cx: &'a MapperContext<'a>,
        path: &'a JsonPointer,
        sub_path: Option<&'a JsonPointer>,
        operator: &'a FilterOp,
        value: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<LdapFilter>> {
        Box::pin(async move {
            match self {
                Self::Constant(m) => Ok(m.ldap_filter(sub_path, operator, value)),
                Self::ResourceType(m) => Ok(m.ldap_filter(cx, sub_path, operator, value)),
                Self::Simple(m) => Ok(m.ldap_filter(sub_path, operator, value)),
                Self::Json(m) => Ok(m.ldap_filter(sub_path, operator, value)),
                Self::Object(m) => m.ldap_filter(cx, path, sub_path, operator, value).await,
                Self::Reference(m) => m.ldap_filter(cx, path, sub_path, operator, value).await,
            }
        })
    }
}

/// Await every future, then surface the first error (if any). Started
/// siblings always run to completion; no work is orphaned by an early
/// failure.
pub(crate) async fn join_first_error<T>(
    futures: Vec<BoxFuture<'_, Result<T>>>,
) -> Result<Vec<T>> {
    let results = futures::future::join_all(futures).await;
    let mut values = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(err) if first_error.is_none() => first_error = Some(err),
            Err(_) => {}
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(values),
    }
}

/// Reject a value supplied for a non-writable property, unless the policy
/// silently discards such writes. Returns true when the write should be
/// applied.
pub(crate) fn check_writable(
    writability: Writability,
    on_create: bool,
    supplied: bool,
    path: &JsonPointer,
) -> Result<bool> {
    if !supplied {
        return Ok(false);
    }
    let allowed = if on_create {
        writability.writable_on_create()
    } else {
        writability.writable_on_update()
    };
    if allowed {
        Ok(true)
    } else if writability.discards_writes() {
        Ok(false)
    } else {
        Err(Error::bad_request(format!(
            "field '{path}' is read-only and cannot be written"
        )))
    }
}
