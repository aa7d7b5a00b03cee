//! Object mapper: an ordered set of named child mappers forming one JSON
//! object.
//!
//! Child operations fan out concurrently (the only parallelism bound is the
//! number of children) and are joined with all-complete semantics. Property
//! names compare case-insensitively, and the schema is closed-world: a JSON
//! field with no corresponding child is a validation failure, not ignored
//! input.

use crate::error::{Error, Result};
use crate::filter::FilterOp;
use crate::ldap::{Attribute, Entry, LdapFilter, Modification};
use crate::mapper::{MapperContext, PropertyMapper, join_first_error};
use crate::patch::{PatchOp, PatchOperation};
use crate::path::JsonPointer;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct ObjectMapper {
    properties: Vec<(String, PropertyMapper)>,
}

impl ObjectMapper {
    pub fn new(properties: Vec<(String, PropertyMapper)>) -> Self {
        Self { properties }
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyMapper)> {
        self.properties.iter().map(|(n, m)| (n.as_str(), m))
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMapper> {
        self.properties
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, m)| m)
    }

    /// Split a submitted object into per-child values, rejecting unknown
    /// fields.
    fn partition<'v>(
        &self,
        path: &JsonPointer,
        value: Option<&'v Value>,
    ) -> Result<Vec<Option<&'v Value>>> {
        let object: Option<&Map<String, Value>> = match value {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(Error::bad_request(format!(
                    "field '{path}' expects a JSON object"
                )));
            }
        };
        if let Some(map) = object {
            for key in map.keys() {
                if self.property(key).is_none() {
                    return Err(Error::bad_request(format!(
                        "unrecognized field '{}'",
                        path.child(key)
                    )));
                }
            }
        }
        Ok(self
            .properties
            .iter()
            .map(|(name, _)| {
                object.and_then(|map| {
                    map.iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(name))
                        .map(|(_, v)| v)
                })
            })
            .collect())
    }

    pub async fn create(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        value: Option<&Value>,
    ) -> Result<Vec<Attribute>> {
        let parts = self.partition(path, value)?;
        let child_paths: Vec<JsonPointer> = self
            .properties
            .iter()
            .map(|(name, _)| path.child(name))
            .collect();
        let futures = self
            .properties
            .iter()
            .zip(&child_paths)
            .zip(parts)
            .map(|(((_, mapper), child_path), part)| mapper.create(cx, child_path, part))
            .collect();
        let results = join_first_error(futures).await?;
        Ok(results.into_iter().flatten().collect())
    }

    pub async fn read(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        entry: &Entry,
    ) -> Result<Option<Value>> {
        let child_paths: Vec<JsonPointer> = self
            .properties
            .iter()
            .map(|(name, _)| path.child(name))
            .collect();
        let futures = self
            .properties
            .iter()
            .zip(&child_paths)
            .map(|((_, mapper), child_path)| mapper.read(cx, child_path, entry))
            .collect();
        let results = join_first_error(futures).await?;
        let mut object = Map::new();
        for ((name, _), result) in self.properties.iter().zip(results) {
            if let Some(value) = result {
                object.insert(name.clone(), value);
            }
        }
        // An object every child of which is absent is itself absent.
        if object.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::Object(object)))
        }
    }

    pub async fn update(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        entry: &Entry,
        new_value: Option<&Value>,
    ) -> Result<Vec<Modification>> {
        let parts = self.partition(path, new_value)?;
        let child_paths: Vec<JsonPointer> = self
            .properties
            .iter()
            .map(|(name, _)| path.child(name))
            .collect();
        let futures = self
            .properties
            .iter()
            .zip(&child_paths)
            .zip(parts)
            .map(|(((_, mapper), child_path), part)| mapper.update(cx, child_path, entry, part))
            .collect();
        let results = join_first_error(futures).await?;
        Ok(results.into_iter().flatten().collect())
    }

    pub async fn patch(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        operation: &PatchOperation,
    ) -> Result<Vec<Modification>> {
        if operation.path.is_root() {
            // Boxed to break the patch / patch_whole recursion cycle.
            return Box::pin(self.patch_whole(cx, path, operation)).await;
        }
        let head = operation.path.head().unwrap_or_default();
        if operation.path.head_is_index() || head == crate::path::APPEND_TOKEN {
            return Err(Error::bad_request(format!(
                "field '{path}' is an object and has no indexed elements"
            )));
        }
        let Some(mapper) = self.property(head) else {
            return Err(Error::bad_request(format!(
                "unrecognized field '{}'",
                path.child(head)
            )));
        };
        let child_path = path.child(head);
        let descended = operation.descend();
        mapper.patch(cx, &child_path, &descended).await
    }

    /// A whole-object patch applies partial-object semantics: each field of
    /// the value patches the matching child; absent children are untouched.
    async fn patch_whole(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        operation: &PatchOperation,
    ) -> Result<Vec<Modification>> {
        match operation.op {
            PatchOp::Add | PatchOp::Replace | PatchOp::Increment => {
                let value = operation.value.as_ref().ok_or_else(|| {
                    Error::bad_request(format!("patch of '{path}' requires a value"))
                })?;
                let Value::Object(map) = value else {
                    return Err(Error::bad_request(format!(
                        "field '{path}' expects a JSON object"
                    )));
                };
                let mut mods = Vec::new();
                for (key, sub_value) in map {
                    let child_op = PatchOperation {
                        op: operation.op,
                        path: JsonPointer::root().child(key),
                        value: Some(sub_value.clone()),
                    };
                    mods.extend(self.patch(cx, path, &child_op).await?);
                }
                Ok(mods)
            }
            PatchOp::Remove => {
                let mut mods = Vec::new();
                for (name, mapper) in &self.properties {
                    let child_path = path.child(name);
                    let child_op = PatchOperation {
                        op: PatchOp::Remove,
                        path: JsonPointer::root(),
                        value: None,
                    };
                    mods.extend(mapper.patch(cx, &child_path, &child_op).await?);
                }
                Ok(mods)
            }
        }
    }

    pub fn ldap_attributes(&self, sub_path: Option<&JsonPointer>, out: &mut BTreeSet<String>) {
        match sub_path {
            None => {
                for (_, mapper) in &self.properties {
                    mapper.ldap_attributes(None, out);
                }
            }
            Some(p) if p.is_root() => {
                for (_, mapper) in &self.properties {
                    mapper.ldap_attributes(None, out);
                }
            }
            Some(p) => {
                if let Some(mapper) = p.head().and_then(|head| self.property(head)) {
                    let tail = p.tail();
                    mapper.ldap_attributes(Some(&tail), out);
                }
            }
        }
    }

    pub async fn ldap_filter(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        sub_path: Option<&JsonPointer>,
        operator: &FilterOp,
        value: Option<&Value>,
    ) -> Result<LdapFilter> {
        // The whole object cannot be compared; a leaf must address a child.
        let Some(sub_path) = sub_path else {
            return Ok(LdapFilter::AlwaysFalse);
        };
        let Some(head) = sub_path.head() else {
            return Ok(LdapFilter::AlwaysFalse);
        };
        let Some(mapper) = self.property(head) else {
            // Unmapped field: render always-false rather than failing so the
            // enclosing and/or/not still composes.
            return Ok(LdapFilter::AlwaysFalse);
        };
        let child_path = path.child(head);
        let tail = sub_path.tail();
        mapper
            .ldap_filter(cx, &child_path, Some(&tail), operator, value)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::in_memory::InMemoryDirectory;
    use crate::ldap::Dn;
    use crate::mapper::SimpleMapper;
    use serde_json::json;

    fn mapper() -> ObjectMapper {
        ObjectMapper::new(vec![
            (
                "userName".to_string(),
                PropertyMapper::Simple(SimpleMapper {
                    required: true,
                    ..SimpleMapper::new("uid")
                }),
            ),
            (
                "displayName".to_string(),
                PropertyMapper::Simple(SimpleMapper::new("cn")),
            ),
        ])
    }

    #[tokio::test]
    async fn unknown_fields_are_rejected() {
        let directory = InMemoryDirectory::new();
        let cx = MapperContext {
            connection: &directory,
            type_name: "user",
        };
        let err = mapper()
            .create(
                &cx,
                &JsonPointer::root(),
                Some(&json!({"userName": "a", "nickname": "b"})),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nickname"));
    }

    #[tokio::test]
    async fn field_names_match_case_insensitively() {
        let directory = InMemoryDirectory::new();
        let cx = MapperContext {
            connection: &directory,
            type_name: "user",
        };
        let attrs = mapper()
            .create(&cx, &JsonPointer::root(), Some(&json!({"USERNAME": "a"})))
            .await
            .unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "uid");
    }

    #[tokio::test]
    async fn whole_object_patch_descends_to_children() {
        let directory = InMemoryDirectory::new();
        let cx = MapperContext {
            connection: &directory,
            type_name: "user",
        };
        let operation =
            PatchOperation::replace(JsonPointer::root(), json!({"displayName": "New Name"}));
        let mods = mapper()
            .patch(&cx, &JsonPointer::root(), &operation)
            .await
            .unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].attribute.name, "cn");
        assert_eq!(mods[0].attribute.values, vec!["New Name"]);
    }

    #[tokio::test]
    async fn absent_children_omit_the_object() {
        let directory = InMemoryDirectory::new();
        let cx = MapperContext {
            connection: &directory,
            type_name: "user",
        };
        let entry = Entry::new(Dn::parse("uid=a").unwrap());
        let read = mapper()
            .read(&cx, &JsonPointer::root(), &entry)
            .await
            .unwrap();
        assert!(read.is_none());
    }
}
