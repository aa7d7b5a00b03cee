//! Resource types and polymorphic subtype resolution.
//!
//! A [`Resource`] is an immutable record built once from configuration: its
//! object classes, property mapper, sub-resources, and actions are already
//! merged with everything inherited from the super type, so request handling
//! never walks the ancestry. Subtypes are recorded by id and resolved through
//! the owning [`ResourceSet`].

use crate::error::{Error, Result};
use crate::ldap::{Entry, normalize_value};
use crate::mapper::PropertyMapper;
use crate::path::JsonPointer;
use crate::routing::SubResource;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug)]
pub struct Resource {
    pub id: String,
    pub is_abstract: bool,
    pub super_type: Option<String>,
    /// Declaration order preserved for seeding created entries.
    pub object_classes: Vec<String>,
    /// The mapper over the full (inherited and declared) property set.
    pub mapper: PropertyMapper,
    pub sub_resources: Vec<SubResource>,
    pub sub_type_ids: Vec<String>,
    pub supported_actions: BTreeSet<String>,
    /// JSON field carrying the type discriminator, when the type has
    /// subtypes.
    pub resource_type_property: Option<JsonPointer>,
    pub include_all_user_attributes: bool,
    pub excluded_default_user_attributes: BTreeSet<String>,
}

impl Resource {
    /// Object classes folded for case-insensitive comparison.
    fn normalized_object_classes(&self) -> BTreeSet<String> {
        self.object_classes.iter().map(|c| normalize_value(c)).collect()
    }

    fn matches_entry(&self, entry_classes: &BTreeSet<String>) -> bool {
        self.normalized_object_classes()
            .iter()
            .all(|c| entry_classes.contains(c))
    }

    pub fn supports_action(&self, action: &str) -> bool {
        self.supported_actions
            .iter()
            .any(|a| a.eq_ignore_ascii_case(action))
    }

    /// Whether instances of this type can have subordinate entries, which
    /// gates subtree-delete handling and existence-search skipping.
    pub fn may_have_descendants(&self, set: &ResourceSet) -> bool {
        if !self.sub_resources.is_empty() {
            return true;
        }
        self.sub_type_ids.iter().any(|id| {
            set.get(id)
                .is_some_and(|sub| sub.may_have_descendants(set))
        })
    }

    /// The attribute list a search must request so that `fields` (all mapped
    /// fields when empty) can be decoded afterwards. Unions the attributes of
    /// every subtype, since an entry may narrow to any of them after the
    /// search.
    pub fn search_attributes(
        &self,
        set: &ResourceSet,
        fields: &[JsonPointer],
        revision_attribute: &str,
    ) -> Vec<String> {
        let mut out = BTreeSet::new();
        self.collect_attributes(set, fields, &mut out);
        for excluded in &self.excluded_default_user_attributes {
            out.remove(excluded);
        }
        out.insert(crate::ldap::OBJECT_CLASS.to_string());
        out.insert(revision_attribute.to_string());
        out.into_iter().collect()
    }

    fn collect_attributes(
        &self,
        set: &ResourceSet,
        fields: &[JsonPointer],
        out: &mut BTreeSet<String>,
    ) {
        if fields.is_empty() {
            if self.include_all_user_attributes {
                out.insert("*".to_string());
            } else {
                self.mapper.ldap_attributes(None, out);
            }
        } else {
            for field in fields {
                self.mapper.ldap_attributes(Some(field), out);
            }
        }
        for id in &self.sub_type_ids {
            if let Some(sub) = set.get(id) {
                sub.collect_attributes(set, fields, out);
            }
        }
    }
}

/// The registry of all built resource types, keyed by type id.
#[derive(Debug, Default)]
pub struct ResourceSet {
    types: BTreeMap<String, Arc<Resource>>,
}

impl ResourceSet {
    pub fn new(types: BTreeMap<String, Arc<Resource>>) -> Self {
        Self { types }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Resource>> {
        self.types.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Deepest subtype whose full object-class set is contained in the
    /// entry's classes. Falls back to `resource` itself when no subtype
    /// matches, or when even `resource` does not match the entry; once
    /// routing reached this type it is never rejected.
    pub fn resolve_from_object_classes(
        &self,
        resource: &Arc<Resource>,
        entry: &Entry,
    ) -> Arc<Resource> {
        let entry_classes: BTreeSet<String> =
            entry.object_classes().map(normalize_value).collect();
        self.deepest_match(resource, &entry_classes)
            .unwrap_or_else(|| resource.clone())
    }

    fn deepest_match(
        &self,
        resource: &Arc<Resource>,
        entry_classes: &BTreeSet<String>,
    ) -> Option<Arc<Resource>> {
        if !resource.matches_entry(entry_classes) {
            return None;
        }
        for id in &resource.sub_type_ids {
            if let Some(sub) = self.types.get(id)
                && let Some(deeper) = self.deepest_match(sub, entry_classes)
            {
                return Some(deeper);
            }
        }
        Some(resource.clone())
    }

    /// Resolve the concrete type of a submitted resource body. Only invoked
    /// for creates; a type without subtypes needs no discriminator.
    pub fn resolve_from_json(
        &self,
        resource: &Arc<Resource>,
        content: &Value,
    ) -> Result<Arc<Resource>> {
        if resource.sub_type_ids.is_empty() {
            if resource.is_abstract {
                return Err(Error::bad_request(format!(
                    "resource type '{}' is abstract and cannot be instantiated",
                    resource.id
                )));
            }
            return Ok(resource.clone());
        }
        let pointer = resource.resource_type_property.as_ref().ok_or_else(|| {
            Error::internal(format!(
                "type '{}' has subtypes but no discriminator field",
                resource.id
            ))
        })?;
        let name = pointer
            .tokens()
            .try_fold(content, |value, token| value.get(token))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::bad_request(format!(
                    "field '{pointer}' is required to select a concrete resource type"
                ))
            })?;
        let resolved = self
            .descendant_or_self(resource, name)
            .ok_or_else(|| {
                Error::bad_request(format!("unrecognized resource type '{name}'"))
            })?;
        if resolved.is_abstract {
            return Err(Error::bad_request(format!(
                "resource type '{name}' is abstract and cannot be instantiated"
            )));
        }
        Ok(resolved)
    }

    fn descendant_or_self(&self, resource: &Arc<Resource>, name: &str) -> Option<Arc<Resource>> {
        if resource.id.eq_ignore_ascii_case(name) {
            return Some(resource.clone());
        }
        resource.sub_type_ids.iter().find_map(|id| {
            self.types
                .get(id)
                .and_then(|sub| self.descendant_or_self(sub, name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::{Attribute, Dn};
    use crate::mapper::ObjectMapper;
    use serde_json::json;

    fn resource(
        id: &str,
        classes: &[&str],
        super_type: Option<&str>,
        sub_types: &[&str],
        is_abstract: bool,
    ) -> Arc<Resource> {
        Arc::new(Resource {
            id: id.to_string(),
            is_abstract,
            super_type: super_type.map(str::to_string),
            object_classes: classes.iter().map(|c| c.to_string()).collect(),
            mapper: PropertyMapper::Object(ObjectMapper::new(vec![])),
            sub_resources: vec![],
            sub_type_ids: sub_types.iter().map(|s| s.to_string()).collect(),
            supported_actions: BTreeSet::new(),
            resource_type_property: Some(JsonPointer::root().child("schema")),
            include_all_user_attributes: false,
            excluded_default_user_attributes: BTreeSet::new(),
        })
    }

    fn hierarchy() -> (ResourceSet, Arc<Resource>) {
        let base = resource("party", &["top"], None, &["user"], true);
        let user = resource("user", &["top", "person"], Some("party"), &["poweruser"], false);
        let power = resource(
            "poweruser",
            &["top", "person", "posixAccount"],
            Some("user"),
            &[],
            false,
        );
        let mut types = BTreeMap::new();
        types.insert("party".to_string(), base.clone());
        types.insert("user".to_string(), user);
        types.insert("poweruser".to_string(), power);
        (ResourceSet::new(types), base)
    }

    fn entry_with_classes(classes: &[&str]) -> Entry {
        let mut entry = Entry::new(Dn::parse("cn=x,dc=example,dc=com").unwrap());
        entry.put(Attribute::new(
            "objectClass",
            classes.iter().map(|c| c.to_string()).collect(),
        ));
        entry
    }

    #[test]
    fn deepest_subtype_wins() {
        let (set, base) = hierarchy();
        let entry = entry_with_classes(&["TOP", "Person", "posixaccount", "extra"]);
        assert_eq!(set.resolve_from_object_classes(&base, &entry).id, "poweruser");

        let entry = entry_with_classes(&["top", "person"]);
        assert_eq!(set.resolve_from_object_classes(&base, &entry).id, "user");
    }

    #[test]
    fn unmatched_entry_falls_back_to_routed_type() {
        let (set, base) = hierarchy();
        let entry = entry_with_classes(&["groupOfNames"]);
        assert_eq!(set.resolve_from_object_classes(&base, &entry).id, "party");
    }

    #[test]
    fn search_attributes_cover_subtype_properties() {
        use crate::mapper::SimpleMapper;
        fn mapped(id: &str, attr: &str, super_type: Option<&str>, subs: &[&str]) -> Arc<Resource> {
            Arc::new(Resource {
                id: id.to_string(),
                is_abstract: false,
                super_type: super_type.map(str::to_string),
                object_classes: vec!["person".to_string()],
                mapper: PropertyMapper::Object(ObjectMapper::new(vec![(
                    attr.to_string(),
                    PropertyMapper::Simple(SimpleMapper::new(attr.to_string())),
                )])),
                sub_resources: vec![],
                sub_type_ids: subs.iter().map(|s| s.to_string()).collect(),
                supported_actions: BTreeSet::new(),
                resource_type_property: None,
                include_all_user_attributes: false,
                excluded_default_user_attributes: BTreeSet::new(),
            })
        }
        let user = mapped("user", "cn", None, &["poweruser"]);
        let power = mapped("poweruser", "uidNumber", Some("user"), &[]);
        let mut types = BTreeMap::new();
        types.insert("user".to_string(), user.clone());
        types.insert("poweruser".to_string(), power);
        let set = ResourceSet::new(types);

        // A search through the parent type must fetch enough to decode an
        // entry that narrows to the subtype afterwards.
        let attrs = user.search_attributes(&set, &[], "etag");
        assert!(attrs.contains(&"cn".to_string()));
        assert!(attrs.contains(&"uidNumber".to_string()));
    }

    #[test]
    fn json_discriminator_selects_and_validates() {
        let (set, base) = hierarchy();
        let resolved = set
            .resolve_from_json(&base, &json!({"schema": "powerUser"}))
            .unwrap();
        assert_eq!(resolved.id, "poweruser");

        let err = set.resolve_from_json(&base, &json!({})).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));

        let err = set
            .resolve_from_json(&base, &json!({"schema": "printer"}))
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));

        let err = set
            .resolve_from_json(&base, &json!({"schema": "party"}))
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
