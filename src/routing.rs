//! Sub-resource routing: binding URL segments to directory entries.
//!
//! A [`SubResource`] pairs a URL segment with a DN template and a target
//! resource type. Collections hold many members located through a
//! [`NamingStrategy`]; singletons name exactly one entry. Routing descends a
//! request path frame by frame, accumulating a [`RoutingContext`] whose top
//! frame carries the DN and (subtype-narrowed) resource the CRUD layer works
//! against.

use crate::connection::{DirectoryConnection, SearchScope};
use crate::error::{Error, Result};
use crate::ldap::{Dn, DnTemplate, LdapFilter};
use crate::naming::NamingStrategy;
use crate::resource::{Resource, ResourceSet};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubResourceKind {
    /// Many members under a base DN, addressed by id.
    Collection,
    /// Exactly one entry at the templated DN. Cannot be created or deleted.
    Singleton,
}

#[derive(Debug, Clone)]
pub struct SubResource {
    /// The URL segment this sub-resource answers to.
    pub url_template: String,
    pub kind: SubResourceKind,
    /// Target resource type id, resolved through the [`ResourceSet`].
    pub resource_id: String,
    pub dn_template: DnTemplate,
    pub read_only: bool,
    /// Collection member naming. Singletons have none.
    pub naming: Option<NamingStrategy>,
    /// Object classes for synthesized intermediate entries.
    pub glue_object_classes: Vec<String>,
    /// Extra filter restricting which entries are members.
    pub base_search_filter: Option<LdapFilter>,
    /// Members may live anywhere under the base, not just one level down.
    pub flatten_subtree: bool,
}

impl SubResource {
    pub fn is_collection(&self) -> bool {
        self.kind == SubResourceKind::Collection
    }

    pub fn naming(&self) -> Result<&NamingStrategy> {
        self.naming.as_ref().ok_or_else(|| {
            Error::internal(format!(
                "sub-resource '{}' has no naming strategy",
                self.url_template
            ))
        })
    }

    /// Scope for member searches under the collection base.
    pub fn member_scope(&self) -> SearchScope {
        if self.flatten_subtree {
            SearchScope::Subtree
        } else {
            SearchScope::One
        }
    }

    /// Narrow a member search filter by the configured base filter.
    pub fn restrict(&self, filter: LdapFilter) -> LdapFilter {
        match &self.base_search_filter {
            Some(base) => LdapFilter::and(vec![base.clone(), filter]),
            None => filter,
        }
    }
}

/// One resolved level of the request path.
#[derive(Debug, Clone)]
pub struct Frame {
    pub dn: Dn,
    pub resource: Arc<Resource>,
    /// URL template variables bound at this level.
    pub variables: BTreeMap<String, String>,
    /// True when this frame is a collection base rather than an entry.
    pub is_collection: bool,
}

/// The per-request routing state: a stack of frames, innermost last.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    frames: Vec<Frame>,
}

impl RoutingContext {
    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_dn(&self) -> Dn {
        self.current().map(|f| f.dn.clone()).unwrap_or_else(Dn::root)
    }

    /// Resolve a template variable, walking outward through enclosing
    /// frames.
    pub fn variable(&self, name: &str) -> Option<String> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.variables.get(name).cloned())
    }

    /// Evaluate a DN template against the current routing position. A
    /// collection frame contributes a URL level with no RDN of its own, so
    /// one extra hop compensates.
    pub fn evaluate(&self, template: &DnTemplate) -> Result<Dn> {
        let mut base = self.current_dn();
        if self.current().is_some_and(|f| f.is_collection) && !template.is_absolute() {
            base = base.parent();
        }
        template.evaluate(&base, &|name| self.variable(name))
    }
}

/// How a member lookup resolved: either pure DN arithmetic, or an entry
/// fetched from the directory with its concrete subtype.
pub struct ResolvedMember {
    pub dn: Dn,
    pub resource: Arc<Resource>,
    pub entry: Option<crate::ldap::Entry>,
}

impl SubResource {
    /// Locate a collection member by id. The directory is consulted only
    /// when the DN is not derivable arithmetically or the member's concrete
    /// subtype matters.
    pub async fn resolve_member(
        &self,
        connection: &dyn DirectoryConnection,
        resources: &ResourceSet,
        base: &Dn,
        id: &str,
        attributes: Vec<String>,
    ) -> Result<ResolvedMember> {
        let resource = resources.get(&self.resource_id).ok_or_else(|| {
            Error::internal(format!("unknown resource type '{}'", self.resource_id))
        })?;
        let naming = self.naming()?;
        if naming.is_dn_arithmetic()
            && resource.sub_type_ids.is_empty()
            && self.base_search_filter.is_none()
            && !self.flatten_subtree
        {
            let dn = naming
                .member_search(base, id, Vec::new())
                .base;
            debug!("routed '{id}' to {dn} without a search");
            return Ok(ResolvedMember {
                dn,
                resource: resource.clone(),
                entry: None,
            });
        }
        let mut request = naming.member_search(base, id, attributes);
        if naming.is_dn_arithmetic() {
            // The DN is known; the search only confirms existence and
            // fetches object classes for subtype narrowing.
            request.filter = self.restrict(request.filter);
        } else {
            request.scope = self.member_scope();
            request.filter = self.restrict(request.filter);
        }
        let result = connection.search(request).await?;
        let n = result.entries.len();
        let mut entries = result.entries.into_iter();
        match (entries.next(), n) {
            (None, _) => Err(Error::not_found(format!("resource '{id}' does not exist"))),
            (Some(entry), 1) => {
                let narrowed = resources.resolve_from_object_classes(resource, &entry);
                debug!("routed '{id}' to {} as type '{}'", entry.dn, narrowed.id);
                Ok(ResolvedMember {
                    dn: entry.dn.clone(),
                    resource: narrowed,
                    entry: Some(entry),
                })
            }
            (Some(_), n) => Err(Error::internal(format!(
                "id '{id}' matched {n} entries; member ids must be unique"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{ObjectMapper, PropertyMapper};
    use std::collections::BTreeSet;

    fn resource(id: &str) -> Arc<Resource> {
        Arc::new(Resource {
            id: id.to_string(),
            is_abstract: false,
            super_type: None,
            object_classes: vec!["top".into()],
            mapper: PropertyMapper::Object(ObjectMapper::new(vec![])),
            sub_resources: vec![],
            sub_type_ids: vec![],
            supported_actions: BTreeSet::new(),
            resource_type_property: None,
            include_all_user_attributes: false,
            excluded_default_user_attributes: BTreeSet::new(),
        })
    }

    #[test]
    fn variables_resolve_through_enclosing_frames() {
        let mut cx = RoutingContext::default();
        cx.push(Frame {
            dn: Dn::parse("dc=example").unwrap(),
            resource: resource("root"),
            variables: [("realm".to_string(), "prod".to_string())].into(),
            is_collection: false,
        });
        cx.push(Frame {
            dn: Dn::parse("uid=a,dc=example").unwrap(),
            resource: resource("user"),
            variables: BTreeMap::new(),
            is_collection: false,
        });
        assert_eq!(cx.variable("realm").as_deref(), Some("prod"));
        assert_eq!(cx.variable("missing"), None);
    }

    #[test]
    fn collection_frames_add_one_hop() {
        let mut cx = RoutingContext::default();
        cx.push(Frame {
            dn: Dn::parse("ou=people,dc=example").unwrap(),
            resource: resource("users"),
            variables: BTreeMap::new(),
            is_collection: true,
        });
        let template = DnTemplate::compile("ou=groups").unwrap();
        let dn = cx.evaluate(&template).unwrap();
        assert_eq!(dn.to_string(), "ou=groups,dc=example");
    }
}
