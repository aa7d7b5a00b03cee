//! The CRUD orchestrator.
//!
//! One instance of operation logic shared by every routed position. Each
//! method takes the DN and (already subtype-narrowed) resource produced by
//! routing and sequences the directory calls: reads are minimal-attribute
//! searches, writes carry permissive-modify / assertion / read-entry
//! controls so a mutation and its read-back are one round trip.
//!
//! Two failures are retried, each exactly once: an add beneath a missing
//! templated intermediate entry (a glue entry is synthesized first), and a
//! delete refused as non-leaf (subordinates are removed bottom-up first).
//! Everything else propagates unchanged.

use crate::connection::{
    AddRequest, Control, DeleteRequest, DirectoryConnection, ModifyRequest,
    PasswordModifyRequest, SearchRequest, SearchScope, SimplePage, result_code,
};
use crate::error::{Error, Result};
use crate::filter::QueryFilter;
use crate::ldap::{Attribute, Dn, Entry, LdapFilter, OBJECT_CLASS};
use crate::mapper::{MapperContext, join_first_error};
use crate::naming::NamingStrategy;
use crate::operations::{
    ModifyPasswordParameters, PageRequest, QueryResponse, ResetPasswordResult, ResourceResponse,
};
use crate::patch::PatchOperation;
use crate::path::JsonPointer;
use crate::query;
use crate::resource::{Resource, ResourceSet};
use crate::routing::SubResource;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures::future::BoxFuture;
use log::{debug, warn};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const ACTION_MODIFY_PASSWORD: &str = "modify-password";
pub const ACTION_RESET_PASSWORD: &str = "reset-password";

pub struct Orchestrator<'a> {
    pub connection: &'a dyn DirectoryConnection,
    pub resources: &'a ResourceSet,
    /// The operational attribute carrying entry revisions.
    pub revision_attribute: &'a str,
}

impl<'a> Orchestrator<'a> {
    fn mapper_context(&'a self, resource: &'a Resource) -> MapperContext<'a> {
        MapperContext {
            connection: self.connection,
            type_name: &resource.id,
        }
    }

    /// The revision of an entry: the configured attribute when present, a
    /// content hash otherwise, so conditional operations still work against
    /// directories without revision support.
    fn revision_of(&self, entry: &Entry, content: &Value) -> String {
        if let Some(value) = entry.first_value(self.revision_attribute) {
            return value.to_string();
        }
        let serialized = content.to_string();
        BASE64.encode(Sha256::digest(serialized.as_bytes()))
    }

    async fn decode(
        &self,
        resource: &Arc<Resource>,
        naming: Option<&NamingStrategy>,
        entry: &Entry,
    ) -> Result<ResourceResponse> {
        let cx = self.mapper_context(resource);
        let content = resource
            .mapper
            .read(&cx, &JsonPointer::root(), entry)
            .await?
            .unwrap_or_else(|| Value::Object(Default::default()));
        let id = match naming {
            Some(naming) => naming.decode_resource_id(entry)?,
            None => entry
                .dn
                .rdn()
                .map(|rdn| rdn.value.clone())
                .unwrap_or_default(),
        };
        let revision = self.revision_of(entry, &content);
        Ok(ResourceResponse {
            id,
            revision,
            content,
        })
    }

    /// Fail fast on a stale asserted revision before any write is issued.
    fn check_revision(
        &self,
        entry: &Entry,
        content: &Value,
        asserted: Option<&str>,
    ) -> Result<()> {
        let Some(asserted) = asserted else {
            return Ok(());
        };
        let current = self.revision_of(entry, content);
        if current != asserted {
            return Err(Error::precondition_failed(format!(
                "revision '{asserted}' does not match current revision '{current}'"
            )));
        }
        Ok(())
    }

    /// Write controls for a conditional mutation. The assertion is only
    /// expressible when the entry actually carries the revision attribute.
    fn write_controls(&self, entry: &Entry, asserted: Option<&str>, attributes: Vec<String>) -> Vec<Control> {
        let mut controls = vec![
            Control::PermissiveModify,
            Control::PostRead { attributes },
        ];
        if let Some(revision) = asserted
            && entry.has_attribute(self.revision_attribute)
        {
            controls.push(Control::Assertion {
                filter: LdapFilter::equality(self.revision_attribute, revision),
            });
        }
        controls
    }

    async fn read_required(&self, dn: &Dn, attributes: Vec<String>) -> Result<Entry> {
        self.connection
            .read_entry(dn, attributes)
            .await?
            .ok_or_else(|| Error::not_found(format!("resource '{dn}' does not exist")))
    }

    pub async fn create(
        &self,
        sub: &SubResource,
        base: &Dn,
        content: &Value,
    ) -> Result<ResourceResponse> {
        let routed = self.resources.get(&sub.resource_id).ok_or_else(|| {
            Error::internal(format!("unknown resource type '{}'", sub.resource_id))
        })?;
        let resource = self.resources.resolve_from_json(routed, content)?;
        let cx = self.mapper_context(&resource);
        let attributes = resource
            .mapper
            .create(&cx, &JsonPointer::root(), Some(content))
            .await?;

        let mut entry = Entry::new(Dn::root());
        entry.put(Attribute::new(
            OBJECT_CLASS,
            resource.object_classes.clone(),
        ));
        for attribute in attributes {
            entry.put(attribute);
        }
        let naming = sub.naming()?;
        naming.assign_id(&mut entry)?;
        let rdn = naming.rdn(&entry)?;
        entry.dn = base.child(rdn);

        let read_attrs = resource.search_attributes(self.resources, &[], self.revision_attribute);
        let request = AddRequest {
            entry: entry.clone(),
            controls: vec![Control::PostRead {
                attributes: read_attrs.clone(),
            }],
        };
        let result = match self.connection.add(request.clone()).await {
            Ok(result) => result,
            Err(err)
                if err.is_code(result_code::NO_SUCH_OBJECT)
                    && sub.dn_template.has_intermediate_levels()
                    && !sub.glue_object_classes.is_empty() =>
            {
                warn!("creating glue entry {base} for add of {}", entry.dn);
                self.create_glue(sub, base).await?;
                self.connection.add(request).await?
            }
            Err(err) => return Err(err.into()),
        };
        let created = match result.post_read {
            Some(created) => created,
            None => self.read_required(&entry.dn, read_attrs).await?,
        };
        self.decode(&resource, Some(naming), &created).await
    }

    /// Synthesize the missing templated intermediate entry: its configured
    /// object classes plus the attribute implied by its own RDN.
    async fn create_glue(&self, sub: &SubResource, dn: &Dn) -> Result<()> {
        let mut glue = Entry::new(dn.clone());
        glue.put(Attribute::new(
            OBJECT_CLASS,
            sub.glue_object_classes.clone(),
        ));
        if let Some(rdn) = dn.rdn() {
            glue.put(Attribute::single(rdn.attribute.clone(), rdn.value.clone()));
        }
        self.connection
            .add(AddRequest {
                entry: glue,
                controls: Vec::new(),
            })
            .await?;
        Ok(())
    }

    pub async fn read(
        &self,
        resource: &Arc<Resource>,
        naming: Option<&NamingStrategy>,
        dn: &Dn,
        prefetched: Option<Entry>,
        fields: &[JsonPointer],
    ) -> Result<ResourceResponse> {
        let entry = match prefetched {
            Some(entry) => entry,
            None => {
                let attributes = resource.search_attributes(self.resources, fields, self.revision_attribute);
                self.read_required(dn, attributes).await?
            }
        };
        let narrowed = self.resources.resolve_from_object_classes(resource, &entry);
        self.decode(&narrowed, naming, &entry).await
    }

    pub async fn update(
        &self,
        resource: &Arc<Resource>,
        naming: Option<&NamingStrategy>,
        dn: &Dn,
        content: &Value,
        revision: Option<&str>,
    ) -> Result<ResourceResponse> {
        let attributes = resource.search_attributes(self.resources, &[], self.revision_attribute);
        let current = self.read_required(dn, attributes.clone()).await?;
        let resource = self.resources.resolve_from_object_classes(resource, &current);
        let cx = self.mapper_context(&resource);
        let projection = resource
            .mapper
            .read(&cx, &JsonPointer::root(), &current)
            .await?
            .unwrap_or_else(|| Value::Object(Default::default()));
        self.check_revision(&current, &projection, revision)?;

        let modifications = resource
            .mapper
            .update(&cx, &JsonPointer::root(), &current, Some(content))
            .await?;
        if modifications.is_empty() {
            debug!("update of {dn} is a no-op");
            return self.decode(&resource, naming, &current).await;
        }
        let result = self
            .connection
            .modify(ModifyRequest {
                dn: dn.clone(),
                modifications,
                controls: self.write_controls(&current, revision, attributes.clone()),
            })
            .await?;
        let updated = match result.post_read {
            Some(updated) => updated,
            None => self.read_required(dn, attributes).await?,
        };
        self.decode(&resource, naming, &updated).await
    }

    pub async fn patch(
        &self,
        resource: &Arc<Resource>,
        naming: Option<&NamingStrategy>,
        dn: &Dn,
        operations: &[PatchOperation],
        revision: Option<&str>,
    ) -> Result<ResourceResponse> {
        let attributes = resource.search_attributes(self.resources, &[], self.revision_attribute);
        let current = self.read_required(dn, attributes.clone()).await?;
        let resource = self.resources.resolve_from_object_classes(resource, &current);
        let cx = self.mapper_context(&resource);
        let projection = resource
            .mapper
            .read(&cx, &JsonPointer::root(), &current)
            .await?
            .unwrap_or_else(|| Value::Object(Default::default()));
        self.check_revision(&current, &projection, revision)?;

        let root = JsonPointer::root();
        let translated = join_first_error(
            operations
                .iter()
                .map(|operation| resource.mapper.patch(&cx, &root, operation))
                .collect(),
        )
        .await?;
        let modifications: Vec<_> = translated.into_iter().flatten().collect();
        if modifications.is_empty() {
            // Every operation was discarded (write-discarding properties);
            // the patch degrades to a read with the version check above.
            return self.decode(&resource, naming, &current).await;
        }
        let result = self
            .connection
            .modify(ModifyRequest {
                dn: dn.clone(),
                modifications,
                controls: self.write_controls(&current, revision, attributes.clone()),
            })
            .await?;
        let updated = match result.post_read {
            Some(updated) => updated,
            None => self.read_required(dn, attributes).await?,
        };
        self.decode(&resource, naming, &updated).await
    }

    pub async fn delete(
        &self,
        resource: &Arc<Resource>,
        dn: &Dn,
        revision: Option<&str>,
    ) -> Result<()> {
        let may_have_descendants = resource.may_have_descendants(self.resources);
        let mut controls = Vec::new();
        if let Some(revision) = revision {
            // Validate fail-fast against the current entry, then assert
            // atomically when the attribute exists.
            let current = self
                .read_required(dn, vec![self.revision_attribute.to_string()])
                .await?;
            if let Some(held) = current.first_value(self.revision_attribute) {
                if held != revision {
                    return Err(Error::precondition_failed(format!(
                        "revision '{revision}' does not match current revision '{held}'"
                    )));
                }
                controls.push(Control::Assertion {
                    filter: LdapFilter::equality(self.revision_attribute, revision),
                });
            }
        }
        if may_have_descendants {
            controls.push(Control::SubtreeDelete { critical: false });
        }
        let request = DeleteRequest {
            dn: dn.clone(),
            controls,
        };
        match self.connection.delete(request.clone()).await {
            Ok(()) => Ok(()),
            Err(err)
                if err.is_code(result_code::NOT_ALLOWED_ON_NON_LEAF) && may_have_descendants =>
            {
                warn!("subtree delete of {dn} refused; deleting subordinates bottom-up");
                self.delete_subordinates(dn).await?;
                self.connection.delete(request).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove every subordinate of `dn`, children strictly before their
    /// ancestors. Entries at the same depth are deleted concurrently.
    async fn delete_subordinates(&self, dn: &Dn) -> Result<()> {
        let result = self
            .connection
            .search(SearchRequest::new(
                dn.clone(),
                SearchScope::Subtree,
                LdapFilter::AlwaysTrue,
                vec!["1.1".to_string()],
            ))
            .await?;
        let mut subordinates: Vec<Dn> = result
            .entries
            .into_iter()
            .map(|e| e.dn)
            .filter(|d| d.depth() > dn.depth())
            .collect();
        subordinates.sort_by_key(|d| std::cmp::Reverse(d.depth()));

        let mut remaining = subordinates.as_slice();
        while let Some(first) = remaining.first() {
            let depth = first.depth();
            let split = remaining.iter().take_while(|d| d.depth() == depth).count();
            let (level, rest) = remaining.split_at(split);
            let deletes = level
                .iter()
                .map(|d| {
                    let fut: BoxFuture<'_, Result<()>> = Box::pin(async move {
                        self.connection
                            .delete(DeleteRequest {
                                dn: d.clone(),
                                controls: Vec::new(),
                            })
                            .await
                            .map_err(Error::from)
                    });
                    fut
                })
                .collect();
            join_first_error(deletes).await?;
            remaining = rest;
        }
        Ok(())
    }

    pub async fn query(
        &self,
        sub: &SubResource,
        base: &Dn,
        filter: Option<&QueryFilter>,
        page: Option<&PageRequest>,
    ) -> Result<QueryResponse> {
        let resource = self.resources.get(&sub.resource_id).ok_or_else(|| {
            Error::internal(format!("unknown resource type '{}'", sub.resource_id))
        })?;
        let cx = self.mapper_context(resource);
        let translated = match filter {
            Some(filter) => query::translate(&cx, &resource.mapper, filter).await?,
            None => LdapFilter::AlwaysTrue,
        };
        if translated.is_always_false() {
            debug!("query filter is unsatisfiable; skipping the search");
            return Ok(QueryResponse {
                resources: Vec::new(),
                paged_cookie: None,
            });
        }
        let membership = LdapFilter::and(
            resource
                .object_classes
                .iter()
                .map(|c| LdapFilter::equality(OBJECT_CLASS, c.clone()))
                .collect(),
        );
        let mut request = SearchRequest::new(
            base.clone(),
            sub.member_scope(),
            sub.restrict(LdapFilter::and(vec![membership, translated])),
            resource.search_attributes(self.resources, &[], self.revision_attribute),
        );
        if let Some(page) = page {
            let cookie = match &page.cookie {
                Some(cookie) => BASE64
                    .decode(cookie)
                    .map_err(|_| Error::bad_request("unrecognized paging cookie"))?,
                None => Vec::new(),
            };
            request.page = Some(SimplePage {
                size: page.size,
                cookie,
            });
        }
        let result = self.connection.search(request).await?;
        let naming = sub.naming()?;
        let decodes = result
            .entries
            .into_iter()
            .map(|entry| {
                let fut: BoxFuture<'_, Result<ResourceResponse>> = Box::pin(async move {
                    let narrowed = self.resources.resolve_from_object_classes(resource, &entry);
                    self.decode(&narrowed, Some(naming), &entry).await
                });
                fut
            })
            .collect();
        let resources = join_first_error(decodes).await?;
        Ok(QueryResponse {
            resources,
            paged_cookie: result.paged_cookie.map(|c| BASE64.encode(c)),
        })
    }

    pub async fn modify_password(
        &self,
        dn: &Dn,
        parameters: Value,
    ) -> Result<()> {
        let parameters: ModifyPasswordParameters = serde_json::from_value(parameters)?;
        self.connection
            .modify_password(PasswordModifyRequest {
                dn: dn.clone(),
                old_password: parameters.old_password,
                new_password: Some(parameters.new_password),
                controls: Vec::new(),
            })
            .await?;
        Ok(())
    }

    pub async fn reset_password(&self, dn: &Dn) -> Result<ResetPasswordResult> {
        let generated = self
            .connection
            .modify_password(PasswordModifyRequest {
                dn: dn.clone(),
                old_password: None,
                new_password: None,
                controls: Vec::new(),
            })
            .await?
            .ok_or_else(|| Error::internal("the directory did not generate a password"))?;
        Ok(ResetPasswordResult {
            generated_password: generated,
        })
    }
}
