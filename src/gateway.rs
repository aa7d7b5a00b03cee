//! The gateway: routing a request path to a directory position and
//! dispatching the operation.
//!
//! The path is walked segment by segment. Each segment selects a sub-resource
//! of the current position: a singleton names its entry by DN template alone,
//! a collection consumes one more segment as the member id and resolves it
//! through the naming strategy, narrowing to the member's concrete subtype.
//! The terminal position then admits a position-dependent operation set:
//! collections take create and query, instances take everything else.

use crate::config::{GatewayConfig, GatewayModel};
use crate::connection::{CachedConnection, DirectoryConnection};
use crate::crud::{ACTION_MODIFY_PASSWORD, ACTION_RESET_PASSWORD, Orchestrator};
use crate::error::{ConfigResult, Error, Result};
use crate::ldap::{Dn, Entry, OBJECT_CLASS};
use crate::operations::{Operation, Request, RequestContext, Response};
use crate::resource::{Resource, ResourceSet};
use crate::routing::{Frame, RoutingContext, SubResource};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Gateway {
    model: GatewayModel,
}

/// Where routing ended up: a collection base or a single entry.
enum Position {
    Collection {
        sub: SubResource,
        base: Dn,
    },
    Instance {
        /// The sub-resource this instance was reached through.
        sub: SubResource,
        resource: Arc<Resource>,
        dn: Dn,
        /// Entry fetched during member resolution, reusable by a read.
        prefetched: Option<Entry>,
    },
}

impl Gateway {
    pub fn from_config(config: &GatewayConfig) -> ConfigResult<Gateway> {
        Ok(Gateway {
            model: config.build()?,
        })
    }

    pub fn new(model: GatewayModel) -> Gateway {
        Gateway { model }
    }

    /// Handle one routed operation. The connection is wrapped in the caching
    /// layer, carrying the caller's identity for proxied authorization.
    pub async fn handle(
        &self,
        connection: Arc<dyn DirectoryConnection>,
        request: Request,
    ) -> Result<Response> {
        let cached = match &request.context.authorization_id {
            Some(id) => CachedConnection::with_authorization(connection, id.clone()),
            None => CachedConnection::new(connection),
        };
        let orchestrator = Orchestrator {
            connection: &cached,
            resources: &self.model.resources,
            revision_attribute: &self.model.revision_attribute,
        };
        let position = self
            .route(&cached, &request.path, &request.operation)
            .await?;
        self.dispatch(&orchestrator, position, &request.operation, &request.context)
            .await
    }

    /// Walk the path segments to a terminal position.
    async fn route(
        &self,
        connection: &CachedConnection,
        path: &[String],
        operation: &Operation,
    ) -> Result<Position> {
        let mut cx = RoutingContext::default();
        // The resource whose sub-resources the next segment selects from;
        // `None` is the top-level route table.
        let mut owner: Option<Arc<Resource>> = None;
        let mut segments = path.iter();
        let creating = matches!(operation, Operation::Create { .. });

        let Some(first) = segments.next() else {
            return Err(Error::not_found("empty request path"));
        };
        let mut segment = first;
        loop {
            let routes: &[SubResource] = match &owner {
                None => &self.model.routes,
                Some(resource) => &resource.sub_resources,
            };
            let (matched, variables) = match_route(routes, segment)?;
            let sub = matched.clone();
            let resource = self.model.resources.get(&sub.resource_id).ok_or_else(|| {
                Error::internal(format!("unknown resource type '{}'", sub.resource_id))
            })?;
            if sub.is_collection() {
                let base = cx.evaluate(&sub.dn_template)?;
                let Some(member_id) = segments.next() else {
                    return Ok(Position::Collection { sub, base });
                };
                cx.push(Frame {
                    dn: base.clone(),
                    resource: resource.clone(),
                    variables,
                    is_collection: true,
                });
                let attributes = member_attributes(
                    &self.model.resources,
                    resource,
                    &sub,
                    &self.model.revision_attribute,
                );
                let member = sub
                    .resolve_member(
                        connection,
                        &self.model.resources,
                        &base,
                        member_id,
                        attributes,
                    )
                    .await
                    .map_err(|err| remap_for_create(err, creating, member_id))?;
                cx.push(Frame {
                    dn: member.dn.clone(),
                    resource: member.resource.clone(),
                    variables: BTreeMap::new(),
                    is_collection: false,
                });
                match segments.next() {
                    None => {
                        return Ok(Position::Instance {
                            sub,
                            resource: member.resource,
                            dn: member.dn,
                            prefetched: member.entry,
                        });
                    }
                    Some(deeper) => {
                        // Re-dispatch against the resolved subtype's own
                        // sub-resources.
                        owner = Some(member.resource);
                        segment = deeper;
                    }
                }
            } else {
                let dn = cx.evaluate(&sub.dn_template)?;
                debug!("routed '{segment}' to singleton {dn}");
                cx.push(Frame {
                    dn: dn.clone(),
                    resource: resource.clone(),
                    variables,
                    is_collection: false,
                });
                match segments.next() {
                    None => {
                        return Ok(Position::Instance {
                            sub,
                            resource: resource.clone(),
                            dn,
                            prefetched: None,
                        });
                    }
                    Some(deeper) => {
                        owner = Some(resource.clone());
                        segment = deeper;
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        orchestrator: &Orchestrator<'_>,
        position: Position,
        operation: &Operation,
        context: &RequestContext,
    ) -> Result<Response> {
        match position {
            Position::Collection { sub, base } => {
                if sub.read_only && operation.is_mutating() {
                    return Err(Error::not_supported(format!(
                        "'{}' is read-only",
                        sub.url_template
                    )));
                }
                match operation {
                    Operation::Create { content } => orchestrator
                        .create(&sub, &base, content)
                        .await
                        .map(Response::Resource),
                    Operation::Query { filter, page } => orchestrator
                        .query(&sub, &base, filter.as_ref(), page.as_ref())
                        .await
                        .map(Response::Query),
                    other => Err(Error::not_supported(format!(
                        "{} is not supported against the collection '{}'",
                        other.kind(),
                        sub.url_template
                    ))),
                }
            }
            Position::Instance {
                sub,
                resource,
                dn,
                prefetched,
            } => {
                if sub.read_only && operation.is_mutating() {
                    return Err(Error::not_supported(format!(
                        "'{}' is read-only",
                        sub.url_template
                    )));
                }
                let naming = sub.naming.as_ref();
                match operation {
                    Operation::Read { fields } => orchestrator
                        .read(&resource, naming, &dn, prefetched, fields)
                        .await
                        .map(Response::Resource),
                    Operation::Update { content, revision } => orchestrator
                        .update(&resource, naming, &dn, content, revision.as_deref())
                        .await
                        .map(Response::Resource),
                    Operation::Patch {
                        operations,
                        revision,
                    } => orchestrator
                        .patch(&resource, naming, &dn, operations, revision.as_deref())
                        .await
                        .map(Response::Resource),
                    Operation::Delete { revision } => {
                        if !sub.is_collection() {
                            return Err(Error::not_supported(format!(
                                "the singleton '{}' cannot be deleted",
                                sub.url_template
                            )));
                        }
                        orchestrator
                            .delete(&resource, &dn, revision.as_deref())
                            .await
                            .map(|()| Response::NoContent)
                    }
                    Operation::Create { .. } => Err(Error::not_supported(format!(
                        "create is not supported at '{dn}'; address a nested collection"
                    ))),
                    Operation::Query { .. } => Err(Error::not_supported(
                        "query is not supported against a single resource",
                    )),
                    Operation::Action { name, parameters } => {
                        self.action(orchestrator, &resource, &dn, name, parameters, context)
                            .await
                    }
                }
            }
        }
    }

    async fn action(
        &self,
        orchestrator: &Orchestrator<'_>,
        resource: &Arc<Resource>,
        dn: &Dn,
        name: &str,
        parameters: &serde_json::Value,
        context: &RequestContext,
    ) -> Result<Response> {
        if !resource.supports_action(name) {
            return Err(Error::not_supported(format!(
                "action '{name}' is not registered for resource type '{}'",
                resource.id
            )));
        }
        if name.eq_ignore_ascii_case(ACTION_MODIFY_PASSWORD)
            || name.eq_ignore_ascii_case(ACTION_RESET_PASSWORD)
        {
            if !context.secure || !context.authenticated {
                return Err(Error::Forbidden(format!(
                    "action '{name}' requires a secure, authenticated connection"
                )));
            }
        }
        if name.eq_ignore_ascii_case(ACTION_MODIFY_PASSWORD) {
            orchestrator
                .modify_password(dn, parameters.clone())
                .await?;
            return Ok(Response::NoContent);
        }
        if name.eq_ignore_ascii_case(ACTION_RESET_PASSWORD) {
            let result = orchestrator.reset_password(dn).await?;
            return Ok(Response::Action(serde_json::to_value(result)?));
        }
        Err(Error::not_supported(format!(
            "action '{name}' has no handler"
        )))
    }
}

/// Match one path segment against a route table. A literal template matches
/// exactly; a `{var}` template matches anything and binds the variable.
fn match_route<'a>(
    routes: &'a [SubResource],
    segment: &str,
) -> Result<(&'a SubResource, BTreeMap<String, String>)> {
    for sub in routes {
        if sub.url_template == segment {
            return Ok((sub, BTreeMap::new()));
        }
    }
    for sub in routes {
        if let Some(name) = sub
            .url_template
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
        {
            let mut variables = BTreeMap::new();
            variables.insert(name.to_string(), segment.to_string());
            return Ok((sub, variables));
        }
    }
    Err(Error::not_found(format!("no route for '{segment}'")))
}

/// The attributes a member-resolution search should fetch: enough to decode
/// the member later without a second read.
fn member_attributes(
    resources: &ResourceSet,
    resource: &Arc<Resource>,
    sub: &SubResource,
    revision_attribute: &str,
) -> Vec<String> {
    let mut attributes = resource.search_attributes(resources, &[], revision_attribute);
    if let Some(naming) = &sub.naming {
        let named = naming.dn_attribute().to_string();
        if !attributes.contains(&named) {
            attributes.push(named);
        }
    }
    if !attributes.contains(&OBJECT_CLASS.to_string()) {
        attributes.push(OBJECT_CLASS.to_string());
    }
    attributes
}

/// Creation addressed through a non-existent instance is a client mistake,
/// not a missing resource.
fn remap_for_create(err: Error, creating: bool, member_id: &str) -> Error {
    match err {
        Error::NotFound(_) if creating => Error::bad_request(format!(
            "cannot create beneath '{member_id}': it does not exist"
        )),
        other => other,
    }
}
