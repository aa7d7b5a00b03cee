//! Naming strategies: how a resource id relates to the entry's RDN.
//!
//! Three stateless policies. Client-DN naming makes the id and the naming
//! attribute the same thing, so a member's DN is pure arithmetic. Client
//! naming keeps them distinct but both client-supplied. Server naming
//! generates the id (a UUID) and rejects client attempts to choose it.

use crate::connection::{SearchRequest, SearchScope};
use crate::error::{Error, Result};
use crate::ldap::{Attribute, Dn, Entry, LdapFilter, Rdn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingStrategy {
    /// The id is the value of the naming attribute itself.
    ClientDnNaming { dn_attribute: String },
    /// The entry is named by one attribute, identified by another; the
    /// client supplies both.
    ClientNaming {
        dn_attribute: String,
        id_attribute: String,
    },
    /// The entry is named by a client-supplied attribute but the server
    /// assigns the id.
    ServerNaming {
        dn_attribute: String,
        id_attribute: String,
    },
}

impl NamingStrategy {
    pub fn dn_attribute(&self) -> &str {
        match self {
            Self::ClientDnNaming { dn_attribute }
            | Self::ClientNaming { dn_attribute, .. }
            | Self::ServerNaming { dn_attribute, .. } => dn_attribute,
        }
    }

    /// True when a member DN is derivable from the id without a search.
    pub fn is_dn_arithmetic(&self) -> bool {
        matches!(self, Self::ClientDnNaming { .. })
    }

    /// Validate a new entry's naming attributes and return its resource id.
    /// Server naming generates the id here; client strategies require it to
    /// have been mapped from the submitted content.
    pub fn assign_id(&self, entry: &mut Entry) -> Result<String> {
        match self {
            Self::ClientDnNaming { dn_attribute } => entry
                .first_value(dn_attribute)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::bad_request(format!(
                        "the naming attribute '{dn_attribute}' is required on create"
                    ))
                }),
            Self::ClientNaming {
                dn_attribute,
                id_attribute,
            } => {
                if !entry.has_attribute(dn_attribute) {
                    return Err(Error::bad_request(format!(
                        "the naming attribute '{dn_attribute}' is required on create"
                    )));
                }
                entry
                    .first_value(id_attribute)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::bad_request(format!(
                            "the id attribute '{id_attribute}' is required on create"
                        ))
                    })
            }
            Self::ServerNaming {
                dn_attribute,
                id_attribute,
            } => {
                if entry.has_attribute(id_attribute) {
                    return Err(Error::bad_request(format!(
                        "the id attribute '{id_attribute}' is assigned by the server"
                    )));
                }
                if !entry.has_attribute(dn_attribute) {
                    return Err(Error::bad_request(format!(
                        "the naming attribute '{dn_attribute}' is required on create"
                    )));
                }
                let id = Uuid::new_v4().to_string();
                entry.put(Attribute::single(id_attribute.clone(), id.clone()));
                Ok(id)
            }
        }
    }

    /// The RDN of a new entry, from its (already validated) attributes.
    pub fn rdn(&self, entry: &Entry) -> Result<Rdn> {
        let attribute = self.dn_attribute();
        let value = entry.first_value(attribute).ok_or_else(|| {
            Error::bad_request(format!(
                "the naming attribute '{attribute}' is required on create"
            ))
        })?;
        Ok(Rdn::new(attribute, value))
    }

    /// The id of an existing entry.
    pub fn decode_resource_id(&self, entry: &Entry) -> Result<String> {
        let attribute = match self {
            Self::ClientDnNaming { dn_attribute } => dn_attribute,
            Self::ClientNaming { id_attribute, .. }
            | Self::ServerNaming { id_attribute, .. } => id_attribute,
        };
        entry
            .first_value(attribute)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::internal(format!(
                    "entry '{}' lacks the id attribute '{attribute}'",
                    entry.dn
                ))
            })
    }

    /// Locate a collection member by id: a base-object read when the DN is
    /// arithmetic, a one-level equality search otherwise.
    pub fn member_search(&self, base: &Dn, id: &str, attributes: Vec<String>) -> SearchRequest {
        match self {
            Self::ClientDnNaming { dn_attribute } => SearchRequest::base_object(
                base.child(Rdn::new(dn_attribute.clone(), id)),
                attributes,
            ),
            Self::ClientNaming { id_attribute, .. }
            | Self::ServerNaming { id_attribute, .. } => SearchRequest::new(
                base.clone(),
                SearchScope::One,
                LdapFilter::equality(id_attribute.clone(), id),
                attributes,
            ),
        }
    }
}
