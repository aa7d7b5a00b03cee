//! The gateway's operation surface: requests in, responses out.
//!
//! The transport in front of the gateway (HTTP or otherwise) is expected to
//! build a [`Request`] from its own encoding and render the [`Response`] or
//! [`crate::error::Error`] back out. Nothing in here knows about URLs beyond
//! pre-split path segments.

use crate::filter::QueryFilter;
use crate::patch::PatchOperation;
use crate::path::JsonPointer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller identity and channel properties, supplied by the transport.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Proxied-authorization identity (`dn:` or `u:` form), when requests
    /// should run as the caller rather than the gateway's own bind.
    pub authorization_id: Option<String>,
    /// The transport channel is confidential.
    pub secure: bool,
    /// The caller has authenticated.
    pub authenticated: bool,
}

/// Paging parameters for queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub size: u32,
    /// Opaque continuation token from a previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

/// One resource operation addressed at a routed path.
#[derive(Debug, Clone)]
pub enum Operation {
    Create {
        content: Value,
    },
    Read {
        /// Requested fields; empty means all mapped fields.
        fields: Vec<JsonPointer>,
    },
    Update {
        content: Value,
        /// `If-Match` style revision precondition.
        revision: Option<String>,
    },
    Patch {
        operations: Vec<PatchOperation>,
        revision: Option<String>,
    },
    Delete {
        revision: Option<String>,
    },
    Query {
        filter: Option<QueryFilter>,
        page: Option<PageRequest>,
    },
    Action {
        name: String,
        parameters: Value,
    },
}

impl Operation {
    /// True for operations that change directory state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Read { .. } | Self::Query { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Read { .. } => "read",
            Self::Update { .. } => "update",
            Self::Patch { .. } => "patch",
            Self::Delete { .. } => "delete",
            Self::Query { .. } => "query",
            Self::Action { .. } => "action",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    /// Pre-split URL path segments, outermost first.
    pub path: Vec<String>,
    pub operation: Operation,
    pub context: RequestContext,
}

/// A resource body returned by reads and read-back writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResponse {
    pub id: String,
    pub revision: String,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub resources: Vec<ResourceResponse>,
    /// Continuation token when more results remain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paged_cookie: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Response {
    Resource(ResourceResponse),
    Query(QueryResponse),
    /// Delete and value-less actions.
    NoContent,
    /// Action-specific result body.
    Action(Value),
}

/// Parameters of the `modify-password` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyPasswordParameters {
    pub old_password: Option<String>,
    pub new_password: String,
}

/// Result body of the `reset-password` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordResult {
    pub generated_password: String,
}
