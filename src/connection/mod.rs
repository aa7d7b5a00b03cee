//! The directory connection seam.
//!
//! [`DirectoryConnection`] is the boundary between the mapping/orchestration
//! core and whatever actually talks LDAP. Three implementations live here:
//! the [`native`] ldap3-backed adapter, the [`cached`] read-coalescing
//! wrapper, and the [`in_memory`] simulator used by tests and development.
//!
//! Requests are typed, controls are an enum rather than raw OIDs, and
//! failures come back as [`DirectoryError`], carrying raw result codes that
//! the error module translates into the caller-facing taxonomy at a single
//! boundary.

pub mod cached;
pub mod in_memory;
pub mod native;

pub use cached::CachedConnection;
pub use in_memory::InMemoryDirectory;
pub use native::NativeDirectory;

use crate::ldap::{Dn, Entry, LdapFilter, Modification};
use async_trait::async_trait;

/// LDAP result codes the gateway inspects or produces.
pub mod result_code {
    pub const SUCCESS: u32 = 0;
    pub const TIME_LIMIT_EXCEEDED: u32 = 3;
    pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
    pub const STRONG_AUTH_REQUIRED: u32 = 8;
    pub const ADMIN_LIMIT_EXCEEDED: u32 = 11;
    pub const NO_SUCH_ATTRIBUTE: u32 = 16;
    pub const UNDEFINED_ATTRIBUTE_TYPE: u32 = 17;
    pub const CONSTRAINT_VIOLATION: u32 = 19;
    pub const ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
    pub const INVALID_ATTRIBUTE_SYNTAX: u32 = 21;
    pub const NO_SUCH_OBJECT: u32 = 32;
    pub const INAPPROPRIATE_AUTHENTICATION: u32 = 48;
    pub const INVALID_CREDENTIALS: u32 = 49;
    pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
    pub const BUSY: u32 = 51;
    pub const UNAVAILABLE: u32 = 52;
    pub const UNWILLING_TO_PERFORM: u32 = 53;
    pub const NAMING_VIOLATION: u32 = 64;
    pub const OBJECT_CLASS_VIOLATION: u32 = 65;
    pub const NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
    pub const ENTRY_ALREADY_EXISTS: u32 = 68;
    pub const ASSERTION_FAILED: u32 = 122;
}

/// A raw directory failure, prior to taxonomy translation.
///
/// `Clone` so a coalesced read can hand the same failure to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory returned code {code}: {message}")]
    Result {
        code: u32,
        matched_dn: String,
        message: String,
    },

    #[error("directory connection failure: {0}")]
    Connection(String),

    #[error("directory operation timed out: {0}")]
    Timeout(String),

    #[error("directory authentication failed: {0}")]
    Authentication(String),
}

impl DirectoryError {
    pub fn result(code: u32, message: impl Into<String>) -> Self {
        Self::Result {
            code,
            matched_dn: String::new(),
            message: message.into(),
        }
    }

    pub fn result_with_matched(code: u32, matched_dn: &Dn, message: impl Into<String>) -> Self {
        Self::Result {
            code,
            matched_dn: matched_dn.to_string(),
            message: message.into(),
        }
    }

    /// True when this is a result failure with the given code.
    pub fn is_code(&self, wanted: u32) -> bool {
        matches!(self, Self::Result { code, .. } if *code == wanted)
    }
}

pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// Search scopes, mirroring the protocol's base/one-level/subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    One,
    Subtree,
}

/// Request controls the orchestrator attaches to operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// Adds of present values and deletes of absent values succeed silently.
    PermissiveModify,
    /// Delete the whole subtree in one operation.
    SubtreeDelete { critical: bool },
    /// Fail with `ASSERTION_FAILED` unless the target entry matches.
    Assertion { filter: LdapFilter },
    /// Return the entry state before the write, scoped to `attributes`.
    PreRead { attributes: Vec<String> },
    /// Return the entry state after the write, scoped to `attributes`.
    PostRead { attributes: Vec<String> },
    /// Proxied authorization v2; the value is an `dn:`/`u:` authzId.
    ProxiedAuthorization { authorization_id: String },
}

/// Simple-paged-results state for a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplePage {
    pub size: u32,
    /// Empty on the first page; the directory's cookie thereafter.
    pub cookie: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base: Dn,
    pub scope: SearchScope,
    pub filter: LdapFilter,
    pub attributes: Vec<String>,
    pub size_limit: u32,
    pub page: Option<SimplePage>,
    pub controls: Vec<Control>,
}

impl SearchRequest {
    pub fn new(base: Dn, scope: SearchScope, filter: LdapFilter, attributes: Vec<String>) -> Self {
        Self {
            base,
            scope,
            filter,
            attributes,
            size_limit: 0,
            page: None,
            controls: Vec::new(),
        }
    }

    /// A base-object read of one entry.
    pub fn base_object(dn: Dn, attributes: Vec<String>) -> Self {
        Self::new(dn, SearchScope::Base, LdapFilter::AlwaysTrue, attributes)
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub entries: Vec<Entry>,
    /// Present when a paged search has more results.
    pub paged_cookie: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct AddRequest {
    pub entry: Entry,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub dn: Dn,
    pub modifications: Vec<Modification>,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub dn: Dn,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone)]
pub struct PasswordModifyRequest {
    pub dn: Dn,
    pub old_password: Option<String>,
    /// When absent the directory generates one.
    pub new_password: Option<String>,
    pub controls: Vec<Control>,
}

/// Outcome of a write, carrying any read-entry control responses so the
/// orchestrator can avoid a second round trip.
#[derive(Debug, Clone, Default)]
pub struct WriteResult {
    pub pre_read: Option<Entry>,
    pub post_read: Option<Entry>,
}

/// An asynchronous directory connection.
///
/// All methods are suspension points; everything else in the crate is
/// synchronous in-memory work. Implementations must be shareable across
/// concurrent requests.
#[async_trait]
pub trait DirectoryConnection: Send + Sync {
    async fn search(&self, request: SearchRequest) -> DirectoryResult<SearchResult>;

    async fn add(&self, request: AddRequest) -> DirectoryResult<WriteResult>;

    async fn modify(&self, request: ModifyRequest) -> DirectoryResult<WriteResult>;

    async fn delete(&self, request: DeleteRequest) -> DirectoryResult<()>;

    /// The Password Modify extended operation. Returns the generated
    /// password when the directory produced one.
    async fn modify_password(
        &self,
        request: PasswordModifyRequest,
    ) -> DirectoryResult<Option<String>>;

    /// Base-object read returning `None` for a missing entry rather than a
    /// `NO_SUCH_OBJECT` failure.
    async fn read_entry(&self, dn: &Dn, attributes: Vec<String>) -> DirectoryResult<Option<Entry>> {
        match self
            .search(SearchRequest::base_object(dn.clone(), attributes))
            .await
        {
            Ok(result) => Ok(result.entries.into_iter().next()),
            Err(err) if err.is_code(result_code::NO_SUCH_OBJECT) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
