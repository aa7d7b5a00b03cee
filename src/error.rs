//! Error types for gateway operations.
//!
//! Two layers of failure exist in this crate. [`DirectoryError`] is the raw
//! outcome of a directory round trip (an LDAP result code, or a transport
//! failure) and lives in [`crate::connection`]. [`Error`] is the typed
//! taxonomy surfaced to the external caller. Raw directory failures are
//! translated into the taxonomy at exactly one boundary, the
//! `From<DirectoryError>` impl below, and are never leaked untranslated.

use crate::connection::{DirectoryError, result_code};

/// Main error type surfaced by gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Schema or type violations, unrecognized fields, read-only field
    /// writes, malformed patch targeting, unresolvable references.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The target entry does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Revision mismatch on a conditional operation, or a create that
    /// collided with an existing entry.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The directory refused the operation, or a password action was
    /// attempted without a secure, authenticated context.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Directory authentication failure.
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// The operation is recognized but not supported at this position
    /// (indexed patch targets, unregistered actions, read-only routes).
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The directory connection is unavailable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A directory administrative or size limit was exceeded.
    #[error("Request entity too large: {0}")]
    PayloadTooLarge(String),

    /// The directory timed out; the operation may be retried.
    #[error("Retry the request: {0}")]
    Retryable(String),

    /// Ambiguous multi-entry reads, decode failures, and uncategorized
    /// directory errors.
    #[error("Internal server error: {0}")]
    Internal(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// Convenience constructors, so call sites read as `Error::bad_request(...)`.
impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed(message.into())
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for the kinds raised before any directory call is issued.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::BadRequest(_) | Self::NotSupported(_))
    }
}

/// The single translation boundary from raw directory failures to the
/// caller-facing taxonomy.
impl From<DirectoryError> for Error {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Result { code, ref message, .. } => match code {
                result_code::NO_SUCH_OBJECT => Error::NotFound(message.clone()),
                result_code::ENTRY_ALREADY_EXISTS | result_code::ASSERTION_FAILED => {
                    Error::PreconditionFailed(message.clone())
                }
                result_code::INSUFFICIENT_ACCESS_RIGHTS => Error::Forbidden(message.clone()),
                result_code::INVALID_CREDENTIALS
                | result_code::INAPPROPRIATE_AUTHENTICATION
                | result_code::STRONG_AUTH_REQUIRED => Error::Unauthorized(message.clone()),
                result_code::CONSTRAINT_VIOLATION
                | result_code::INVALID_ATTRIBUTE_SYNTAX
                | result_code::OBJECT_CLASS_VIOLATION
                | result_code::NAMING_VIOLATION
                | result_code::UNDEFINED_ATTRIBUTE_TYPE => Error::BadRequest(message.clone()),
                result_code::ADMIN_LIMIT_EXCEEDED | result_code::SIZE_LIMIT_EXCEEDED => {
                    Error::PayloadTooLarge(message.clone())
                }
                result_code::TIME_LIMIT_EXCEEDED => Error::Retryable(message.clone()),
                result_code::BUSY | result_code::UNAVAILABLE | result_code::UNWILLING_TO_PERFORM => {
                    Error::ServiceUnavailable(message.clone())
                }
                _ => Error::Internal(format!("directory returned code {code}: {message}")),
            },
            DirectoryError::Connection(message) => Error::ServiceUnavailable(message),
            DirectoryError::Timeout(message) => Error::Retryable(message),
            DirectoryError::Authentication(message) => Error::Unauthorized(message),
        }
    }
}

/// Errors raised while building the resource model from configuration.
///
/// These indicate configuration mistakes and are raised fail-fast at build
/// time, never at request time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Resource type '{0}' is declared more than once")]
    DuplicateResourceType(String),

    #[error("Resource type '{type_id}' declares unknown super type '{super_type}'")]
    UnresolvedSuperType { type_id: String, super_type: String },

    #[error("Sub-resource '{url_template}' references unknown resource type '{type_id}'")]
    UnresolvedSubResourceType { url_template: String, type_id: String },

    #[error("Non-abstract resource type '{0}' has no object classes")]
    MissingObjectClasses(String),

    #[error("Invalid DN template '{template}': {reason}")]
    InvalidDnTemplate { template: String, reason: String },

    #[error("Invalid naming strategy for '{url_template}': {reason}")]
    InvalidNamingStrategy { url_template: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_result_codes_translate() {
        let err = DirectoryError::result(result_code::NO_SUCH_OBJECT, "missing");
        assert!(matches!(Error::from(err), Error::NotFound(_)));

        let err = DirectoryError::result(result_code::ASSERTION_FAILED, "stale");
        assert!(matches!(Error::from(err), Error::PreconditionFailed(_)));

        let err = DirectoryError::result(result_code::ADMIN_LIMIT_EXCEEDED, "too many");
        assert!(matches!(Error::from(err), Error::PayloadTooLarge(_)));
    }

    #[test]
    fn transport_failures_translate() {
        let err = DirectoryError::Connection("refused".into());
        assert!(matches!(Error::from(err), Error::ServiceUnavailable(_)));

        let err = DirectoryError::Timeout("deadline".into());
        assert!(matches!(Error::from(err), Error::Retryable(_)));
    }
}
