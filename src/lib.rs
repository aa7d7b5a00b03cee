//! Resource-oriented JSON gateway for LDAP directories.
//!
//! Exposes directory entries as typed JSON resources with
//! create/read/update/delete/patch/query/action semantics, translating
//! between the two worlds through a configured tree of property mappers.
//!
//! # Core Components
//!
//! - [`Gateway`] - routes requests and dispatches operations
//! - [`DirectoryConnection`] - trait over the directory backend
//! - [`GatewayConfig`] - serde model of the resource configuration
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ldap_gateway::{Gateway, GatewayConfig};
//! use ldap_gateway::connection::InMemoryDirectory;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config: GatewayConfig = serde_json::from_str(r#"{"resourceTypes": {}}"#)?;
//! let gateway = Gateway::from_config(&config)?;
//! let directory = Arc::new(InMemoryDirectory::new());
//! # let _ = (gateway, directory);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod crud;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod ldap;
pub mod mapper;
pub mod naming;
pub mod operations;
pub mod patch;
pub mod path;
pub mod query;
pub mod resource;
pub mod routing;

// Re-export the types a transport in front of the gateway works with.
pub use config::{DirectoryConfig, GatewayConfig, GatewayModel};
pub use connection::DirectoryConnection;
pub use error::{ConfigError, Error, Result};
pub use filter::{FilterOp, QueryFilter};
pub use gateway::Gateway;
pub use operations::{
    Operation, PageRequest, QueryResponse, Request, RequestContext, ResourceResponse, Response,
};
pub use patch::{PatchOp, PatchOperation};
pub use path::JsonPointer;
