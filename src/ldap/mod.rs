//! The gateway's directory data model: DNs, entries, modifications, and
//! search filters.

pub mod dn;
pub mod entry;
pub mod filter;

pub use dn::{Dn, DnTemplate, Rdn};
pub use entry::{Attribute, Entry, Modification, ModificationKind, OBJECT_CLASS, normalize_value};
pub use filter::{LdapFilter, escape_filter_value};
