//! Abstract query filters.
//!
//! Query request bodies carry a boolean filter tree over JSON field paths.
//! The tree is deliberately directory-agnostic; [`crate::query`] translates
//! it to an [`crate::ldap::LdapFilter`] through a resource's property
//! mappers.

use crate::path::JsonPointer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A node in the abstract filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueryFilter {
    And { filters: Vec<QueryFilter> },
    Or { filters: Vec<QueryFilter> },
    Not { filter: Box<QueryFilter> },
    /// A literal boolean, the identity/absorbing elements of and/or.
    Boolean { value: bool },
    /// A leaf assertion against a single JSON field.
    Assertion {
        field: JsonPointer,
        operator: FilterOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
}

impl QueryFilter {
    pub fn and(filters: Vec<QueryFilter>) -> Self {
        QueryFilter::And { filters }
    }

    pub fn or(filters: Vec<QueryFilter>) -> Self {
        QueryFilter::Or { filters }
    }

    pub fn not(filter: QueryFilter) -> Self {
        QueryFilter::Not {
            filter: Box::new(filter),
        }
    }

    pub fn always(value: bool) -> Self {
        QueryFilter::Boolean { value }
    }

    pub fn assertion(field: impl Into<JsonPointer>, operator: FilterOp, value: Value) -> Self {
        QueryFilter::Assertion {
            field: field.into(),
            operator,
            value: Some(value),
        }
    }

    pub fn present(field: impl Into<JsonPointer>) -> Self {
        QueryFilter::Assertion {
            field: field.into(),
            operator: FilterOp::Present,
            value: None,
        }
    }
}

/// Leaf comparison operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Equals,
    Contains,
    StartsWith,
    Present,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    /// A directory-specific extended matching rule, named by OID or rule id.
    Extended(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_tagged_tree() {
        let body = json!({
            "kind": "and",
            "filters": [
                {"kind": "assertion", "field": "/userName", "operator": "equals", "value": "alice"},
                {"kind": "not", "filter": {"kind": "assertion", "field": "/locked", "operator": "present"}}
            ]
        });
        let filter: QueryFilter = serde_json::from_value(body).unwrap();
        match filter {
            QueryFilter::And { filters } => {
                assert_eq!(filters.len(), 2);
                assert!(matches!(
                    &filters[0],
                    QueryFilter::Assertion { operator: FilterOp::Equals, .. }
                ));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn boolean_literal_round_trips() {
        let filter = QueryFilter::always(false);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json, json!({"kind": "boolean", "value": false}));
        assert_eq!(serde_json::from_value::<QueryFilter>(json).unwrap(), filter);
    }
}
