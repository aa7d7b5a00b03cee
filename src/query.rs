//! Translating abstract query filters into LDAP filters.
//!
//! One recursive match over the tagged [`QueryFilter`] union. Leaves are
//! rendered by the resource's mapper tree; a leaf the mappers cannot express
//! becomes the always-false filter, which composes under and/or/not instead
//! of aborting the whole query. Folding happens in the [`LdapFilter`]
//! constructors, so `and(true, x)` and `or(false, x)` both collapse to `x`.

use crate::error::Result;
use crate::filter::QueryFilter;
use crate::ldap::LdapFilter;
use crate::mapper::{MapperContext, PropertyMapper, join_first_error};
use crate::path::JsonPointer;
use futures::future::BoxFuture;

pub fn translate<'a>(
    cx: &'a MapperContext<'a>,
    mapper: &'a PropertyMapper,
    filter: &'a QueryFilter,
) -> BoxFuture<'a, Result<LdapFilter>> {
    Box::pin(async move {
        match filter {
            QueryFilter::And { filters } => {
                let children = join_first_error(
                    filters.iter().map(|f| translate(cx, mapper, f)).collect(),
                )
                .await?;
                Ok(LdapFilter::and(children))
            }
            QueryFilter::Or { filters } => {
                let children = join_first_error(
                    filters.iter().map(|f| translate(cx, mapper, f)).collect(),
                )
                .await?;
                Ok(LdapFilter::or(children))
            }
            QueryFilter::Not { filter } => {
                Ok(LdapFilter::not(translate(cx, mapper, filter).await?))
            }
            QueryFilter::Boolean { value } => Ok(if *value {
                LdapFilter::AlwaysTrue
            } else {
                LdapFilter::AlwaysFalse
            }),
            QueryFilter::Assertion {
                field,
                operator,
                value,
            } => {
                mapper
                    .ldap_filter(
                        cx,
                        &JsonPointer::root(),
                        Some(field),
                        operator,
                        value.as_ref(),
                    )
                    .await
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::in_memory::InMemoryDirectory;
    use crate::filter::FilterOp;
    use crate::mapper::{ObjectMapper, SimpleMapper};
    use serde_json::json;

    fn mapper() -> PropertyMapper {
        PropertyMapper::Object(ObjectMapper::new(vec![(
            "name".to_string(),
            PropertyMapper::Simple(SimpleMapper::new("cn")),
        )]))
    }

    fn assertion(field: &str, operator: FilterOp, value: serde_json::Value) -> QueryFilter {
        QueryFilter::Assertion {
            field: JsonPointer::parse(field),
            operator,
            value: Some(value),
        }
    }

    #[tokio::test]
    async fn folding_identities_hold() {
        let directory = InMemoryDirectory::new();
        let cx = MapperContext {
            connection: &directory,
            type_name: "user",
        };
        let mapper = mapper();
        let leaf = assertion("/name", FilterOp::Equals, json!("alice"));

        let anded = QueryFilter::And {
            filters: vec![QueryFilter::Boolean { value: true }, leaf.clone()],
        };
        let ored = QueryFilter::Or {
            filters: vec![QueryFilter::Boolean { value: false }, leaf.clone()],
        };
        let plain = translate(&cx, &mapper, &leaf).await.unwrap();
        assert_eq!(translate(&cx, &mapper, &anded).await.unwrap(), plain);
        assert_eq!(translate(&cx, &mapper, &ored).await.unwrap(), plain);
        assert_eq!(plain.to_string(), "(cn=alice)");
    }

    #[tokio::test]
    async fn unmapped_fields_become_always_false_without_aborting() {
        let directory = InMemoryDirectory::new();
        let cx = MapperContext {
            connection: &directory,
            type_name: "user",
        };
        let mapper = mapper();
        let unmapped = assertion("/shoeSize", FilterOp::Equals, json!(44));
        assert_eq!(
            translate(&cx, &mapper, &unmapped).await.unwrap(),
            LdapFilter::AlwaysFalse
        );

        // Inside an or, the mapped branch survives.
        let mixed = QueryFilter::Or {
            filters: vec![unmapped, assertion("/name", FilterOp::Equals, json!("a"))],
        };
        assert_eq!(
            translate(&cx, &mapper, &mixed).await.unwrap().to_string(),
            "(cn=a)"
        );
    }

    #[tokio::test]
    async fn negation_flips_constants() {
        let directory = InMemoryDirectory::new();
        let cx = MapperContext {
            connection: &directory,
            type_name: "user",
        };
        let mapper = mapper();
        let not_false = QueryFilter::Not {
            filter: Box::new(QueryFilter::Boolean { value: false }),
        };
        assert_eq!(
            translate(&cx, &mapper, &not_false).await.unwrap(),
            LdapFilter::AlwaysTrue
        );
    }
}
