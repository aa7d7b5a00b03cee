//! Reference mapper: a property whose JSON shape describes another directory
//! entry, stored as that entry's DN.
//!
//! Writing resolves each submitted primary-key value to exactly one DN via a
//! directory search; reading reverses the lookup, fetching each referenced
//! entry and delegating to the inner mapper. Filter translation expands to a
//! disjunction of DN equalities over matching candidates, capped to keep the
//! filter bounded.

use crate::connection::{SearchRequest, SearchScope, result_code};
use crate::error::{Error, Result};
use crate::filter::FilterOp;
use crate::ldap::{Attribute, Dn, Entry, LdapFilter, Modification, normalize_value};
use crate::mapper::{MapperContext, PropertyMapper, Writability, check_writable, join_first_error};
use crate::patch::{PatchOp, PatchOperation};
use crate::path::JsonPointer;
use serde_json::Value;
use std::collections::BTreeSet;

/// Upper bound on filter-candidate expansion. Past this the query is
/// refused with an admin-limit error rather than growing without bound.
pub const MAX_FILTER_CANDIDATES: usize = 1000;

#[derive(Debug, Clone)]
pub struct ReferenceMapper {
    /// The attribute of the mapped entry that holds referenced DNs.
    pub ldap_attribute: String,
    /// Where referenced entries live.
    pub base_dn: Dn,
    pub scope: SearchScope,
    /// The attribute of the referenced entry that resource values name.
    pub primary_key: String,
    /// Restricts which entries are valid reference targets.
    pub base_filter: Option<LdapFilter>,
    /// The JSON shape of the referenced entry.
    pub mapper: Box<PropertyMapper>,
    pub required: bool,
    pub multi_valued: bool,
    pub writability: Writability,
}

impl ReferenceMapper {
    fn target_filter(&self, key_filter: LdapFilter) -> LdapFilter {
        match &self.base_filter {
            Some(base) => LdapFilter::and(vec![base.clone(), key_filter]),
            None => key_filter,
        }
    }

    /// Resolve one submitted reference value to the DN of the entry it
    /// names. Zero or multiple matches are client errors attributed to the
    /// property.
    async fn resolve(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        value: &Value,
    ) -> Result<String> {
        let attrs = self.mapper.create(cx, path, Some(value)).await?;
        let key = attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(&self.primary_key))
            .and_then(|a| a.values.first())
            .ok_or_else(|| {
                Error::bad_request(format!(
                    "field '{path}' must supply the '{}' of the referenced resource",
                    self.primary_key
                ))
            })?;
        let request = SearchRequest::new(
            self.base_dn.clone(),
            self.scope,
            self.target_filter(LdapFilter::equality(self.primary_key.clone(), key.clone())),
            vec!["1.1".to_string()],
        );
        let result = cx.connection.search(request).await.map_err(Error::from)?;
        let mut entries = result.entries.into_iter();
        match (entries.next(), entries.next()) {
            (None, _) => Err(Error::bad_request(format!(
                "field '{path}': no resource matches '{key}'"
            ))),
            (Some(entry), None) => Ok(entry.dn.to_string()),
            (Some(_), Some(_)) => Err(Error::bad_request(format!(
                "field '{path}': '{key}' matches more than one resource"
            ))),
        }
    }

    /// Resolve a submitted value (list or scalar per multi-valuedness) into
    /// DN attribute values, concurrently for lists.
    async fn resolve_values(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        value: &Value,
    ) -> Result<Vec<String>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) if self.multi_valued => {
                let futures = items
                    .iter()
                    .map(|item| {
                        let fut: futures::future::BoxFuture<'_, Result<String>> =
                            Box::pin(self.resolve(cx, path, item));
                        fut
                    })
                    .collect();
                join_first_error(futures).await
            }
            _ if self.multi_valued => Err(Error::bad_request(format!(
                "field '{path}' is multi-valued and expects a list"
            ))),
            single => Ok(vec![self.resolve(cx, path, single).await?]),
        }
    }

    pub async fn create(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        value: Option<&Value>,
    ) -> Result<Vec<Attribute>> {
        let apply = check_writable(self.writability, true, value.is_some(), path)?;
        let values = if apply {
            self.resolve_values(cx, path, value.unwrap_or(&Value::Null))
                .await?
        } else {
            Vec::new()
        };
        if values.is_empty() {
            if self.required {
                return Err(Error::bad_request(format!(
                    "required field '{path}' is missing or empty"
                )));
            }
            return Ok(Vec::new());
        }
        Ok(vec![Attribute::new(self.ldap_attribute.clone(), values)])
    }

    /// Reverse lookup: fetch each referenced entry and decode it through the
    /// inner mapper. A dangling DN is a single decode failure attributed to
    /// this property.
    pub async fn read(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        entry: &Entry,
    ) -> Result<Option<Value>> {
        let dns = entry.values(&self.ldap_attribute);
        if dns.is_empty() {
            return Ok(None);
        }
        let mut attributes = BTreeSet::new();
        self.mapper.ldap_attributes(None, &mut attributes);
        let attributes: Vec<String> = attributes.into_iter().collect();

        let futures = dns
            .iter()
            .map(|raw_dn| {
                let attributes = attributes.clone();
                let fut: futures::future::BoxFuture<'_, Result<Value>> = Box::pin(async move {
                    let dn = Dn::parse(raw_dn)
                        .map_err(|_| dangling(path, raw_dn))?;
                    let referenced = match cx.connection.read_entry(&dn, attributes).await {
                        Ok(Some(referenced)) => referenced,
                        Ok(None) => return Err(dangling(path, raw_dn)),
                        Err(err) if err.is_code(result_code::NO_SUCH_OBJECT) => {
                            return Err(dangling(path, raw_dn));
                        }
                        Err(err) => return Err(err.into()),
                    };
                    let value = self.mapper.read(cx, path, &referenced).await?;
                    value.ok_or_else(|| dangling(path, raw_dn))
                });
                fut
            })
            .collect();
        let mut values = join_first_error(futures).await?;
        if !self.multi_valued && values.len() == 1 {
            Ok(values.pop())
        } else {
            Ok(Some(Value::Array(values)))
        }
    }

    pub async fn update(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        entry: &Entry,
        new_value: Option<&Value>,
    ) -> Result<Vec<Modification>> {
        let current = entry.values(&self.ldap_attribute);
        if !self.writability.writable_on_update() {
            if new_value.is_some() && !self.writability.discards_writes() {
                return Err(Error::bad_request(format!(
                    "field '{path}' is read-only and cannot be modified"
                )));
            }
            return Ok(Vec::new());
        }
        let target = match new_value {
            Some(v) => self.resolve_values(cx, path, v).await?,
            None => Vec::new(),
        };
        if self.required && target.is_empty() {
            return Err(Error::bad_request(format!(
                "required field '{path}' cannot be emptied"
            )));
        }
        Ok(diff_dn_values(&self.ldap_attribute, current, target))
    }

    pub async fn patch(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        operation: &PatchOperation,
    ) -> Result<Vec<Modification>> {
        if !self.writability.writable_on_update() {
            if self.writability.discards_writes() {
                return Ok(Vec::new());
            }
            return Err(Error::bad_request(format!(
                "field '{path}' is read-only and cannot be patched"
            )));
        }
        let target = &operation.path;
        if target.is_append() {
            if !self.multi_valued {
                return Err(Error::not_supported(format!(
                    "field '{path}' is single-valued; append is meaningless"
                )));
            }
            if operation.op != PatchOp::Add {
                return Err(Error::bad_request(format!(
                    "append target on '{path}' only supports 'add'"
                )));
            }
            let value = operation.value.as_ref().ok_or_else(|| {
                Error::bad_request(format!("patch of '{path}' requires a value"))
            })?;
            if value.is_array() {
                return Err(Error::not_supported(format!(
                    "append to '{path}' takes a single value, not a list"
                )));
            }
            let dn = self.resolve(cx, path, value).await?;
            return Ok(vec![Modification::add(
                self.ldap_attribute.clone(),
                vec![dn],
            )]);
        }
        if target.head_is_index() {
            return Err(Error::not_supported(format!(
                "indexed patch targets are not supported on '{path}'"
            )));
        }
        if !target.is_root() {
            return Err(Error::bad_request(format!(
                "patch targets inside reference field '{path}' are not supported"
            )));
        }
        match operation.op {
            PatchOp::Add | PatchOp::Replace => {
                let value = operation.value.as_ref().ok_or_else(|| {
                    Error::bad_request(format!("patch of '{path}' requires a value"))
                })?;
                let values = self.resolve_values(cx, path, value).await?;
                if values.is_empty() {
                    return Ok(vec![Modification::delete(
                        self.ldap_attribute.clone(),
                        Vec::new(),
                    )]);
                }
                if operation.op == PatchOp::Add && self.multi_valued {
                    Ok(vec![Modification::add(self.ldap_attribute.clone(), values)])
                } else {
                    Ok(vec![Modification::replace(
                        self.ldap_attribute.clone(),
                        values,
                    )])
                }
            }
            PatchOp::Remove => match &operation.value {
                None | Some(Value::Null) => Ok(vec![Modification::delete(
                    self.ldap_attribute.clone(),
                    Vec::new(),
                )]),
                Some(value) => {
                    let values = self.resolve_values(cx, path, value).await?;
                    Ok(vec![Modification::delete(
                        self.ldap_attribute.clone(),
                        values,
                    )])
                }
            },
            PatchOp::Increment => Err(Error::bad_request(format!(
                "reference field '{path}' cannot be incremented"
            ))),
        }
    }

    pub fn ldap_attributes(&self, out: &mut BTreeSet<String>) {
        out.insert(self.ldap_attribute.clone());
    }

    /// Translate a comparison on the referenced shape into a bounded
    /// disjunction of DN equalities.
    pub async fn ldap_filter(
        &self,
        cx: &MapperContext<'_>,
        path: &JsonPointer,
        sub_path: Option<&JsonPointer>,
        operator: &FilterOp,
        value: Option<&Value>,
    ) -> Result<LdapFilter> {
        if matches!(operator, FilterOp::Present)
            && sub_path.is_none_or(|p| p.is_root())
        {
            return Ok(LdapFilter::present(self.ldap_attribute.clone()));
        }
        let inner = self
            .mapper
            .ldap_filter(cx, path, sub_path, operator, value)
            .await?;
        if inner.is_always_false() {
            return Ok(LdapFilter::AlwaysFalse);
        }
        let request = SearchRequest {
            size_limit: (MAX_FILTER_CANDIDATES + 1) as u32,
            ..SearchRequest::new(
                self.base_dn.clone(),
                self.scope,
                self.target_filter(inner),
                vec!["1.1".to_string()],
            )
        };
        let result = match cx.connection.search(request).await {
            Ok(result) => result,
            Err(err) if err.is_code(result_code::SIZE_LIMIT_EXCEEDED) => {
                return Err(Error::PayloadTooLarge(format!(
                    "filter on '{path}' matches too many candidate resources"
                )));
            }
            Err(err) => return Err(err.into()),
        };
        if result.entries.len() > MAX_FILTER_CANDIDATES {
            return Err(Error::PayloadTooLarge(format!(
                "filter on '{path}' matches more than {MAX_FILTER_CANDIDATES} candidate resources"
            )));
        }
        Ok(LdapFilter::or(
            result
                .entries
                .into_iter()
                .map(|e| LdapFilter::equality(self.ldap_attribute.clone(), e.dn.to_string()))
                .collect(),
        ))
    }
}

fn dangling(path: &JsonPointer, dn: &str) -> Error {
    Error::bad_request(format!(
        "field '{path}' references entry '{dn}' which does not exist"
    ))
}

/// Delete-then-add diff over DN values, compared under DN normalization.
fn diff_dn_values(attribute: &str, current: &[String], target: Vec<String>) -> Vec<Modification> {
    if target.is_empty() {
        if current.is_empty() {
            return Vec::new();
        }
        return vec![Modification::delete(attribute.to_string(), Vec::new())];
    }
    let norm = |raw: &str| {
        Dn::parse(raw)
            .map(|dn| dn.normalized())
            .unwrap_or_else(|_| normalize_value(raw))
    };
    let current_keys: Vec<String> = current.iter().map(|v| norm(v)).collect();
    let target_keys: Vec<String> = target.iter().map(|v| norm(v)).collect();
    let removed: Vec<String> = current
        .iter()
        .zip(&current_keys)
        .filter(|(_, key)| !target_keys.contains(key))
        .map(|(v, _)| v.clone())
        .collect();
    let added: Vec<String> = target
        .iter()
        .zip(&target_keys)
        .filter(|(_, key)| !current_keys.contains(key))
        .map(|(v, _)| v.clone())
        .collect();
    let mut mods = Vec::new();
    if !removed.is_empty() {
        mods.push(Modification::delete(attribute.to_string(), removed));
    }
    if !added.is_empty() {
        mods.push(Modification::add(attribute.to_string(), added));
    }
    mods
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dn_diff_is_minimal_and_ordered() {
        let mods = diff_dn_values(
            "member",
            &[
                "uid=a,ou=people".to_string(),
                "uid=b,ou=people".to_string(),
            ],
            vec![
                "uid=b,ou=people".to_string(),
                "uid=c,ou=people".to_string(),
            ],
        );
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0].kind, crate::ldap::ModificationKind::Delete);
        assert_eq!(mods[0].attribute.values, ["uid=a,ou=people".to_string()]);
        assert_eq!(mods[1].kind, crate::ldap::ModificationKind::Add);
        assert_eq!(mods[1].attribute.values, ["uid=c,ou=people".to_string()]);
    }

    #[test]
    fn dn_diff_ignores_case_differences() {
        let mods = diff_dn_values(
            "member",
            &["UID=A,OU=People".to_string()],
            vec!["uid=a,ou=people".to_string()],
        );
        assert!(mods.is_empty());
    }
}
