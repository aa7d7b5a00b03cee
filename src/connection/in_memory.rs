//! An in-memory directory for tests and development.
//!
//! Faithful enough to exercise the orchestrator: hierarchy rules (parents
//! before children, no deleting non-leaves), result codes, the assertion and
//! permissive-modify and read-entry controls, simple paging, and a
//! per-entry `etag` operational attribute that changes on every write.
//!
//! Subtree delete is only honored when enabled, so tests can cover both the
//! one-shot path and the client-side cascading fallback.

use crate::connection::{
    AddRequest, Control, DeleteRequest, DirectoryConnection, DirectoryError, DirectoryResult,
    ModifyRequest, PasswordModifyRequest, SearchRequest, SearchResult, SearchScope, WriteResult,
    result_code,
};
use crate::ldap::{Attribute, Dn, Entry, Modification, ModificationKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The operational attribute carrying the entry revision.
const ETAG: &str = "etag";
const USER_PASSWORD: &str = "userPassword";

pub struct InMemoryDirectory {
    entries: RwLock<BTreeMap<String, Entry>>,
    support_subtree_delete: bool,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            support_subtree_delete: false,
        }
    }

    pub fn with_subtree_delete() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            support_subtree_delete: true,
        }
    }

    /// Insert a fixture entry directly, bypassing hierarchy checks.
    pub async fn seed(&self, mut entry: Entry) {
        if !entry.has_attribute(ETAG) {
            entry.replace(Attribute::single(ETAG, "1"));
        }
        self.entries
            .write()
            .await
            .insert(entry.dn.normalized(), entry);
    }

    /// Number of stored entries, for test assertions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Closest existing ancestor of `dn`, for `matchedDN` reporting.
    fn matched_dn(entries: &BTreeMap<String, Entry>, dn: &Dn) -> Dn {
        let mut candidate = dn.parent();
        loop {
            if candidate.depth() == 0 || entries.contains_key(&candidate.normalized()) {
                return candidate;
            }
            candidate = candidate.parent();
        }
    }

    fn has_children(entries: &BTreeMap<String, Entry>, dn: &Dn) -> bool {
        entries
            .values()
            .any(|e| e.dn.depth() > dn.depth() && e.dn.is_subordinate_of(dn))
    }

    fn bump_etag(entry: &mut Entry) {
        let next = entry
            .first_value(ETAG)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        entry.replace(Attribute::single(ETAG, next.to_string()));
    }

    /// Project an entry onto the requested attribute list. `"*"` or an empty
    /// list selects everything; `"1.1"` selects nothing.
    fn select(entry: &Entry, attributes: &[String]) -> Entry {
        if attributes.is_empty() || attributes.iter().any(|a| a == "*") {
            return entry.clone();
        }
        let mut out = Entry::new(entry.dn.clone());
        for name in attributes {
            if name == "1.1" {
                continue;
            }
            if let Some(attr) = entry.attribute(name) {
                out.put(attr.clone());
            }
        }
        out
    }

    fn apply_modification(
        entry: &mut Entry,
        modification: &Modification,
        permissive: bool,
    ) -> DirectoryResult<()> {
        let name = &modification.attribute.name;
        let values = &modification.attribute.values;
        match modification.kind {
            ModificationKind::Add => {
                if !permissive {
                    if let Some(existing) = entry.attribute(name)
                        && values.iter().any(|v| existing.contains_value(v))
                    {
                        return Err(DirectoryError::result(
                            result_code::ATTRIBUTE_OR_VALUE_EXISTS,
                            format!("attribute '{name}' already holds one of the values"),
                        ));
                    }
                }
                entry.put(Attribute::new(name.clone(), values.clone()));
            }
            ModificationKind::Delete => {
                if values.is_empty() {
                    if !entry.has_attribute(name) && !permissive {
                        return Err(DirectoryError::result(
                            result_code::NO_SUCH_ATTRIBUTE,
                            format!("attribute '{name}' is not present"),
                        ));
                    }
                    entry.remove_attribute(name);
                } else {
                    if !permissive {
                        let existing = entry.attribute(name);
                        let missing = values.iter().any(|v| {
                            existing.is_none_or(|a| !a.contains_value(v))
                        });
                        if missing {
                            return Err(DirectoryError::result(
                                result_code::NO_SUCH_ATTRIBUTE,
                                format!("attribute '{name}' lacks one of the values"),
                            ));
                        }
                    }
                    entry.remove_values(name, values);
                }
            }
            ModificationKind::Replace => {
                entry.replace(Attribute::new(name.clone(), values.clone()));
            }
            ModificationKind::Increment => {
                let delta: i64 = values
                    .first()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| {
                        DirectoryError::result(
                            result_code::INVALID_ATTRIBUTE_SYNTAX,
                            format!("increment of '{name}' needs one integer delta"),
                        )
                    })?;
                let current: i64 = entry
                    .first_value(name)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                entry.replace(Attribute::single(name.clone(), (current + delta).to_string()));
            }
        }
        Ok(())
    }

    fn check_assertion(entry: &Entry, controls: &[Control]) -> DirectoryResult<()> {
        for control in controls {
            if let Control::Assertion { filter } = control
                && !filter.matches(entry)
            {
                return Err(DirectoryError::result(
                    result_code::ASSERTION_FAILED,
                    "entry does not satisfy the asserted state",
                ));
            }
        }
        Ok(())
    }

    fn read_controls(
        before: Option<&Entry>,
        after: Option<&Entry>,
        controls: &[Control],
    ) -> WriteResult {
        let mut result = WriteResult::default();
        for control in controls {
            match control {
                Control::PreRead { attributes } => {
                    result.pre_read = before.map(|e| Self::select(e, attributes));
                }
                Control::PostRead { attributes } => {
                    result.post_read = after.map(|e| Self::select(e, attributes));
                }
                _ => {}
            }
        }
        result
    }
}

#[async_trait]
impl DirectoryConnection for InMemoryDirectory {
    async fn search(&self, request: SearchRequest) -> DirectoryResult<SearchResult> {
        let entries = self.entries.read().await;
        if request.base.depth() > 0 && !entries.contains_key(&request.base.normalized()) {
            return Err(DirectoryError::result_with_matched(
                result_code::NO_SUCH_OBJECT,
                &Self::matched_dn(&entries, &request.base),
                format!("no entry named '{}'", request.base),
            ));
        }
        let mut matched: Vec<&Entry> = entries
            .values()
            .filter(|e| match request.scope {
                SearchScope::Base => e.dn.matches(&request.base),
                SearchScope::One => {
                    e.dn.depth() == request.base.depth() + 1
                        && e.dn.is_subordinate_of(&request.base)
                }
                SearchScope::Subtree => e.dn.is_subordinate_of(&request.base),
            })
            .filter(|e| request.filter.matches(e))
            .collect();
        matched.sort_by_key(|e| e.dn.normalized());

        let (selected, cookie) = match &request.page {
            Some(page) => {
                let offset: usize = std::str::from_utf8(&page.cookie)
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|_| {
                        DirectoryError::result(
                            result_code::UNWILLING_TO_PERFORM,
                            "unrecognized paging cookie",
                        )
                    })?
                    .unwrap_or(0);
                let end = (offset + page.size as usize).min(matched.len());
                let slice = matched.get(offset..end).unwrap_or(&[]).to_vec();
                let cookie = (end < matched.len()).then(|| end.to_string().into_bytes());
                (slice, cookie)
            }
            None => {
                if request.size_limit > 0 {
                    matched.truncate(request.size_limit as usize);
                }
                (matched, None)
            }
        };
        Ok(SearchResult {
            entries: selected
                .into_iter()
                .map(|e| Self::select(e, &request.attributes))
                .collect(),
            paged_cookie: cookie,
        })
    }

    async fn add(&self, request: AddRequest) -> DirectoryResult<WriteResult> {
        let mut entries = self.entries.write().await;
        let key = request.entry.dn.normalized();
        if entries.contains_key(&key) {
            return Err(DirectoryError::result(
                result_code::ENTRY_ALREADY_EXISTS,
                format!("entry '{}' already exists", request.entry.dn),
            ));
        }
        let parent = request.entry.dn.parent();
        if parent.depth() > 0 && !entries.contains_key(&parent.normalized()) {
            return Err(DirectoryError::result_with_matched(
                result_code::NO_SUCH_OBJECT,
                &Self::matched_dn(&entries, &request.entry.dn),
                format!("parent of '{}' does not exist", request.entry.dn),
            ));
        }
        let mut entry = request.entry;
        entry.replace(Attribute::single(ETAG, "1"));
        let result = Self::read_controls(None, Some(&entry), &request.controls);
        entries.insert(key, entry);
        Ok(result)
    }

    async fn modify(&self, request: ModifyRequest) -> DirectoryResult<WriteResult> {
        let mut entries = self.entries.write().await;
        let key = request.dn.normalized();
        let Some(current) = entries.get(&key) else {
            return Err(DirectoryError::result_with_matched(
                result_code::NO_SUCH_OBJECT,
                &Self::matched_dn(&entries, &request.dn),
                format!("no entry named '{}'", request.dn),
            ));
        };
        Self::check_assertion(current, &request.controls)?;
        let permissive = request.controls.contains(&Control::PermissiveModify);
        let before = current.clone();
        let mut updated = before.clone();
        for modification in &request.modifications {
            Self::apply_modification(&mut updated, modification, permissive)?;
        }
        Self::bump_etag(&mut updated);
        let result = Self::read_controls(Some(&before), Some(&updated), &request.controls);
        entries.insert(key, updated);
        Ok(result)
    }

    async fn delete(&self, request: DeleteRequest) -> DirectoryResult<()> {
        let mut entries = self.entries.write().await;
        let key = request.dn.normalized();
        let Some(target) = entries.get(&key) else {
            return Err(DirectoryError::result_with_matched(
                result_code::NO_SUCH_OBJECT,
                &Self::matched_dn(&entries, &request.dn),
                format!("no entry named '{}'", request.dn),
            ));
        };
        Self::check_assertion(target, &request.controls)?;
        let subtree = self.support_subtree_delete
            && request
                .controls
                .iter()
                .any(|c| matches!(c, Control::SubtreeDelete { .. }));
        let dn = target.dn.clone();
        if Self::has_children(&entries, &dn) {
            if !subtree {
                return Err(DirectoryError::result(
                    result_code::NOT_ALLOWED_ON_NON_LEAF,
                    format!("entry '{dn}' has subordinates"),
                ));
            }
            entries.retain(|_, e| !e.dn.is_subordinate_of(&dn));
            return Ok(());
        }
        entries.remove(&key);
        Ok(())
    }

    async fn modify_password(
        &self,
        request: PasswordModifyRequest,
    ) -> DirectoryResult<Option<String>> {
        let mut entries = self.entries.write().await;
        let key = request.dn.normalized();
        let Some(entry) = entries.get_mut(&key) else {
            return Err(DirectoryError::result(
                result_code::NO_SUCH_OBJECT,
                format!("no entry named '{}'", request.dn),
            ));
        };
        if let Some(old) = &request.old_password {
            let held = entry.values(USER_PASSWORD);
            if !held.iter().any(|v| v == old) {
                return Err(DirectoryError::result(
                    result_code::INVALID_CREDENTIALS,
                    "current password does not match",
                ));
            }
        }
        let (stored, generated) = match request.new_password {
            Some(password) => (password, None),
            None => {
                let password = Uuid::new_v4().to_string();
                (password.clone(), Some(password))
            }
        };
        entry.replace(Attribute::single(USER_PASSWORD, stored));
        Self::bump_etag(entry);
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::LdapFilter;

    fn person(dn: &str, cn: &str) -> Entry {
        let mut entry = Entry::new(Dn::parse(dn).unwrap());
        entry.put(Attribute::new(
            "objectClass",
            vec!["top".into(), "person".into()],
        ));
        entry.put(Attribute::single("cn", cn));
        entry
    }

    async fn seeded() -> InMemoryDirectory {
        let dir = InMemoryDirectory::new();
        dir.seed(Entry::new(Dn::parse("dc=example,dc=com").unwrap()))
            .await;
        dir.seed(Entry::new(Dn::parse("ou=people,dc=example,dc=com").unwrap()))
            .await;
        dir.seed(person("cn=alice,ou=people,dc=example,dc=com", "alice"))
            .await;
        dir.seed(person("cn=bob,ou=people,dc=example,dc=com", "bob"))
            .await;
        dir
    }

    #[tokio::test]
    async fn one_level_search_excludes_base_and_grandchildren() {
        let dir = seeded().await;
        let result = dir
            .search(SearchRequest::new(
                Dn::parse("dc=example,dc=com").unwrap(),
                SearchScope::One,
                LdapFilter::AlwaysTrue,
                vec![],
            ))
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(
            result.entries[0].dn.normalized(),
            "ou=people,dc=example,dc=com"
        );
    }

    #[tokio::test]
    async fn search_of_missing_base_reports_closest_ancestor() {
        let dir = seeded().await;
        let err = dir
            .search(SearchRequest::base_object(
                Dn::parse("ou=groups,dc=example,dc=com").unwrap(),
                vec![],
            ))
            .await
            .unwrap_err();
        match err {
            DirectoryError::Result {
                code, matched_dn, ..
            } => {
                assert_eq!(code, result_code::NO_SUCH_OBJECT);
                assert_eq!(matched_dn, "dc=example,dc=com");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn add_requires_parent_and_rejects_duplicates() {
        let dir = seeded().await;
        let err = dir
            .add(AddRequest {
                entry: person("cn=eve,ou=nowhere,dc=example,dc=com", "eve"),
                controls: vec![],
            })
            .await
            .unwrap_err();
        assert!(err.is_code(result_code::NO_SUCH_OBJECT));

        let err = dir
            .add(AddRequest {
                entry: person("cn=alice,ou=people,dc=example,dc=com", "alice"),
                controls: vec![],
            })
            .await
            .unwrap_err();
        assert!(err.is_code(result_code::ENTRY_ALREADY_EXISTS));
    }

    #[tokio::test]
    async fn assertion_control_guards_modify() {
        let dir = seeded().await;
        let dn = Dn::parse("cn=alice,ou=people,dc=example,dc=com").unwrap();
        let err = dir
            .modify(ModifyRequest {
                dn: dn.clone(),
                modifications: vec![Modification::replace("sn", vec!["Liddell".into()])],
                controls: vec![Control::Assertion {
                    filter: LdapFilter::equality("etag", "999"),
                }],
            })
            .await
            .unwrap_err();
        assert!(err.is_code(result_code::ASSERTION_FAILED));

        dir.modify(ModifyRequest {
            dn: dn.clone(),
            modifications: vec![Modification::replace("sn", vec!["Liddell".into()])],
            controls: vec![Control::Assertion {
                filter: LdapFilter::equality("etag", "1"),
            }],
        })
        .await
        .unwrap();
        let entry = dir.read_entry(&dn, vec![]).await.unwrap().unwrap();
        assert_eq!(entry.first_value("etag"), Some("2"));
    }

    #[tokio::test]
    async fn permissive_modify_tolerates_redundant_changes() {
        let dir = seeded().await;
        let dn = Dn::parse("cn=alice,ou=people,dc=example,dc=com").unwrap();
        let redundant = vec![
            Modification::add("cn", vec!["alice".into()]),
            Modification::delete("mail", vec![]),
        ];
        let err = dir
            .modify(ModifyRequest {
                dn: dn.clone(),
                modifications: redundant.clone(),
                controls: vec![],
            })
            .await
            .unwrap_err();
        assert!(err.is_code(result_code::ATTRIBUTE_OR_VALUE_EXISTS));

        dir.modify(ModifyRequest {
            dn,
            modifications: redundant,
            controls: vec![Control::PermissiveModify],
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn subtree_delete_needs_server_support() {
        let dir = seeded().await;
        let base = Dn::parse("ou=people,dc=example,dc=com").unwrap();
        let err = dir
            .delete(DeleteRequest {
                dn: base.clone(),
                controls: vec![Control::SubtreeDelete { critical: false }],
            })
            .await
            .unwrap_err();
        assert!(err.is_code(result_code::NOT_ALLOWED_ON_NON_LEAF));

        let dir = InMemoryDirectory::with_subtree_delete();
        dir.seed(Entry::new(Dn::parse("dc=example,dc=com").unwrap()))
            .await;
        dir.seed(Entry::new(base.clone())).await;
        dir.seed(person("cn=alice,ou=people,dc=example,dc=com", "alice"))
            .await;
        dir.delete(DeleteRequest {
            dn: base,
            controls: vec![Control::SubtreeDelete { critical: false }],
        })
        .await
        .unwrap();
        assert_eq!(dir.len().await, 1);
    }

    #[tokio::test]
    async fn paged_search_walks_the_whole_result() {
        let dir = seeded().await;
        let mut request = SearchRequest::new(
            Dn::parse("dc=example,dc=com").unwrap(),
            SearchScope::Subtree,
            LdapFilter::AlwaysTrue,
            vec!["1.1".into()],
        );
        request.page = Some(crate::connection::SimplePage {
            size: 3,
            cookie: vec![],
        });
        let first = dir.search(request.clone()).await.unwrap();
        assert_eq!(first.entries.len(), 3);
        let cookie = first.paged_cookie.expect("more pages");

        request.page = Some(crate::connection::SimplePage {
            size: 3,
            cookie,
        });
        let second = dir.search(request).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(second.paged_cookie.is_none());
    }

    #[tokio::test]
    async fn password_modify_verifies_old_and_generates_new() {
        let dir = seeded().await;
        let dn = Dn::parse("cn=alice,ou=people,dc=example,dc=com").unwrap();
        dir.modify_password(PasswordModifyRequest {
            dn: dn.clone(),
            old_password: None,
            new_password: Some("secret".into()),
            controls: vec![],
        })
        .await
        .unwrap();

        let err = dir
            .modify_password(PasswordModifyRequest {
                dn: dn.clone(),
                old_password: Some("wrong".into()),
                new_password: Some("other".into()),
                controls: vec![],
            })
            .await
            .unwrap_err();
        assert!(err.is_code(result_code::INVALID_CREDENTIALS));

        let generated = dir
            .modify_password(PasswordModifyRequest {
                dn,
                old_password: Some("secret".into()),
                new_password: None,
                controls: vec![],
            })
            .await
            .unwrap();
        assert!(generated.is_some());
    }
}
