//! A read-coalescing, caching connection wrapper.
//!
//! Wraps another [`DirectoryConnection`] with a small LRU of base-object
//! search results keyed by (DN, filter, attributes). Concurrent identical
//! reads attach to the one in-flight search instead of issuing duplicates.
//! Entries are evicted on a successful write to the same DN, on any
//! operation that cannot be attributed to a single DN (full clear), and
//! under LRU pressure.
//!
//! The wrapper also injects the caller's proxied-authorization identity into
//! every outgoing operation.

use crate::connection::{
    AddRequest, Control, DeleteRequest, DirectoryConnection, DirectoryResult, ModifyRequest,
    PasswordModifyRequest, SearchRequest, SearchResult, SearchScope, WriteResult,
};
use crate::ldap::Dn;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};

/// Most-recently-used capacity of the read cache.
const CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    dn: String,
    filter: String,
    /// Sorted, so attribute order does not split the cache.
    attributes: Vec<String>,
}

impl CacheKey {
    fn from_request(request: &SearchRequest) -> Self {
        let mut attributes = request.attributes.clone();
        attributes.sort();
        Self {
            dn: request.base.normalized(),
            filter: request.filter.to_string(),
            attributes,
        }
    }
}

type SharedSearch = Shared<BoxFuture<'static, DirectoryResult<SearchResult>>>;

pub struct CachedConnection {
    inner: Arc<dyn DirectoryConnection>,
    /// Injected as a proxied-authorization-v2 control on every operation.
    authorization_id: Option<String>,
    /// LRU order, most recently used last.
    reads: Mutex<Vec<(CacheKey, SharedSearch)>>,
}

impl CachedConnection {
    pub fn new(inner: Arc<dyn DirectoryConnection>) -> Self {
        Self {
            inner,
            authorization_id: None,
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Run all operations under the given authorization identity.
    pub fn with_authorization(
        inner: Arc<dyn DirectoryConnection>,
        authorization_id: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            authorization_id: Some(authorization_id.into()),
            reads: Mutex::new(Vec::new()),
        }
    }

    fn authorize(&self, mut controls: Vec<Control>) -> Vec<Control> {
        if let Some(id) = &self.authorization_id
            && !controls
                .iter()
                .any(|c| matches!(c, Control::ProxiedAuthorization { .. }))
        {
            controls.push(Control::ProxiedAuthorization {
                authorization_id: id.clone(),
            });
        }
        controls
    }

    /// Only plain base-object searches are coalesced; anything scoped,
    /// paged, limited, or controlled goes straight through.
    fn is_cacheable(request: &SearchRequest) -> bool {
        request.scope == SearchScope::Base
            && request.page.is_none()
            && request.size_limit == 0
            && request.controls.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(CacheKey, SharedSearch)>> {
        self.reads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_dn(&self, dn: &Dn) {
        let normalized = dn.normalized();
        self.lock().retain(|(key, _)| key.dn != normalized);
    }

    fn evict_all(&self) {
        self.lock().clear();
    }

    fn remove_key(&self, key: &CacheKey) {
        self.lock().retain(|(k, _)| k != key);
    }
}

#[async_trait]
impl DirectoryConnection for CachedConnection {
    async fn search(&self, mut request: SearchRequest) -> DirectoryResult<SearchResult> {
        if !Self::is_cacheable(&request) {
            request.controls = self.authorize(request.controls);
            return self.inner.search(request).await;
        }
        let key = CacheKey::from_request(&request);
        let shared = {
            let mut reads = self.lock();
            if let Some(position) = reads.iter().position(|(k, _)| *k == key) {
                // Touch for LRU and attach to the in-flight or completed
                // search.
                let entry = reads.remove(position);
                let shared = entry.1.clone();
                reads.push(entry);
                debug!("coalesced read of {}", request.base);
                shared
            } else {
                request.controls = self.authorize(request.controls);
                let inner = self.inner.clone();
                let shared: SharedSearch =
                    async move { inner.search(request).await }.boxed().shared();
                reads.push((key.clone(), shared.clone()));
                if reads.len() > CACHE_CAPACITY {
                    reads.remove(0);
                }
                shared
            }
        };
        let result = shared.await;
        if result.is_err() {
            // Failures are handed to every coalesced waiter but not kept.
            self.remove_key(&key);
        }
        result
    }

    async fn add(&self, mut request: AddRequest) -> DirectoryResult<WriteResult> {
        request.controls = self.authorize(request.controls);
        let dn = request.entry.dn.clone();
        let result = self.inner.add(request).await?;
        self.evict_dn(&dn);
        Ok(result)
    }

    async fn modify(&self, mut request: ModifyRequest) -> DirectoryResult<WriteResult> {
        request.controls = self.authorize(request.controls);
        let dn = request.dn.clone();
        let result = self.inner.modify(request).await?;
        self.evict_dn(&dn);
        Ok(result)
    }

    async fn delete(&self, mut request: DeleteRequest) -> DirectoryResult<()> {
        request.controls = self.authorize(request.controls);
        let dn = request.dn.clone();
        let subtree = request
            .controls
            .iter()
            .any(|c| matches!(c, Control::SubtreeDelete { .. }));
        self.inner.delete(request).await?;
        // A subtree delete removes entries cached under other DNs too.
        if subtree {
            self.evict_all();
        } else {
            self.evict_dn(&dn);
        }
        Ok(())
    }

    async fn modify_password(
        &self,
        mut request: PasswordModifyRequest,
    ) -> DirectoryResult<Option<String>> {
        request.controls = self.authorize(request.controls);
        let result = self.inner.modify_password(request).await?;
        // An extended operation is not attributable to one DN.
        self.evict_all();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::LdapFilter;

    #[test]
    fn cache_keys_ignore_attribute_order() {
        let base = Dn::parse("uid=a,dc=example").unwrap();
        let a = SearchRequest::base_object(base.clone(), vec!["cn".into(), "sn".into()]);
        let b = SearchRequest::base_object(base, vec!["sn".into(), "cn".into()]);
        assert_eq!(CacheKey::from_request(&a), CacheKey::from_request(&b));
    }

    #[test]
    fn scoped_and_paged_searches_bypass_the_cache() {
        let base = Dn::parse("dc=example").unwrap();
        let mut request = SearchRequest::new(
            base.clone(),
            SearchScope::Subtree,
            LdapFilter::AlwaysTrue,
            vec![],
        );
        assert!(!CachedConnection::is_cacheable(&request));
        request.scope = SearchScope::Base;
        assert!(CachedConnection::is_cacheable(&request));
        request.size_limit = 10;
        assert!(!CachedConnection::is_cacheable(&request));
    }
}
