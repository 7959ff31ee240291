//! Process-local collaborators.
//!
//! [`MemoryStore`] keys blobs by BLAKE3 and keeps a sorted path index so a
//! branch's stored nodes can be listed by prefix. [`MemoryResolver`] keeps
//! pointers in a map behind one mutex, which makes its
//! `compare_and_swap` atomic.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::trace;

use super::{
    BackendError, CasOutcome, ContentKey, ContentStore, NameResolver, PathHint, Stored, name_owner,
};
use crate::context::OpContext;

fn poisoned<T>(_: T) -> BackendError {
    BackendError::Unavailable("in-memory backend lock poisoned".into())
}

/// In-memory content-addressed blob store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<ContentKey, Arc<[u8]>>>,
    paths: RwLock<BTreeMap<String, ContentKey>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held.
    ///
    /// # Errors
    ///
    /// [`BackendError::Unavailable`] if the store lock was poisoned.
    pub fn len(&self) -> Result<usize, BackendError> {
        Ok(self.blobs.read().map_err(poisoned)?.len())
    }

    /// # Errors
    ///
    /// Same as [`MemoryStore::len`].
    pub fn is_empty(&self) -> Result<bool, BackendError> {
        Ok(self.len()? == 0)
    }

    /// All recorded paths starting with `prefix`, in lexicographic order,
    /// with the key each one names.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryStore::len`].
    pub fn paths_under(&self, prefix: &str) -> Result<Vec<(String, ContentKey)>, BackendError> {
        let paths = self.paths.read().map_err(poisoned)?;
        Ok(paths
            .range(prefix.to_owned()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, key)| (path.clone(), key.clone()))
            .collect())
    }
}

impl ContentStore for MemoryStore {
    fn put(
        &self,
        ctx: &OpContext,
        bytes: &[u8],
        path_hint: Option<PathHint<'_>>,
    ) -> Result<Stored, BackendError> {
        ctx.check()?;
        let key = ContentKey::for_bytes(bytes);
        self.blobs
            .write()
            .map_err(poisoned)?
            .entry(key.clone())
            .or_insert_with(|| Arc::from(bytes));

        let path = path_hint.map(|hint| hint(&key));
        if let Some(path) = &path {
            self.paths
                .write()
                .map_err(poisoned)?
                .insert(path.clone(), key.clone());
        }
        trace!(%key, ?path, "stored blob");
        Ok(Stored { key, path })
    }

    fn get(&self, ctx: &OpContext, key: &ContentKey) -> Result<Vec<u8>, BackendError> {
        ctx.check()?;
        self.blobs
            .read()
            .map_err(poisoned)?
            .get(key)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    fn remove(&self, ctx: &OpContext, key: &ContentKey, path: Option<&str>) -> Result<(), BackendError> {
        ctx.check()?;
        self.blobs.write().map_err(poisoned)?.remove(key);
        if let Some(path) = path {
            let mut paths = self.paths.write().map_err(poisoned)?;
            if paths.get(path) == Some(key) {
                paths.remove(path);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ResolverState {
    pointers: HashMap<String, ContentKey>,
    managed: HashSet<String>,
}

/// In-memory name resolver with atomic compare-and-swap.
///
/// With ownership enforcement on, writes are accepted only for names whose
/// first path segment is an address previously passed to `manage`.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    state: Mutex<ResolverState>,
    enforce_ownership: bool,
}

impl MemoryResolver {
    /// A resolver that accepts writes for any name.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver that only accepts writes for managed addresses.
    #[must_use]
    pub fn with_ownership() -> Self {
        Self {
            state: Mutex::default(),
            enforce_ownership: true,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ResolverState>, BackendError> {
        self.state.lock().map_err(poisoned)
    }

    fn check_owner(&self, state: &ResolverState, name: &str) -> Result<(), BackendError> {
        if !self.enforce_ownership {
            return Ok(());
        }
        match name_owner(name) {
            Some(owner) if state.managed.contains(owner) => Ok(()),
            Some(owner) => Err(BackendError::NotManaged(owner.to_owned())),
            None => Err(BackendError::NotManaged(name.to_owned())),
        }
    }

    /// Snapshot of every pointer, sorted by name.
    ///
    /// # Errors
    ///
    /// [`BackendError::Unavailable`] if the resolver lock was poisoned.
    pub fn pointers(&self) -> Result<BTreeMap<String, ContentKey>, BackendError> {
        Ok(self
            .lock()?
            .pointers
            .iter()
            .map(|(name, key)| (name.clone(), key.clone()))
            .collect())
    }
}

impl NameResolver for MemoryResolver {
    fn resolve(&self, ctx: &OpContext, name: &str) -> Result<ContentKey, BackendError> {
        ctx.check()?;
        self.lock()?
            .pointers
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(name.to_owned()))
    }

    fn add(&self, ctx: &OpContext, name: &str, key: &ContentKey) -> Result<(), BackendError> {
        ctx.check()?;
        let mut state = self.lock()?;
        self.check_owner(&state, name)?;
        state.pointers.insert(name.to_owned(), key.clone());
        Ok(())
    }

    fn manage(&self, ctx: &OpContext, address: &str) -> Result<(), BackendError> {
        ctx.check()?;
        self.lock()?.managed.insert(address.to_owned());
        Ok(())
    }

    fn compare_and_swap(
        &self,
        ctx: &OpContext,
        name: &str,
        expected: Option<&ContentKey>,
        new: &ContentKey,
    ) -> Result<CasOutcome, BackendError> {
        ctx.check()?;
        let mut state = self.lock()?;
        self.check_owner(&state, name)?;
        let current = state.pointers.get(name);
        if current != expected {
            return Ok(CasOutcome::Conflict {
                current: current.cloned(),
            });
        }
        state.pointers.insert(name.to_owned(), new.clone());
        Ok(CasOutcome::Swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OpContext {
        OpContext::background()
    }

    #[test]
    fn put_is_idempotent_and_content_addressed() {
        let store = MemoryStore::new();
        let a = store.put(&ctx(), b"node", None).expect("put");
        let b = store.put(&ctx(), b"node", None).expect("put again");
        assert_eq!(a.key, b.key);
        assert_eq!(store.len().expect("len"), 1);
        assert_eq!(store.get(&ctx(), &a.key).expect("get"), b"node");
    }

    #[test]
    fn missing_blob_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .get(&ctx(), &ContentKey::new("missing"))
            .expect_err("should be absent");
        assert!(err.is_not_found());
    }

    #[test]
    fn path_hint_is_recorded_and_listable() {
        let store = MemoryStore::new();
        let hint = |key: &ContentKey| format!("/addr/ns/dag/{key}");
        let stored = store.put(&ctx(), b"root", Some(&hint)).expect("put");
        let path = stored.path.clone().expect("path recorded");
        assert_eq!(path, format!("/addr/ns/dag/{}", stored.key));

        let child_hint = |key: &ContentKey| format!("{path}/branches/likes/{key}");
        store.put(&ctx(), b"child", Some(&child_hint)).expect("put child");
        store
            .put(&ctx(), b"elsewhere", Some(&|key: &ContentKey| format!("/other/{key}")))
            .expect("put other");

        let listed = store.paths_under("/addr/").expect("list");
        assert_eq!(listed.len(), 2);
        assert!(listed[1].0.contains("/branches/likes/"));
    }

    #[test]
    fn remove_drops_blob_and_path() {
        let store = MemoryStore::new();
        let hint = |key: &ContentKey| format!("/p/{key}");
        let stored = store.put(&ctx(), b"x", Some(&hint)).expect("put");
        store
            .remove(&ctx(), &stored.key, stored.path.as_deref())
            .expect("remove");
        assert!(store.is_empty().expect("empty"));
        assert!(store.paths_under("/p/").expect("list").is_empty());
    }

    #[test]
    fn cancelled_context_blocks_store_calls() {
        let store = MemoryStore::new();
        let ctx = OpContext::background();
        ctx.cancel();
        assert!(matches!(
            store.put(&ctx, b"x", None),
            Err(BackendError::Cancelled)
        ));
    }

    #[test]
    fn resolver_add_and_resolve() {
        let resolver = MemoryResolver::new();
        let key = ContentKey::new("k1");
        resolver.add(&ctx(), "/a/ns/x", &key).expect("add");
        assert_eq!(resolver.resolve(&ctx(), "/a/ns/x").expect("resolve"), key);
        assert!(resolver
            .resolve(&ctx(), "/a/ns/y")
            .expect_err("unset")
            .is_not_found());
    }

    #[test]
    fn compare_and_swap_detects_conflicts() {
        let resolver = MemoryResolver::new();
        let k1 = ContentKey::new("k1");
        let k2 = ContentKey::new("k2");
        let k3 = ContentKey::new("k3");

        assert_eq!(
            resolver.compare_and_swap(&ctx(), "/a/p", None, &k1).expect("cas"),
            CasOutcome::Swapped
        );
        assert_eq!(
            resolver.compare_and_swap(&ctx(), "/a/p", None, &k2).expect("cas"),
            CasOutcome::Conflict {
                current: Some(k1.clone())
            }
        );
        assert_eq!(
            resolver
                .compare_and_swap(&ctx(), "/a/p", Some(&k1), &k3)
                .expect("cas"),
            CasOutcome::Swapped
        );
        assert_eq!(resolver.resolve(&ctx(), "/a/p").expect("resolve"), k3);
    }

    #[test]
    fn ownership_requires_manage() {
        let resolver = MemoryResolver::with_ownership();
        let key = ContentKey::new("k");
        let err = resolver.add(&ctx(), "/owner/ns/x", &key).expect_err("unmanaged");
        assert!(matches!(err, BackendError::NotManaged(owner) if owner == "owner"));

        resolver.manage(&ctx(), "owner").expect("manage");
        resolver.add(&ctx(), "/owner/ns/x", &key).expect("managed write");
        assert_eq!(resolver.pointers().expect("snapshot").len(), 1);
    }
}
