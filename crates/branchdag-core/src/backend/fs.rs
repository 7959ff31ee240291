//! Directory-backed collaborators.
//!
//! # Directory Layout
//!
//! ```text
//! <store root>/
//!   blobs/ab/abcdef...        # blob bytes, sharded by the first two key chars
//!   paths/<addr>/<ns>/dag/<root key>/key
//!   paths/<addr>/<ns>/dag/<root key>/branches/<branch>/<key>/key
//!
//! <resolver root>/
//!   resolver.lock             # advisory lock guarding every pointer
//!   names/<blake3(name)>      # "<name>\n<key>\n"
//!   managed/<address>         # empty marker per managed address
//! ```
//!
//! # Invariants
//!
//! - Blobs and pointers are written to a temp file and renamed into place,
//!   so readers never observe a torn write.
//! - Every pointer mutation holds `resolver.lock` exclusively, which makes
//!   `compare_and_swap` atomic across threads and processes.

use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tracing::{debug, trace};

use super::lock::{PointerReadLock, PointerWriteLock};
use super::{
    BackendError, CasOutcome, ContentKey, ContentStore, NameResolver, PathHint, Stored, name_owner,
};
use crate::context::OpContext;

/// Lock wait used when the caller's context has no deadline.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

fn lock_timeout(ctx: &OpContext) -> Duration {
    ctx.remaining().unwrap_or(DEFAULT_LOCK_TIMEOUT)
}

/// Write `bytes` to `path` via a sibling temp file and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = parent.join(format!(
        ".{}.{:016x}.tmp",
        file_name.to_string_lossy(),
        rand::random::<u64>()
    ));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_data()?;
    drop(file);
    fs::rename(&tmp, path)
}

/// Map a symbolic `/a/b/c` path onto a relative directory, rejecting
/// traversal components.
fn relative_dir(symbolic: &str) -> io::Result<PathBuf> {
    let rel = Path::new(symbolic.trim_start_matches('/'));
    let mut out = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path {symbolic:?} is not a plain relative path"),
                ));
            }
        }
    }
    Ok(out)
}

/// Content store persisting blobs as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// I/O errors creating the directory layout.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        fs::create_dir_all(root.join("blobs"))?;
        fs::create_dir_all(root.join("paths"))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &ContentKey) -> Result<PathBuf, BackendError> {
        let k = key.as_str();
        if k.len() < 3 || !k.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BackendError::NotFound(k.to_owned()));
        }
        Ok(self.root.join("blobs").join(&k[..2]).join(k))
    }

    fn path_entry(&self, symbolic: &str) -> io::Result<PathBuf> {
        Ok(self.root.join("paths").join(relative_dir(symbolic)?).join("key"))
    }

    /// Keys recorded under the symbolic directory `prefix`, found by walking
    /// the path index.
    ///
    /// # Errors
    ///
    /// I/O errors reading the index.
    pub fn keys_under(&self, prefix: &str) -> Result<Vec<ContentKey>, BackendError> {
        let start = self.root.join("paths").join(relative_dir(prefix)?);
        let mut keys = Vec::new();
        if !start.exists() {
            return Ok(keys);
        }
        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    stack.push(path);
                } else if path.file_name().is_some_and(|n| n == "key") {
                    keys.push(ContentKey::new(fs::read_to_string(&path)?.trim()));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl ContentStore for FsStore {
    fn put(
        &self,
        ctx: &OpContext,
        bytes: &[u8],
        path_hint: Option<PathHint<'_>>,
    ) -> Result<Stored, BackendError> {
        ctx.check()?;
        let key = ContentKey::for_bytes(bytes);
        let blob = self.blob_path(&key)?;
        if !blob.exists() {
            write_atomic(&blob, bytes)?;
        }

        let path = path_hint.map(|hint| hint(&key));
        if let Some(path) = &path {
            ctx.check()?;
            write_atomic(&self.path_entry(path)?, key.as_str().as_bytes())?;
        }
        trace!(%key, ?path, "stored blob on disk");
        Ok(Stored { key, path })
    }

    fn get(&self, ctx: &OpContext, key: &ContentKey) -> Result<Vec<u8>, BackendError> {
        ctx.check()?;
        match fs::read(self.blob_path(key)?) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, ctx: &OpContext, key: &ContentKey, path: Option<&str>) -> Result<(), BackendError> {
        ctx.check()?;
        match fs::remove_file(self.blob_path(key)?) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(path) = path {
            let entry = self.path_entry(path)?;
            if fs::read_to_string(&entry).is_ok_and(|k| k.trim() == key.as_str()) {
                fs::remove_file(&entry)?;
            }
        }
        Ok(())
    }
}

/// Name resolver persisting one small file per pointer.
#[derive(Debug, Clone)]
pub struct FsResolver {
    root: PathBuf,
    enforce_ownership: bool,
}

impl FsResolver {
    /// Open (creating if needed) a resolver rooted at `root` that accepts
    /// writes for any name.
    ///
    /// # Errors
    ///
    /// I/O errors creating the directory layout.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        fs::create_dir_all(root.join("names"))?;
        fs::create_dir_all(root.join("managed"))?;
        Ok(Self {
            root,
            enforce_ownership: false,
        })
    }

    /// Only accept writes for addresses registered through `manage`.
    #[must_use]
    pub const fn with_ownership(mut self) -> Self {
        self.enforce_ownership = true;
        self
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join("resolver.lock")
    }

    fn pointer_path(&self, name: &str) -> PathBuf {
        self.root
            .join("names")
            .join(blake3::hash(name.as_bytes()).to_hex().as_str())
    }

    fn managed_path(&self, address: &str) -> Result<PathBuf, BackendError> {
        if address.is_empty() || !address.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BackendError::NotManaged(address.to_owned()));
        }
        Ok(self.root.join("managed").join(address))
    }

    fn read_pointer(&self, name: &str) -> Result<Option<ContentKey>, BackendError> {
        let content = match fs::read_to_string(self.pointer_path(name)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut lines = content.lines();
        match (lines.next(), lines.next()) {
            (Some(stored_name), Some(key)) if stored_name == name => {
                Ok(Some(ContentKey::new(key)))
            }
            _ => Err(BackendError::Unavailable(format!(
                "pointer file for {name:?} is corrupt"
            ))),
        }
    }

    fn write_pointer(&self, name: &str, key: &ContentKey) -> Result<(), BackendError> {
        write_atomic(&self.pointer_path(name), format!("{name}\n{key}\n").as_bytes())?;
        Ok(())
    }

    fn check_owner(&self, name: &str) -> Result<(), BackendError> {
        if !self.enforce_ownership {
            return Ok(());
        }
        let owner = name_owner(name).ok_or_else(|| BackendError::NotManaged(name.to_owned()))?;
        if self.managed_path(owner)?.exists() {
            Ok(())
        } else {
            Err(BackendError::NotManaged(owner.to_owned()))
        }
    }
}

impl NameResolver for FsResolver {
    fn resolve(&self, ctx: &OpContext, name: &str) -> Result<ContentKey, BackendError> {
        ctx.check()?;
        let _lock = PointerReadLock::acquire(&self.lock_path(), lock_timeout(ctx))?;
        self.read_pointer(name)?
            .ok_or_else(|| BackendError::NotFound(name.to_owned()))
    }

    fn add(&self, ctx: &OpContext, name: &str, key: &ContentKey) -> Result<(), BackendError> {
        ctx.check()?;
        self.check_owner(name)?;
        let _lock = PointerWriteLock::acquire(&self.lock_path(), lock_timeout(ctx))?;
        self.write_pointer(name, key)
    }

    fn manage(&self, ctx: &OpContext, address: &str) -> Result<(), BackendError> {
        ctx.check()?;
        let marker = self.managed_path(address)?;
        if !marker.exists() {
            write_atomic(&marker, b"")?;
            debug!(address, "resolver now manages address");
        }
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
        self.check_owner(name)?;
        let _lock = PointerWriteLock::acquire(&self.lock_path(), lock_timeout(ctx))?;
        let current = self.read_pointer(name)?;
        if current.as_ref() != expected {
            return Ok(CasOutcome::Conflict { current });
        }
        self.write_pointer(name, new)?;
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
    fn relative_dir_rejects_traversal() {
        assert!(relative_dir("/a/b/c").is_ok());
        assert!(relative_dir("/a/../etc").is_err());
        assert!(relative_dir("/a/./b").is_ok_and(|p| p == Path::new("a/b")));
    }

    #[test]
    fn blob_round_trip_and_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::open(dir.path()).expect("open");
        let stored = store.put(&ctx(), b"payload", None).expect("put");
        assert_eq!(store.get(&ctx(), &stored.key).expect("get"), b"payload");

        store.remove(&ctx(), &stored.key, None).expect("remove");
        assert!(store.get(&ctx(), &stored.key).expect_err("gone").is_not_found());
        // Removing twice is fine.
        store.remove(&ctx(), &stored.key, None).expect("remove again");
    }

    #[test]
    fn pointers_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key = ContentKey::new("abc123");
        {
            let resolver = FsResolver::open(dir.path()).expect("open");
            resolver.add(&ctx(), "/addr/ns/dag/shortcuts/root", &key).expect("add");
        }
        let reopened = FsResolver::open(dir.path()).expect("reopen");
        assert_eq!(
            reopened
                .resolve(&ctx(), "/addr/ns/dag/shortcuts/root")
                .expect("resolve"),
            key
        );
    }

    #[test]
    fn fs_compare_and_swap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = FsResolver::open(dir.path()).expect("open");
        let k1 = ContentKey::new("k1");
        let k2 = ContentKey::new("k2");

        assert_eq!(
            resolver.compare_and_swap(&ctx(), "/a/x", None, &k1).expect("cas"),
            CasOutcome::Swapped
        );
        assert_eq!(
            resolver.compare_and_swap(&ctx(), "/a/x", None, &k2).expect("cas"),
            CasOutcome::Conflict {
                current: Some(k1.clone())
            }
        );
        assert_eq!(
            resolver
                .compare_and_swap(&ctx(), "/a/x", Some(&k1), &k2)
                .expect("cas"),
            CasOutcome::Swapped
        );
    }

    #[test]
    fn fs_ownership_requires_manage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = FsResolver::open(dir.path()).expect("open").with_ownership();
        let key = ContentKey::new("k");
        assert!(matches!(
            resolver.add(&ctx(), "/owner/ns/x", &key),
            Err(BackendError::NotManaged(_))
        ));
        resolver.manage(&ctx(), "owner").expect("manage");
        resolver.add(&ctx(), "/owner/ns/x", &key).expect("add");
    }
}
