//! Collaborator interfaces: content-addressed storage and name resolution.
//!
//! The engine owns no persistent state. Everything it knows lives behind
//! these two traits:
//!
//! - [`ContentStore`]: immutable blobs keyed by the hash of their bytes.
//!   Writes are idempotent, so concurrent duplicate puts are harmless.
//! - [`NameResolver`]: mutable `name -> content key` pointers. The resolver,
//!   not the engine, is the serialization point for concurrent appends;
//!   see [`NameResolver::compare_and_swap`].
//!
//! # Reference implementations
//!
//! - [`memory`]: process-local store and resolver, used by tests and the
//!   simulator. ([`MemoryStore`], [`MemoryResolver`])
//! - [`fs`]: directory-backed store and resolver that several processes can
//!   share. ([`FsStore`], [`FsResolver`])

pub mod fs;
pub mod lock;
pub mod memory;

pub use fs::{FsResolver, FsStore};
pub use memory::{MemoryResolver, MemoryStore};

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::context::OpContext;

/// Identifier of a blob in a [`ContentStore`]: the lowercase hex hash of its
/// bytes. Also the identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for `bytes` under the reference hashing scheme (BLAKE3, hex).
    #[must_use]
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ContentKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Errors raised by collaborators.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No blob for the key, or no pointer for the name.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline passed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// The resolver refuses writes for an address it does not manage.
    #[error("address {0} is not managed by this resolver")]
    NotManaged(String),

    /// The backend could not be reached or failed internally.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend I/O error: {0}")]
    Io(#[from] io::Error),

    /// A lock around backend state could not be acquired in time.
    #[error("backend lock error: {0}")]
    Lock(#[from] lock::LockError),
}

impl BackendError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for failures that may go away on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DeadlineExceeded | Self::Unavailable(_) | Self::Io(_) | Self::Lock(_)
        )
    }
}

/// Result of a successful [`ContentStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub key: ContentKey,
    /// The symbolic path recorded alongside the blob, when a hint was given.
    pub path: Option<String>,
}

/// Maps a freshly computed content key to the symbolic path it should be
/// recorded under.
pub type PathHint<'a> = &'a dyn Fn(&ContentKey) -> String;

/// Content-addressed blob storage.
pub trait ContentStore: Send + Sync {
    /// Store `bytes`, returning their content key. When `path_hint` is given
    /// the store also records the path it produces for the key.
    ///
    /// # Errors
    ///
    /// Backend failures, cancellation.
    fn put(
        &self,
        ctx: &OpContext,
        bytes: &[u8],
        path_hint: Option<PathHint<'_>>,
    ) -> Result<Stored, BackendError>;

    /// Fetch the bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// [`BackendError::NotFound`] if absent; backend failures, cancellation.
    fn get(&self, ctx: &OpContext, key: &ContentKey) -> Result<Vec<u8>, BackendError>;

    /// Remove a blob and, if given, its path association.
    ///
    /// # Errors
    ///
    /// Backend failures, cancellation. Removing an absent key is not an error.
    fn remove(&self, ctx: &OpContext, key: &ContentKey, path: Option<&str>) -> Result<(), BackendError>;
}

/// Outcome of [`NameResolver::compare_and_swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped,
    /// The pointer did not hold the expected value; `current` is what it held.
    Conflict { current: Option<ContentKey> },
}

/// Mutable pointers from symbolic names to content keys.
pub trait NameResolver: Send + Sync {
    /// Resolve `name` to the key it currently denotes.
    ///
    /// # Errors
    ///
    /// [`BackendError::NotFound`] if the name is unset.
    fn resolve(&self, ctx: &OpContext, name: &str) -> Result<ContentKey, BackendError>;

    /// Point `name` at `key` unconditionally.
    ///
    /// # Errors
    ///
    /// [`BackendError::NotManaged`] when the resolver enforces ownership and
    /// the name's address was never passed to [`NameResolver::manage`].
    fn add(&self, ctx: &OpContext, name: &str, key: &ContentKey) -> Result<(), BackendError>;

    /// Register `address` as one this resolver accepts writes for.
    ///
    /// # Errors
    ///
    /// Backend failures, cancellation.
    fn manage(&self, ctx: &OpContext, address: &str) -> Result<(), BackendError>;

    /// Point `name` at `new` only if it currently holds `expected`
    /// (`None` meaning unset).
    ///
    /// The default implementation is a plain resolve-then-add and is NOT
    /// atomic: two writers can both observe the same value and both
    /// "succeed", the later one silently overwriting the earlier. Backends
    /// serving concurrent writers must override it with a real
    /// compare-and-set.
    ///
    /// # Errors
    ///
    /// Same as [`NameResolver::resolve`] and [`NameResolver::add`], except
    /// that an unset name is not an error.
    fn compare_and_swap(
        &self,
        ctx: &OpContext,
        name: &str,
        expected: Option<&ContentKey>,
        new: &ContentKey,
    ) -> Result<CasOutcome, BackendError> {
        let current = match self.resolve(ctx, name) {
            Ok(key) => Some(key),
            Err(BackendError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if current.as_ref() != expected {
            return Ok(CasOutcome::Conflict { current });
        }
        self.add(ctx, name, new)?;
        Ok(CasOutcome::Swapped)
    }
}

/// The address segment of a resolver name (`/<address>/...`).
#[must_use]
pub fn name_owner(name: &str) -> Option<&str> {
    name.strip_prefix('/')?.split('/').next().filter(|s| !s.is_empty())
}
