//! The branch DAG engine.
//!
//! [`Dag`] is a stateless set of operations over a [`ContentStore`] and a
//! [`NameResolver`]; those two collaborators hold every piece of state. The
//! engine caches nothing between calls, so any number of `Dag` values may
//! share the same collaborators from any number of threads.
//!
//! # Commit protocol
//!
//! `set_root` and `append` write in an order that leaves exactly one
//! resolver update as the commit point:
//!
//! 1. put the node bytes (invisible: nothing references the new key yet);
//! 2. add head pointers for the sub-branches the node opens (invisible: they
//!    are keyed by the new key);
//! 3. compare-and-swap the main pointer (the root pointer or the branch head)
//!    from the value observed during verification to the new key.
//!
//! When step 3 loses a race the caller gets
//! [`DagError::PreviousNodeIsNotHead`] (or [`DagError::DagAlreadyInitialized`])
//! and its blob stays in the store. Blobs are content-addressed, so the same
//! key may already belong to an accepted node committed by another caller;
//! the engine never removes stored content. A lost race or a failure between
//! steps can therefore leave an unreferenced blob or unreachable sub-branch
//! pointers behind; readers never observe them.
//!
//! Atomicity of step 3 is whatever the resolver's
//! [`NameResolver::compare_and_swap`] provides. The trait default is not
//! atomic.

mod history;
mod verify;

pub use history::{AuditReport, AuditViolation};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{BackendError, CasOutcome, ContentKey, ContentStore, NameResolver, Stored};
use crate::config::DagConfig;
use crate::context::OpContext;
use crate::error::DagError;
use crate::node::Node;
use crate::paths::{branch_name_problem, branch_node_path, head_pointer, root_node_path, root_pointer};

/// Per-address branch DAG over pluggable storage and name resolution.
#[derive(Clone)]
pub struct Dag {
    store: Arc<dyn ContentStore>,
    resolver: Arc<dyn NameResolver>,
    config: DagConfig,
}

impl std::fmt::Debug for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dag")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dag {
    /// An engine with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn ContentStore>, resolver: Arc<dyn NameResolver>) -> Self {
        Self::with_config(store, resolver, DagConfig::default())
    }

    #[must_use]
    pub fn with_config(
        store: Arc<dyn ContentStore>,
        resolver: Arc<dyn NameResolver>,
        config: DagConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DagConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Establish `node` as the genesis node of its address.
    ///
    /// The root must open its own branch, have seq 1 and no previous node or
    /// branch root. On success the root pointer, the head pointer of its own
    /// branch and the head pointers of every branch it declares are set.
    ///
    /// # Errors
    ///
    /// [`DagError::DefaultBranchNotSpecified`], [`DagError::InvalidBranch`],
    /// any verification failure, [`DagError::InvalidBranchSeq`],
    /// [`DagError::DagAlreadyInitialized`], backend failures.
    pub fn set_root(&self, ctx: &OpContext, node: &Node) -> Result<ContentKey, DagError> {
        if node.branch.is_empty() {
            return Err(DagError::DefaultBranchNotSpecified);
        }
        if !node.opens(&node.branch) {
            return Err(DagError::InvalidBranch {
                branch: node.branch.clone(),
                reason: "a root must declare its own branch in branches",
            });
        }
        if !node.is_address_root() {
            return Err(DagError::InvalidBranch {
                branch: node.branch.clone(),
                reason: "an address root has no previous node or branch root",
            });
        }
        self.verify_node(ctx, node, None, false)?;
        if node.seq != 1 {
            return Err(DagError::InvalidBranchSeq {
                branch: node.branch.clone(),
                seq: node.seq,
                reason: "an address root has seq 1".into(),
            });
        }

        let namespace = self.config.namespace.as_str();
        let pointer_name = root_pointer(&node.address, namespace);
        if let Some(existing) = self.lookup(ctx, &pointer_name)? {
            debug!(address = %node.address, %existing, "root already set");
            return Err(DagError::DagAlreadyInitialized {
                address: node.address.clone(),
            });
        }

        let bytes = node.to_json()?;
        let address = node.address.as_str();
        let stored = self.put(ctx, &bytes, &|key: &ContentKey| root_node_path(address, namespace, key))?;
        self.open_branches(ctx, node, &stored.key)?;

        match self.swap(ctx, &pointer_name, None, &stored.key)? {
            CasOutcome::Swapped => {
                info!(address, key = %stored.key, branch = %node.branch, "dag root set");
                Ok(stored.key)
            }
            CasOutcome::Conflict { current } => {
                warn!(address, key = %stored.key, ?current, "lost race to set dag root");
                Err(DagError::DagAlreadyInitialized {
                    address: node.address.clone(),
                })
            }
        }
    }

    /// Append `node` to its branch under `branch_root_key`.
    ///
    /// The node must pass [`Dag::verify_node`] as a new node, which in
    /// particular requires its `previous` to be the branch's current head.
    /// On success the node is stored under its lineage path, head pointers
    /// for the sub-branches it opens are added, and the branch head moves to
    /// it.
    ///
    /// # Errors
    ///
    /// The first verification failure; [`DagError::PreviousNodeIsNotHead`]
    /// also when another append commits between verification and the head
    /// update; backend failures.
    pub fn append(
        &self,
        ctx: &OpContext,
        node: &Node,
        branch_root_key: &ContentKey,
    ) -> Result<ContentKey, DagError> {
        let previous = self.verify_content(ctx, node)?;
        let observed = self.verify_head(ctx, node, Some(branch_root_key), previous.as_ref())?;

        let depth = self.config.max_branch_depth.saturating_sub(1);
        let root_path = self.path_from(ctx, branch_root_key, &observed.root, depth)?;
        let bytes = node.to_json()?;
        let branch = node.branch.as_str();
        let stored = self.put(ctx, &bytes, &|key: &ContentKey| branch_node_path(&root_path, branch, key))?;
        self.open_branches(ctx, node, &stored.key)?;

        match self.swap(
            ctx,
            &observed.pointer_name,
            observed.pointer.as_ref(),
            &stored.key,
        )? {
            CasOutcome::Swapped => {
                info!(
                    address = %node.address,
                    branch,
                    seq = node.seq,
                    key = %stored.key,
                    "node appended"
                );
                Ok(stored.key)
            }
            CasOutcome::Conflict { current } => {
                warn!(
                    address = %node.address,
                    branch,
                    key = %stored.key,
                    ?current,
                    "lost race for branch head"
                );
                Err(DagError::PreviousNodeIsNotHead {
                    previous: node.previous_key().cloned(),
                    head: current.unwrap_or_else(|| branch_root_key.clone()),
                })
            }
        }
    }

    /// Register `address` with the resolver so it accepts writes for it.
    ///
    /// # Errors
    ///
    /// Backend failures, cancellation.
    pub fn manage(&self, ctx: &OpContext, address: &str) -> Result<(), DagError> {
        ctx.check()?;
        self.resolver.manage(ctx, address)?;
        debug!(address, "address managed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch a node by key, without verification.
    ///
    /// # Errors
    ///
    /// [`DagError::NodeNotFound`], [`DagError::CorruptNode`], backend
    /// failures.
    pub fn get(&self, ctx: &OpContext, key: &ContentKey) -> Result<Node, DagError> {
        self.load(ctx, key)?
            .ok_or_else(|| DagError::NodeNotFound(key.clone()))
    }

    /// The root node of `address` and its key.
    ///
    /// # Errors
    ///
    /// [`DagError::NodeNotFound`] when no root is set (carrying the root
    /// pointer name) or the pointer names a missing node; backend failures.
    pub fn get_root(&self, ctx: &OpContext, address: &str) -> Result<(Node, ContentKey), DagError> {
        let pointer_name = root_pointer(address, &self.config.namespace);
        let key = self
            .lookup(ctx, &pointer_name)?
            .ok_or_else(|| DagError::NodeNotFound(ContentKey::new(pointer_name)))?;
        let node = self.get(ctx, &key)?;
        Ok((node, key))
    }

    /// The head of `branch` under `branch_root_key` and its key. A branch
    /// nothing has been appended to yet yields the branch root itself.
    ///
    /// # Errors
    ///
    /// [`DagError::InvalidBranch`] for an empty branch name,
    /// [`DagError::NodeNotFound`] when the branch root is not stored,
    /// [`DagError::HeadNodeNotFound`] when the head pointer names a missing
    /// node; backend failures.
    pub fn get_last(
        &self,
        ctx: &OpContext,
        branch_root_key: &ContentKey,
        branch: &str,
    ) -> Result<(Node, ContentKey), DagError> {
        if let Some(reason) = branch_name_problem(branch) {
            return Err(DagError::InvalidBranch {
                branch: branch.to_owned(),
                reason,
            });
        }
        let root = self.get(ctx, branch_root_key)?;
        let pointer_name = head_pointer(&root.address, &self.config.namespace, branch_root_key, branch);
        let Some(head) = self.lookup(ctx, &pointer_name)? else {
            return Ok((root, branch_root_key.clone()));
        };
        if head == *branch_root_key {
            return Ok((root, head));
        }
        let node = self
            .load(ctx, &head)?
            .ok_or_else(|| DagError::HeadNodeNotFound {
                branch_root: branch_root_key.clone(),
                branch: branch.to_owned(),
                head: head.clone(),
            })?;
        Ok((node, head))
    }

    /// The storage path of the node stored under `key`, encoding its branch
    /// lineage up to the address root.
    ///
    /// # Errors
    ///
    /// [`DagError::NodeNotFound`], [`DagError::BranchRootNotFound`] for a
    /// broken ancestry, [`DagError::BranchDepthExceeded`], backend failures.
    pub fn storage_path(&self, ctx: &OpContext, key: &ContentKey) -> Result<String, DagError> {
        let node = self.get(ctx, key)?;
        self.path_from(ctx, key, &node, self.config.max_branch_depth)
    }

    // -----------------------------------------------------------------------
    // Collaborator access
    // -----------------------------------------------------------------------

    /// Walk branch roots from `node` (stored under `key`) up to the address
    /// root, allowing at most `max_depth` fork levels.
    fn path_from(
        &self,
        ctx: &OpContext,
        key: &ContentKey,
        node: &Node,
        max_depth: usize,
    ) -> Result<String, DagError> {
        let mut lineage: Vec<(String, ContentKey)> = Vec::new();
        let mut current_key = key.clone();
        let mut loaded: Option<Node> = None;

        loop {
            let current = loaded.as_ref().unwrap_or(node);
            let Some(parent) = current.branch_root_key().cloned() else {
                let mut path = root_node_path(&current.address, &self.config.namespace, &current_key);
                for (branch, child) in lineage.iter().rev() {
                    path = branch_node_path(&path, branch, child);
                }
                return Ok(path);
            };
            if lineage.len() >= max_depth {
                return Err(DagError::BranchDepthExceeded {
                    key: key.clone(),
                    limit: self.config.max_branch_depth,
                });
            }
            lineage.push((current.branch.clone(), current_key));
            loaded = Some(
                self.load(ctx, &parent)?
                    .ok_or_else(|| DagError::BranchRootNotFound(parent.clone()))?,
            );
            current_key = parent;
        }
    }

    pub(crate) fn load(&self, ctx: &OpContext, key: &ContentKey) -> Result<Option<Node>, DagError> {
        ctx.check()?;
        match self.store.get(ctx, key) {
            Ok(bytes) => Node::from_json(&bytes)
                .map(Some)
                .map_err(|source| DagError::CorruptNode {
                    key: key.clone(),
                    source,
                }),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn lookup(&self, ctx: &OpContext, name: &str) -> Result<Option<ContentKey>, DagError> {
        ctx.check()?;
        match self.resolver.resolve(ctx, name) {
            Ok(key) => {
                debug!(name, %key, "pointer resolved");
                Ok(Some(key))
            }
            Err(BackendError::NotFound(_)) => {
                debug!(name, "pointer unset");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(
        &self,
        ctx: &OpContext,
        bytes: &[u8],
        path_hint: &dyn Fn(&ContentKey) -> String,
    ) -> Result<Stored, DagError> {
        ctx.check()?;
        let stored = self.store.put(ctx, bytes, Some(path_hint))?;
        debug!(key = %stored.key, path = ?stored.path, "node stored");
        Ok(stored)
    }

    /// Point the head of every branch `node` opens at the node itself.
    fn open_branches(&self, ctx: &OpContext, node: &Node, key: &ContentKey) -> Result<(), DagError> {
        for branch in &node.branches {
            let name = head_pointer(&node.address, &self.config.namespace, key, branch);
            ctx.check()?;
            self.resolver.add(ctx, &name, key)?;
            debug!(name, %key, "sub-branch head registered");
        }
        Ok(())
    }

    fn swap(
        &self,
        ctx: &OpContext,
        name: &str,
        expected: Option<&ContentKey>,
        new: &ContentKey,
    ) -> Result<CasOutcome, DagError> {
        ctx.check()?;
        let outcome = self.resolver.compare_and_swap(ctx, name, expected, new)?;
        debug!(name, ?expected, %new, ?outcome, "pointer compare-and-swap");
        Ok(outcome)
    }
}
