//! The ordered node verification pipeline.
//!
//! Checks run in a fixed order and the first failure wins, so a given node
//! always produces the same error:
//!
//! 1. address checksum and address/public-key binding
//! 2. RFC3339 timestamp
//! 3. non-zero seq
//! 4. signature
//! 5. branch names
//! 6. previous node is stored
//! 7. (new nodes only) branch root, open branch, head, optimistic head
//!    check, seq rules
//!
//! Each step only touches the store or resolver when it needs to.

use tracing::debug;

use super::Dag;
use crate::backend::ContentKey;
use crate::context::OpContext;
use crate::error::DagError;
use crate::node::Node;
use crate::paths::{branch_name_problem, head_pointer};

/// What step 7 observed, needed to commit an append.
#[derive(Debug)]
pub(super) struct HeadObservation {
    /// The branch root node.
    pub root: Node,
    /// Head pointer value when verification ran; `None` when it was unset
    /// and the head fell back to the branch root.
    pub pointer: Option<ContentKey>,
    /// Resolver name of the head pointer.
    pub pointer_name: String,
}

impl Dag {
    /// Run the verification pipeline on `node`.
    ///
    /// With `must_be_new` the node is also checked as the next append to
    /// `branch_root_key`: it must extend the current head of its branch.
    ///
    /// # Errors
    ///
    /// The first violated rule, or a backend failure.
    pub fn verify_node(
        &self,
        ctx: &OpContext,
        node: &Node,
        branch_root_key: Option<&ContentKey>,
        must_be_new: bool,
    ) -> Result<(), DagError> {
        let previous = self.verify_content(ctx, node)?;
        if must_be_new {
            self.verify_head(ctx, node, branch_root_key, previous.as_ref())?;
        }
        Ok(())
    }

    /// Steps 1 to 6. Returns the previous node when there is one.
    pub(super) fn verify_content(&self, ctx: &OpContext, node: &Node) -> Result<Option<Node>, DagError> {
        node.verify_address()?;
        node.parsed_timestamp()?;

        if node.seq == 0 {
            return Err(DagError::InvalidBranchSeq {
                branch: node.branch.clone(),
                seq: 0,
                reason: "seq must be non-zero".into(),
            });
        }

        node.verify_signature()?;

        for branch in std::iter::once(&node.branch).chain(&node.branches) {
            if let Some(reason) = branch_name_problem(branch) {
                return Err(DagError::InvalidBranch {
                    branch: branch.clone(),
                    reason,
                });
            }
        }

        match node.previous_key() {
            Some(key) => self
                .load(ctx, key)?
                .map(Some)
                .ok_or_else(|| DagError::PreviousNodeNotFound(key.clone())),
            None => Ok(None),
        }
    }

    /// Step 7: the node must be the next append to its branch.
    pub(super) fn verify_head(
        &self,
        ctx: &OpContext,
        node: &Node,
        branch_root_key: Option<&ContentKey>,
        previous: Option<&Node>,
    ) -> Result<HeadObservation, DagError> {
        let Some(root_key) = branch_root_key.filter(|k| !k.is_empty()) else {
            return Err(DagError::BranchRootNotFound(ContentKey::new("")));
        };
        let root = self
            .load(ctx, root_key)?
            .ok_or_else(|| DagError::BranchRootNotFound(root_key.clone()))?;

        let invalid = |reason| DagError::InvalidBranch {
            branch: node.branch.clone(),
            reason,
        };
        if root.address != node.address {
            return Err(invalid("branch root belongs to another address"));
        }
        if node.branch_root_key() != Some(root_key) {
            return Err(invalid("branch_root does not name the branch root appended to"));
        }

        let pointer_name = head_pointer(&node.address, &self.config.namespace, root_key, &node.branch);
        let pointer = self.lookup(ctx, &pointer_name)?;

        // Open when the branch root declares it, an earlier append already
        // started it, or the node opens its own branch at the fork point.
        if !(root.opens(&node.branch) || pointer.is_some() || node.opens(&node.branch)) {
            return Err(invalid("branch is not open under its branch root"));
        }

        let head = pointer.clone().unwrap_or_else(|| root_key.clone());
        let extends_head = node.previous_key() == Some(&head);
        // A previous node equal to the head was already loaded in step 6.
        if pointer.is_some() && !extends_head && self.load(ctx, &head)?.is_none() {
            return Err(DagError::HeadNodeNotFound {
                branch_root: root_key.clone(),
                branch: node.branch.clone(),
                head,
            });
        }

        let (true, Some(prev)) = (extends_head, previous) else {
            debug!(
                branch = %node.branch,
                %head,
                previous = ?node.previous_key(),
                "node does not extend branch head"
            );
            return Err(DagError::PreviousNodeIsNotHead {
                previous: node.previous_key().cloned(),
                head,
            });
        };

        let bad_seq = |reason: String| DagError::InvalidBranchSeq {
            branch: node.branch.clone(),
            seq: node.seq,
            reason,
        };
        if head == *root_key && node.branch != root.branch {
            if node.seq != 1 {
                return Err(bad_seq("first node of a forked branch must have seq 1".into()));
            }
        } else if node.branch == prev.branch && prev.seq.checked_add(1) != Some(node.seq) {
            return Err(bad_seq(format!("expected seq {} after previous node", prev.seq.saturating_add(1))));
        }

        Ok(HeadObservation {
            root,
            pointer,
            pointer_name,
        })
    }
}
