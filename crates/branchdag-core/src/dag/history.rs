//! Walking and auditing a branch chain.
//!
//! Both walks start at the branch head and follow `previous` links back to
//! the branch root. Auditing re-checks every stored node the way the
//! verification pipeline checked it at append time, which catches blobs
//! altered behind the engine's back.

use tracing::{debug, warn};

use super::Dag;
use crate::backend::ContentKey;
use crate::context::OpContext;
use crate::error::DagError;
use crate::node::Node;

/// First node of a branch that fails re-verification.
#[derive(Debug)]
pub struct AuditViolation {
    pub key: ContentKey,
    pub error: DagError,
}

/// Outcome of [`Dag::audit_branch`].
#[derive(Debug)]
pub struct AuditReport {
    pub branch_root: ContentKey,
    pub branch: String,
    /// Nodes examined, including the violating one.
    pub checked: usize,
    pub violation: Option<AuditViolation>,
}

impl AuditReport {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.violation.is_none()
    }
}

impl Dag {
    /// Up to `limit` nodes of `branch` under `branch_root_key`, newest first.
    /// The branch root itself is not included.
    ///
    /// # Errors
    ///
    /// Same as [`Dag::get_last`], plus [`DagError::PreviousNodeNotFound`]
    /// for a broken chain.
    pub fn history(
        &self,
        ctx: &OpContext,
        branch_root_key: &ContentKey,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<(ContentKey, Node)>, DagError> {
        let (mut node, mut key) = self.get_last(ctx, branch_root_key, branch)?;
        let mut chain = Vec::new();

        while key != *branch_root_key && chain.len() < limit {
            let previous = node.previous_key().cloned();
            chain.push((key, node));
            let Some(previous) = previous else {
                break;
            };
            if chain.len() == limit {
                break;
            }
            node = self
                .load(ctx, &previous)?
                .ok_or_else(|| DagError::PreviousNodeNotFound(previous.clone()))?;
            key = previous;
        }

        debug!(%branch_root_key, branch, len = chain.len(), "branch history read");
        Ok(chain)
    }

    /// Re-verify every node of `branch` under `branch_root_key`, oldest
    /// first, stopping at the first violation: bad address binding,
    /// timestamp or signature, a node from another branch, address or fork
    /// point, a broken `previous` link, or a seq gap.
    ///
    /// # Errors
    ///
    /// Read failures only. Rule violations are reported in the
    /// [`AuditReport`].
    pub fn audit_branch(
        &self,
        ctx: &OpContext,
        branch_root_key: &ContentKey,
        branch: &str,
    ) -> Result<AuditReport, DagError> {
        let root = self.get(ctx, branch_root_key)?;
        let mut chain = self.history(ctx, branch_root_key, branch, usize::MAX)?;
        chain.reverse();

        let mut report = AuditReport {
            branch_root: branch_root_key.clone(),
            branch: branch.to_owned(),
            checked: 0,
            violation: None,
        };
        let mut expected_previous = branch_root_key.clone();
        let mut expected_seq = if branch == root.branch {
            root.seq.saturating_add(1)
        } else {
            1
        };

        for (key, node) in chain {
            report.checked += 1;
            let checked = audit_node(&node, &root, branch_root_key, branch, &expected_previous, expected_seq);
            if let Err(error) = checked {
                warn!(%key, %error, branch, "branch audit found a violation");
                report.violation = Some(AuditViolation { key, error });
                break;
            }
            expected_seq = node.seq.saturating_add(1);
            expected_previous = key;
        }
        Ok(report)
    }
}

fn audit_node(
    node: &Node,
    root: &Node,
    root_key: &ContentKey,
    branch: &str,
    expected_previous: &ContentKey,
    expected_seq: u64,
) -> Result<(), DagError> {
    node.verify_address()?;
    node.parsed_timestamp()?;
    node.verify_signature()?;

    let invalid = |reason| DagError::InvalidBranch {
        branch: node.branch.clone(),
        reason,
    };
    if node.branch != branch {
        return Err(invalid("node belongs to another branch"));
    }
    if node.address != root.address {
        return Err(invalid("node belongs to another address"));
    }
    if node.branch_root_key() != Some(root_key) {
        return Err(invalid("node names another branch root"));
    }
    if node.previous_key() != Some(expected_previous) {
        return Err(DagError::PreviousNodeIsNotHead {
            previous: node.previous_key().cloned(),
            head: expected_previous.clone(),
        });
    }
    if node.seq != expected_seq {
        return Err(DagError::InvalidBranchSeq {
            branch: node.branch.clone(),
            seq: node.seq,
            reason: format!("expected seq {expected_seq}"),
        });
    }
    Ok(())
}
