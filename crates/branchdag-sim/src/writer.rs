use std::collections::BTreeMap;

use branchdag_core::{ContentKey, Dag, DagError, Keypair, Node, NodeBuilder, OpContext};
use chrono::{DateTime, SecondsFormat};

/// Stable identifier for a simulated writer.
pub type WriterId = usize;

/// 2024-01-01T00:00:00Z. Node timestamps are derived from it so a replayed
/// seed produces byte-identical nodes.
const SIM_EPOCH_SECS: i64 = 1_704_067_200;

/// A signed node built on a head the writer observed, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAppend {
    pub writer: WriterId,
    pub branch: String,
    /// Head the node was built on.
    pub head: ContentKey,
    pub node: Node,
}

/// One writer process. All writers sign as the DAG owner; they differ only
/// in which head they last observed.
#[derive(Debug, Clone)]
pub struct SimulatedWriter {
    id: WriterId,
    author: Keypair,
    observed: BTreeMap<String, (Node, ContentKey)>,
}

impl SimulatedWriter {
    #[must_use]
    pub const fn new(id: WriterId, author: Keypair) -> Self {
        Self {
            id,
            author,
            observed: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> WriterId {
        self.id
    }

    /// Read the current head of `branch` and remember it.
    ///
    /// # Errors
    ///
    /// Propagates [`Dag::get_last`] failures.
    pub fn observe(
        &mut self,
        dag: &Dag,
        ctx: &OpContext,
        root_key: &ContentKey,
        branch: &str,
    ) -> Result<(Node, ContentKey), DagError> {
        let head = dag.get_last(ctx, root_key, branch)?;
        self.observed.insert(branch.to_string(), head.clone());
        Ok(head)
    }

    /// Build the next node for `branch`.
    ///
    /// With `reuse_observed` the writer skips the read and builds on the head
    /// it saw last time, which may have moved since.
    ///
    /// # Errors
    ///
    /// Propagates read and signing failures.
    pub fn prepare(
        &mut self,
        dag: &Dag,
        ctx: &OpContext,
        root_key: &ContentKey,
        branch: &str,
        round: u64,
        reuse_observed: bool,
    ) -> Result<PreparedAppend, DagError> {
        let (head, head_key) = match self.observed.get(branch) {
            Some(seen) if reuse_observed => seen.clone(),
            _ => self.observe(dag, ctx, root_key, branch)?,
        };

        let builder = if head_key == *root_key && head.branch != branch {
            NodeBuilder::fork(root_key, branch)
        } else {
            NodeBuilder::next_after(&head, &head_key)
        };
        let node = builder
            .property("writer", self.id.to_string())
            .property("round", round.to_string())
            .timestamp(logical_timestamp(round, self.id))
            .build(&self.author)?;

        Ok(PreparedAppend {
            writer: self.id,
            branch: branch.to_string(),
            head: head_key,
            node,
        })
    }
}

/// RFC 3339 timestamp for `writer` in `round`: one second per round, one
/// millisecond per writer.
#[must_use]
pub fn logical_timestamp(round: u64, writer: WriterId) -> String {
    let secs = i64::try_from(round).map_or(i64::MAX, |r| SIM_EPOCH_SECS.saturating_add(r));
    let millis = u32::try_from(writer % 1000).unwrap_or(0);
    DateTime::from_timestamp(secs, millis * 1_000_000)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
