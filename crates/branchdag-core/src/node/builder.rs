use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};

use super::Node;
use crate::backend::ContentKey;
use crate::error::DagError;
use crate::identity::Keypair;

/// Fluent constructor for signed nodes.
///
/// `address`, `pubkey` and (unless set explicitly) `timestamp` are filled in
/// from the key pair and the clock when [`NodeBuilder::build`] signs.
#[derive(Debug, Clone, Default)]
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    /// An empty builder. Every field has to be set by hand.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An address root on `branch`: seq 1, opening its own branch.
    #[must_use]
    pub fn root(branch: impl Into<String>) -> Self {
        let branch = branch.into();
        Self::new().seq(1).branch(branch.clone()).open(branch)
    }

    /// The next node on the same branch as `prev`, which is stored under
    /// `prev_key`.
    #[must_use]
    pub fn next_after(prev: &Node, prev_key: &ContentKey) -> Self {
        let branch_root = prev
            .branch_root_key()
            .cloned()
            .unwrap_or_else(|| prev_key.clone());
        Self::new()
            .seq(prev.seq.saturating_add(1))
            .previous(prev_key.clone())
            .branch(prev.branch.clone())
            .branch_root(branch_root)
    }

    /// The first node of `branch` forking from the node stored under
    /// `root_key`.
    #[must_use]
    pub fn fork(root_key: &ContentKey, branch: impl Into<String>) -> Self {
        Self::new()
            .seq(1)
            .previous(root_key.clone())
            .branch(branch)
            .branch_root(root_key.clone())
    }

    #[must_use]
    pub const fn seq(mut self, seq: u64) -> Self {
        self.node.seq = seq;
        self
    }

    #[must_use]
    pub fn previous(mut self, key: ContentKey) -> Self {
        self.node.previous = Some(key);
        self
    }

    #[must_use]
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.node.branch = branch.into();
        self
    }

    #[must_use]
    pub fn branch_root(mut self, key: ContentKey) -> Self {
        self.node.branch_root = Some(key);
        self
    }

    /// Declare a sub-branch this node opens. Duplicates are ignored.
    #[must_use]
    pub fn open(mut self, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        if !self.node.opens(&branch) {
            self.node.branches.push(branch);
        }
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.node.properties = properties;
        self
    }

    #[must_use]
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.node.data = data;
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.node.timestamp = timestamp.into();
        self
    }

    /// Stamp the author identity and sign.
    ///
    /// # Errors
    ///
    /// [`DagError::Encode`] if the node cannot be serialized for signing.
    pub fn build(self, keypair: &Keypair) -> Result<Node, DagError> {
        let mut node = self.node;
        keypair.address().clone_into(&mut node.address);
        node.pubkey = keypair.public_key_hex();
        if node.timestamp.is_empty() {
            node.timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        }
        node.sign(keypair)?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> Keypair {
        Keypair::from_secret_bytes(&[21; 32]).expect("valid scalar")
    }

    #[test]
    fn root_opens_its_own_branch() {
        let node = NodeBuilder::root("main").build(&keypair()).expect("build");
        assert_eq!(node.seq, 1);
        assert_eq!(node.branches, vec!["main".to_string()]);
        assert!(node.is_address_root());
    }

    #[test]
    fn build_stamps_identity_and_clock() {
        let kp = keypair();
        let node = NodeBuilder::root("main").build(&kp).expect("build");
        assert_eq!(node.address, kp.address());
        assert_eq!(node.pubkey, kp.public_key_hex());
        node.parsed_timestamp().expect("clock timestamp parses");
        node.verify_signature().expect("signed");
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let node = NodeBuilder::root("main")
            .timestamp("2026-01-02T03:04:05+02:00")
            .build(&keypair())
            .expect("build");
        assert_eq!(node.timestamp, "2026-01-02T03:04:05+02:00");
    }

    #[test]
    fn open_deduplicates_in_declaration_order() {
        let node = NodeBuilder::root("main")
            .open("likes")
            .open("main")
            .open("comments")
            .open("likes")
            .build(&keypair())
            .expect("build");
        assert_eq!(node.branches, vec!["main", "likes", "comments"]);
    }

    #[test]
    fn next_after_root_uses_root_as_branch_root() {
        let kp = keypair();
        let root = NodeBuilder::root("main").build(&kp).expect("root");
        let root_key = ContentKey::new("rootkey");
        let next = NodeBuilder::next_after(&root, &root_key).build(&kp).expect("next");
        assert_eq!(next.seq, 2);
        assert_eq!(next.previous_key(), Some(&root_key));
        assert_eq!(next.branch_root_key(), Some(&root_key));
        assert_eq!(next.branch, "main");

        let next_key = ContentKey::new("nextkey");
        let third = NodeBuilder::next_after(&next, &next_key).build(&kp).expect("third");
        assert_eq!(third.seq, 3);
        assert_eq!(third.branch_root_key(), Some(&root_key));
    }

    #[test]
    fn fork_restarts_seq() {
        let key = ContentKey::new("forkpoint");
        let node = NodeBuilder::fork(&key, "likes").build(&keypair()).expect("fork");
        assert_eq!(node.seq, 1);
        assert_eq!(node.previous_key(), Some(&key));
        assert_eq!(node.branch_root_key(), Some(&key));
        assert_eq!(node.branch, "likes");
    }
}
