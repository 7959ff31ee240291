use std::fmt;

use crate::backend::{BackendError, ContentKey};
use crate::identity::IdentityError;

/// Machine-readable error codes for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidChecksum,
    AddressDoesNotMatchPubKey,
    InvalidNodeTimestamp,
    InvalidBranchSeq,
    InvalidBranch,
    DefaultBranchNotSpecified,
    NodeSignatureDoesNotMatch,
    UnableToDecodeSignature,
    UnableToDecodePubKey,
    NodeNotFound,
    PreviousNodeNotFound,
    HeadNodeNotFound,
    PreviousNodeIsNotHead,
    BranchRootNotFound,
    DagAlreadyInitialized,
    BranchDepthExceeded,
    CorruptNode,
    EncodeFailed,
    BackendUnavailable,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidChecksum => "E1001",
            Self::AddressDoesNotMatchPubKey => "E1002",
            Self::UnableToDecodePubKey => "E1003",
            Self::UnableToDecodeSignature => "E1004",
            Self::NodeSignatureDoesNotMatch => "E1005",
            Self::InvalidNodeTimestamp => "E2001",
            Self::InvalidBranchSeq => "E2002",
            Self::InvalidBranch => "E2003",
            Self::DefaultBranchNotSpecified => "E2004",
            Self::BranchDepthExceeded => "E2005",
            Self::NodeNotFound => "E3001",
            Self::PreviousNodeNotFound => "E3002",
            Self::HeadNodeNotFound => "E3003",
            Self::BranchRootNotFound => "E3004",
            Self::CorruptNode => "E3005",
            Self::PreviousNodeIsNotHead => "E4001",
            Self::DagAlreadyInitialized => "E4002",
            Self::EncodeFailed => "E5001",
            Self::BackendUnavailable => "E5002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidChecksum => "Address checksum is invalid",
            Self::AddressDoesNotMatchPubKey => "Address does not match public key",
            Self::InvalidNodeTimestamp => "Node timestamp is not RFC3339",
            Self::InvalidBranchSeq => "Invalid branch sequence number",
            Self::InvalidBranch => "Invalid branch",
            Self::DefaultBranchNotSpecified => "Root node has no default branch",
            Self::NodeSignatureDoesNotMatch => "Node signature does not match",
            Self::UnableToDecodeSignature => "Unable to decode signature",
            Self::UnableToDecodePubKey => "Unable to decode public key",
            Self::NodeNotFound => "Node not found",
            Self::PreviousNodeNotFound => "Previous node not found",
            Self::HeadNodeNotFound => "Branch head node not found",
            Self::PreviousNodeIsNotHead => "Previous node is not the branch head",
            Self::BranchRootNotFound => "Branch root not found",
            Self::DagAlreadyInitialized => "DAG already initialized",
            Self::BranchDepthExceeded => "Branch ancestry too deep",
            Self::CorruptNode => "Stored node is corrupt",
            Self::EncodeFailed => "Node encoding failed",
            Self::BackendUnavailable => "Storage or resolver backend failed",
        }
    }

    /// Optional remediation hint for callers and operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::PreviousNodeIsNotHead => {
                Some("Re-read the branch head with get_last, rebuild the node on top of it and retry.")
            }
            Self::DefaultBranchNotSpecified | Self::InvalidBranch => {
                Some("A root must list its own branch in `branches`; appends need an opened branch.")
            }
            Self::InvalidBranchSeq => {
                Some("Use seq 1 for the first node of a forked branch, previous.seq + 1 otherwise.")
            }
            Self::DagAlreadyInitialized => Some("Use get_root to fetch the existing root."),
            Self::BackendUnavailable => Some("Transient backend failure; retrying is safe."),
            Self::CorruptNode => Some("The content store returned bytes that are not a node."),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors returned by every DAG engine operation.
///
/// Semantic variants describe a caller error or a lost optimistic-concurrency
/// race. [`DagError::Backend`] wraps collaborator failures and is the only
/// variant worth retrying blindly.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("address {address:?} fails its checksum")]
    InvalidChecksum { address: String },

    #[error("address {address:?} does not match the node's public key")]
    AddressDoesNotMatchPubKey { address: String },

    #[error("invalid node timestamp {timestamp:?}: {reason}")]
    InvalidNodeTimestamp { timestamp: String, reason: String },

    #[error("invalid seq {seq} on branch {branch:?}: {reason}")]
    InvalidBranchSeq {
        branch: String,
        seq: u64,
        reason: String,
    },

    #[error("invalid branch {branch:?}: {reason}")]
    InvalidBranch { branch: String, reason: &'static str },

    #[error("root node does not specify a default branch")]
    DefaultBranchNotSpecified,

    #[error("node signature does not match its public key")]
    NodeSignatureDoesNotMatch,

    #[error("unable to decode signature: {0}")]
    UnableToDecodeSignature(String),

    #[error("unable to decode public key: {0}")]
    UnableToDecodePubKey(String),

    #[error("node {0} not found")]
    NodeNotFound(ContentKey),

    #[error("previous node {0} not found")]
    PreviousNodeNotFound(ContentKey),

    #[error("head {head} of branch {branch:?} under {branch_root} not found")]
    HeadNodeNotFound {
        branch_root: ContentKey,
        branch: String,
        head: ContentKey,
    },

    #[error("previous node {previous:?} is not the current head {head}")]
    PreviousNodeIsNotHead {
        previous: Option<ContentKey>,
        head: ContentKey,
    },

    #[error("branch root {0} not found")]
    BranchRootNotFound(ContentKey),

    #[error("dag for {address} is already initialized")]
    DagAlreadyInitialized { address: String },

    #[error("branch ancestry of {key} exceeds {limit} levels")]
    BranchDepthExceeded { key: ContentKey, limit: usize },

    #[error("stored node {key} does not decode: {source}")]
    CorruptNode {
        key: ContentKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode node: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl DagError {
    /// Return the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidChecksum { .. } => ErrorCode::InvalidChecksum,
            Self::AddressDoesNotMatchPubKey { .. } => ErrorCode::AddressDoesNotMatchPubKey,
            Self::InvalidNodeTimestamp { .. } => ErrorCode::InvalidNodeTimestamp,
            Self::InvalidBranchSeq { .. } => ErrorCode::InvalidBranchSeq,
            Self::InvalidBranch { .. } => ErrorCode::InvalidBranch,
            Self::DefaultBranchNotSpecified => ErrorCode::DefaultBranchNotSpecified,
            Self::NodeSignatureDoesNotMatch => ErrorCode::NodeSignatureDoesNotMatch,
            Self::UnableToDecodeSignature(_) => ErrorCode::UnableToDecodeSignature,
            Self::UnableToDecodePubKey(_) => ErrorCode::UnableToDecodePubKey,
            Self::NodeNotFound(_) => ErrorCode::NodeNotFound,
            Self::PreviousNodeNotFound(_) => ErrorCode::PreviousNodeNotFound,
            Self::HeadNodeNotFound { .. } => ErrorCode::HeadNodeNotFound,
            Self::PreviousNodeIsNotHead { .. } => ErrorCode::PreviousNodeIsNotHead,
            Self::BranchRootNotFound(_) => ErrorCode::BranchRootNotFound,
            Self::DagAlreadyInitialized { .. } => ErrorCode::DagAlreadyInitialized,
            Self::BranchDepthExceeded { .. } => ErrorCode::BranchDepthExceeded,
            Self::CorruptNode { .. } => ErrorCode::CorruptNode,
            Self::Encode(_) => ErrorCode::EncodeFailed,
            Self::Backend(_) => ErrorCode::BackendUnavailable,
        }
    }

    /// True when the failure came from a collaborator rather than from the
    /// DAG rules.
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// True when re-reading state and retrying may succeed: a lost head race
    /// or a transient backend failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PreviousNodeIsNotHead { .. } => true,
            Self::Backend(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<IdentityError> for DagError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidChecksum { address } => Self::InvalidChecksum { address },
            IdentityError::AddressMismatch { address } => {
                Self::AddressDoesNotMatchPubKey { address }
            }
            IdentityError::InvalidPubKey(reason) => Self::UnableToDecodePubKey(reason),
            IdentityError::InvalidSignature(reason) => Self::UnableToDecodeSignature(reason),
            IdentityError::SignatureMismatch => Self::NodeSignatureDoesNotMatch,
        }
    }
}
