//! Resolver names and storage paths.
//!
//! Every name the engine writes lives under `/<address>/<namespace>/dag`:
//!
//! ```text
//! /<address>/<namespace>/dag/shortcuts/root                         root pointer
//! /<address>/<namespace>/dag/shortcuts/<branchRoot>/<branch>/last   branch head
//! /<address>/<namespace>/dag/<rootKey>                              root node path
//! <branch root path>/branches/<branch>/<key>                        other nodes
//! ```
//!
//! These strings are shared with other implementations and must not change.

use crate::backend::ContentKey;

/// `/<address>/<namespace>/dag`
#[must_use]
pub fn dag_base(address: &str, namespace: &str) -> String {
    format!("/{address}/{namespace}/dag")
}

/// Resolver name of an address's root pointer.
#[must_use]
pub fn root_pointer(address: &str, namespace: &str) -> String {
    format!("{}/shortcuts/root", dag_base(address, namespace))
}

/// Resolver name of the head pointer for `branch` forking from
/// `branch_root`.
#[must_use]
pub fn head_pointer(address: &str, namespace: &str, branch_root: &ContentKey, branch: &str) -> String {
    format!("{}/shortcuts/{branch_root}/{branch}/last", dag_base(address, namespace))
}

/// Storage path of an address root.
#[must_use]
pub fn root_node_path(address: &str, namespace: &str, key: &ContentKey) -> String {
    format!("{}/{key}", dag_base(address, namespace))
}

/// Prefix under which every node of `branch` forking from the node stored at
/// `branch_root_path` is stored.
#[must_use]
pub fn branch_prefix(branch_root_path: &str, branch: &str) -> String {
    format!("{branch_root_path}/branches/{branch}/")
}

/// Storage path of a node of `branch` forking from the node stored at
/// `branch_root_path`.
#[must_use]
pub fn branch_node_path(branch_root_path: &str, branch: &str, key: &ContentKey) -> String {
    format!("{}{key}", branch_prefix(branch_root_path, branch))
}

/// Branch names become path segments, so they must be non-empty and free of
/// separators and control characters. Returns the reason when they are not.
#[must_use]
pub fn branch_name_problem(branch: &str) -> Option<&'static str> {
    if branch.is_empty() {
        Some("branch name is empty")
    } else if branch.contains('/') {
        Some("branch name contains '/'")
    } else if branch.chars().any(char::is_control) {
        Some("branch name contains control characters")
    } else {
        None
    }
}
