//! branchdag-core library.
//!
//! A per-address, branch-structured, signed append-only DAG. Each address
//! owns one DAG: a tree of named branches, each an append-only chain ordered
//! by `seq`, forking from arbitrary nodes. Nodes are signed by their author
//! and stored in a content-addressed [`ContentStore`]; branch heads are
//! mutable pointers kept by a [`NameResolver`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use branchdag_core::{Dag, Keypair, MemoryResolver, MemoryStore, NodeBuilder, OpContext};
//!
//! # fn main() -> Result<(), branchdag_core::DagError> {
//! let dag = Dag::new(Arc::new(MemoryStore::new()), Arc::new(MemoryResolver::new()));
//! let ctx = OpContext::background();
//! let author = Keypair::generate();
//!
//! let root = NodeBuilder::root("main").build(&author)?;
//! let root_key = dag.set_root(&ctx, &root)?;
//!
//! let post = NodeBuilder::next_after(&root, &root_key)
//!     .data(b"hello".to_vec())
//!     .build(&author)?;
//! let post_key = dag.append(&ctx, &post, &root_key)?;
//! assert_eq!(dag.get_last(&ctx, &root_key, "main")?.1, post_key);
//! # Ok(())
//! # }
//! ```
//!
//! # Conventions
//!
//! - **Errors**: [`DagError`] for engine operations, [`BackendError`] for
//!   collaborators; `anyhow::Result` only for configuration loading.
//! - **Logging**: `tracing` macros (`info!` for commits, `warn!` for lost
//!   races, `debug!` for pointer traffic).

pub mod backend;
pub mod config;
pub mod context;
pub mod dag;
pub mod error;
pub mod identity;
pub mod node;
pub mod paths;

pub use backend::{
    BackendError, CasOutcome, ContentKey, ContentStore, FsResolver, FsStore, MemoryResolver,
    MemoryStore, NameResolver, Stored,
};
pub use config::{DagConfig, load_config};
pub use context::OpContext;
pub use dag::{AuditReport, AuditViolation, Dag};
pub use error::{DagError, ErrorCode};
pub use identity::{IdentityError, Keypair};
pub use node::{Node, NodeBuilder};
