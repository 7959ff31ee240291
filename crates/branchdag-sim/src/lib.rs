//! branchdag-sim library.
//!
//! Deterministic race simulation for branch head pointers. Each round every
//! writer picks a branch, prepares a signed node against the head it
//! observed, and the prepared appends are committed in a seeded random
//! order. The [`oracle`] then checks the resulting chains.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod campaign;
pub mod oracle;
pub mod writer;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use branchdag_core::{
    ContentKey, Dag, ErrorCode, Keypair, MemoryResolver, MemoryStore, Node, NodeBuilder,
    OpContext,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::writer::{PreparedAppend, SimulatedWriter, WriterId, logical_timestamp};

/// Branch every simulated DAG is rooted on.
pub const MAIN_BRANCH: &str = "main";

/// Simulation parameters for one seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Concurrent writers, all signing as the DAG owner.
    pub writers: usize,
    pub rounds: u64,
    /// Branches opened by the root besides `main`.
    pub side_branches: usize,
    /// Chance (percent, 0–100) that a writer skips its read and builds on
    /// the head it observed in an earlier round.
    pub stale_percent: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            writers: 4,
            rounds: 24,
            side_branches: 2,
            stale_percent: 15,
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.writers == 0 {
            bail!("writers must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.stale_percent > 100 {
            bail!("stale_percent must be <= 100");
        }
        Ok(())
    }

    /// `main` followed by the side branches, in a stable order.
    #[must_use]
    pub fn branch_names(&self) -> Vec<String> {
        std::iter::once(MAIN_BRANCH.to_string())
            .chain((0..self.side_branches).map(|i| format!("side-{i}")))
            .collect()
    }
}

/// How a committed append ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted { key: ContentKey, seq: u64 },
    Rejected { code: ErrorCode, message: String },
}

/// One commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub round: u64,
    pub writer: WriterId,
    pub branch: String,
    /// The node was built on the head the branch had when the round began.
    pub fresh: bool,
    pub outcome: Outcome,
}

impl TraceEvent {
    #[must_use]
    pub const fn accepted(&self) -> bool {
        matches!(self.outcome, Outcome::Accepted { .. })
    }
}

/// Everything the oracle needs about a finished run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub seed: u64,
    /// Owner of the simulated DAG.
    pub address: String,
    pub root_key: ContentKey,
    /// Sequence of the root, so chain checks know where `main` starts.
    pub root_seq: u64,
    pub trace: Vec<TraceEvent>,
    /// Every branch's stored chain, oldest first, root excluded.
    pub chains: BTreeMap<String, Vec<(ContentKey, Node)>>,
    /// Audit outcome per branch: `None` when clean.
    pub audits: BTreeMap<String, Option<String>>,
}

impl SimulationResult {
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.trace.iter().filter(|e| e.accepted()).count()
    }

    #[must_use]
    pub fn rejected(&self) -> usize {
        self.trace.len() - self.accepted()
    }
}

/// Runs one seeded simulation against an in-memory store and resolver.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: StdRng,
    dag: Dag,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        let dag = Dag::new(Arc::new(MemoryStore::new()), Arc::new(MemoryResolver::new()));
        Ok(Self { config, rng, dag })
    }

    /// The engine under test, for inspection after [`Simulator::run`].
    #[must_use]
    pub const fn dag(&self) -> &Dag {
        &self.dag
    }

    /// # Errors
    ///
    /// Returns an error when the engine fails outside of the append race
    /// (root creation, head reads, history and audit walks).
    pub fn run(&mut self) -> Result<SimulationResult> {
        let ctx = OpContext::background();
        let author = self.author()?;
        let branches = self.config.branch_names();

        let root = branches
            .iter()
            .fold(NodeBuilder::root(MAIN_BRANCH), |b, name| b.open(name.clone()))
            .timestamp(logical_timestamp(0, 0))
            .build(&author)
            .context("building root")?;
        let root_key = self.dag.set_root(&ctx, &root).context("set_root")?;

        let mut writers: Vec<SimulatedWriter> = (0..self.config.writers)
            .map(|id| SimulatedWriter::new(id, author.clone()))
            .collect();
        let mut trace = Vec::new();

        for round in 1..=self.config.rounds {
            let mut heads = BTreeMap::new();
            for branch in &branches {
                let (_, key) = self.dag.get_last(&ctx, &root_key, branch)?;
                heads.insert(branch.clone(), key);
            }

            let mut prepared: Vec<PreparedAppend> = Vec::with_capacity(writers.len());
            for writer in &mut writers {
                let branch = &branches[self.rng.gen_range(0..branches.len())];
                let stale = self.rng.gen_range(0..100_u8) < self.config.stale_percent;
                prepared.push(writer.prepare(&self.dag, &ctx, &root_key, branch, round, stale)?);
            }
            prepared.shuffle(&mut self.rng);

            for p in prepared {
                let fresh = heads.get(&p.branch) == Some(&p.head);
                let outcome = match self.dag.append(&ctx, &p.node, &root_key) {
                    Ok(key) => Outcome::Accepted {
                        key,
                        seq: p.node.seq,
                    },
                    Err(e) => Outcome::Rejected {
                        code: e.code(),
                        message: e.to_string(),
                    },
                };
                debug!(round, writer = p.writer, branch = %p.branch, fresh, ?outcome, "commit attempt");
                trace.push(TraceEvent {
                    round,
                    writer: p.writer,
                    branch: p.branch,
                    fresh,
                    outcome,
                });
            }
        }

        let mut chains = BTreeMap::new();
        let mut audits = BTreeMap::new();
        for branch in &branches {
            let mut chain = self.dag.history(&ctx, &root_key, branch, usize::MAX)?;
            chain.reverse();
            chains.insert(branch.clone(), chain);

            let report = self.dag.audit_branch(&ctx, &root_key, branch)?;
            audits.insert(
                branch.clone(),
                report.violation.map(|v| format!("{}: {}", v.key, v.error)),
            );
        }

        let result = SimulationResult {
            seed: self.config.seed,
            address: author.address().to_string(),
            root_key,
            root_seq: root.seq,
            trace,
            chains,
            audits,
        };
        info!(
            seed = result.seed,
            accepted = result.accepted(),
            rejected = result.rejected(),
            "simulation complete"
        );
        Ok(result)
    }

    /// Owner key derived from the seed.
    fn author(&mut self) -> Result<Keypair> {
        let mut secret = [0_u8; 32];
        self.rng.fill_bytes(&mut secret);
        Keypair::from_secret_bytes(&secret).context("deriving simulation key")
    }
}
