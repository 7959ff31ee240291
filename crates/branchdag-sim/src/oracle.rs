use std::collections::BTreeMap;
use std::fmt;

use branchdag_core::{ContentKey, ErrorCode};

use crate::{MAIN_BRANCH, Outcome, SimulationResult};

// ── Core result types ─────────────────────────────────────────────────────────

/// Oracle result for an invariant check.
///
/// Returned by each checker and by [`ChainOracle::check_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A stored node does not point at its predecessor in the chain.
    BrokenLink {
        branch: String,
        key: ContentKey,
        expected: ContentKey,
        found: Option<ContentKey>,
    },

    /// Sequence numbers along a branch are not contiguous.
    SeqGap {
        branch: String,
        key: ContentKey,
        expected: u64,
        found: u64,
    },

    /// A node reachable from one branch's head claims another branch.
    BranchLeak {
        branch: String,
        key: ContentKey,
        found: String,
    },

    /// An append reported as accepted is not on its branch's chain.
    Unreachable { branch: String, key: ContentKey },

    /// The stored chain length differs from the number of accepted appends.
    ChainLength {
        branch: String,
        accepted: usize,
        stored: usize,
    },

    /// An append failed for a reason other than a stale head.
    UnexpectedRejection {
        round: u64,
        writer: usize,
        code: ErrorCode,
        message: String,
    },

    /// A round on one branch produced the wrong number of winners.
    ///
    /// Exactly one writer wins when any writer built on the round's head;
    /// none wins otherwise.
    WinnerCount {
        round: u64,
        branch: String,
        expected: usize,
        winners: usize,
    },

    /// Re-verifying a stored branch found a bad node.
    AuditFailed { branch: String, detail: String },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenLink {
                branch,
                key,
                expected,
                found,
            } => write!(
                f,
                "BrokenLink: {branch}/{key} points at {found:?}, expected {expected}"
            ),
            Self::SeqGap {
                branch,
                key,
                expected,
                found,
            } => write!(f, "SeqGap: {branch}/{key} has seq={found}, expected {expected}"),
            Self::BranchLeak { branch, key, found } => {
                write!(f, "BranchLeak: {key} on {branch} claims branch {found:?}")
            }
            Self::Unreachable { branch, key } => {
                write!(f, "Unreachable: accepted {key} missing from {branch}")
            }
            Self::ChainLength {
                branch,
                accepted,
                stored,
            } => write!(
                f,
                "ChainLength: {branch} stores {stored} nodes but {accepted} were accepted"
            ),
            Self::UnexpectedRejection {
                round,
                writer,
                code,
                message,
            } => {
                write!(
                    f,
                    "UnexpectedRejection: round {round} writer {writer} failed with {code} ({}): {message}",
                    code.message()
                )?;
                if let Some(hint) = code.hint() {
                    write!(f, " [hint: {hint}]")?;
                }
                Ok(())
            }
            Self::WinnerCount {
                round,
                branch,
                expected,
                winners,
            } => write!(
                f,
                "WinnerCount: round {round} on {branch} had {winners} winners, expected {expected}"
            ),
            Self::AuditFailed { branch, detail } => {
                write!(f, "AuditFailed: {branch}: {detail}")
            }
        }
    }
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Invariant checks over a finished [`SimulationResult`].
pub struct ChainOracle;

impl ChainOracle {
    /// Every chain links back to the root with contiguous `seq` and only
    /// carries nodes of its own branch.
    #[must_use]
    pub fn check_linearity(result: &SimulationResult) -> OracleResult {
        let mut violations = Vec::new();
        for (branch, chain) in &result.chains {
            let mut expected_prev = result.root_key.clone();
            let mut expected_seq = if branch == MAIN_BRANCH {
                result.root_seq.saturating_add(1)
            } else {
                1
            };

            for (key, node) in chain {
                if node.previous_key() != Some(&expected_prev) {
                    violations.push(InvariantViolation::BrokenLink {
                        branch: branch.clone(),
                        key: key.clone(),
                        expected: expected_prev.clone(),
                        found: node.previous_key().cloned(),
                    });
                }
                if node.seq != expected_seq {
                    violations.push(InvariantViolation::SeqGap {
                        branch: branch.clone(),
                        key: key.clone(),
                        expected: expected_seq,
                        found: node.seq,
                    });
                }
                if node.branch != *branch {
                    violations.push(InvariantViolation::BranchLeak {
                        branch: branch.clone(),
                        key: key.clone(),
                        found: node.branch.clone(),
                    });
                }
                expected_prev = key.clone();
                expected_seq = node.seq.saturating_add(1);
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Every accepted append is stored on its branch and nothing else is.
    #[must_use]
    pub fn check_reachability(result: &SimulationResult) -> OracleResult {
        let mut violations = Vec::new();
        let mut accepted: BTreeMap<&str, usize> = BTreeMap::new();

        for event in &result.trace {
            let Outcome::Accepted { key, .. } = &event.outcome else {
                continue;
            };
            *accepted.entry(event.branch.as_str()).or_default() += 1;
            let stored = result
                .chains
                .get(&event.branch)
                .is_some_and(|chain| chain.iter().any(|(k, _)| k == key));
            if !stored {
                violations.push(InvariantViolation::Unreachable {
                    branch: event.branch.clone(),
                    key: key.clone(),
                });
            }
        }

        for (branch, chain) in &result.chains {
            let accepted = accepted.get(branch.as_str()).copied().unwrap_or(0);
            if chain.len() != accepted {
                violations.push(InvariantViolation::ChainLength {
                    branch: branch.clone(),
                    accepted,
                    stored: chain.len(),
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    /// The only way to lose is building on a head that has moved.
    #[must_use]
    pub fn check_rejections(result: &SimulationResult) -> OracleResult {
        let violations = result
            .trace
            .iter()
            .filter_map(|event| match &event.outcome {
                Outcome::Rejected { code, message } if *code != ErrorCode::PreviousNodeIsNotHead => {
                    Some(InvariantViolation::UnexpectedRejection {
                        round: event.round,
                        writer: event.writer,
                        code: *code,
                        message: message.clone(),
                    })
                }
                _ => None,
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Per round and branch, one fresh writer wins and everyone else loses.
    #[must_use]
    pub fn check_single_winner(result: &SimulationResult) -> OracleResult {
        let mut rounds: BTreeMap<(u64, &str), (bool, usize)> = BTreeMap::new();
        for event in &result.trace {
            let entry = rounds
                .entry((event.round, event.branch.as_str()))
                .or_default();
            entry.0 |= event.fresh;
            if event.accepted() {
                entry.1 += 1;
            }
        }

        let violations = rounds
            .into_iter()
            .filter_map(|((round, branch), (any_fresh, winners))| {
                let expected = usize::from(any_fresh);
                (winners != expected).then(|| InvariantViolation::WinnerCount {
                    round,
                    branch: branch.to_string(),
                    expected,
                    winners,
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Every branch re-verifies cleanly.
    #[must_use]
    pub fn check_audits(result: &SimulationResult) -> OracleResult {
        let violations = result
            .audits
            .iter()
            .filter_map(|(branch, detail)| {
                detail.as_ref().map(|detail| InvariantViolation::AuditFailed {
                    branch: branch.clone(),
                    detail: detail.clone(),
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Run every check and accumulate the violations.
    #[must_use]
    pub fn check_all(result: &SimulationResult) -> OracleResult {
        Self::check_linearity(result)
            .merge(Self::check_reachability(result))
            .merge(Self::check_rejections(result))
            .merge(Self::check_single_winner(result))
            .merge(Self::check_audits(result))
    }
}

#[cfg(test)]
mod tests {
    use branchdag_core::{Keypair, NodeBuilder};

    use super::*;
    use crate::{SimulationConfig, Simulator, TraceEvent};

    fn run(seed: u64) -> SimulationResult {
        Simulator::new(SimulationConfig {
            seed,
            writers: 3,
            rounds: 8,
            side_branches: 1,
            stale_percent: 25,
        })
        .expect("config")
        .run()
        .expect("run")
    }

    #[test]
    fn honest_run_passes_every_check() {
        let result = run(5);
        let oracle = ChainOracle::check_all(&result);
        assert!(oracle.passed, "{:?}", oracle.violations);
    }

    #[test]
    fn reordered_chain_is_flagged() {
        let mut result = run(6);
        let chain = result
            .chains
            .values_mut()
            .find(|c| c.len() >= 2)
            .expect("some branch has two nodes");
        chain.swap(0, 1);

        let oracle = ChainOracle::check_linearity(&result);
        assert!(!oracle.passed);
        assert!(oracle
            .violations
            .iter()
            .any(|v| matches!(v, InvariantViolation::BrokenLink { .. })));
        assert!(oracle
            .violations
            .iter()
            .any(|v| matches!(v, InvariantViolation::SeqGap { .. })));
    }

    #[test]
    fn leaked_node_is_flagged() {
        let mut result = run(7);
        let author = Keypair::from_secret_bytes(&[72; 32]).expect("valid scalar");
        let intruder = NodeBuilder::fork(&result.root_key, "elsewhere")
            .build(&author)
            .expect("node");
        result
            .chains
            .insert("side-0".into(), vec![(ContentKey::new("x"), intruder)]);

        let oracle = ChainOracle::check_linearity(&result);
        assert!(oracle.violations.iter().any(|v| matches!(
            v,
            InvariantViolation::BranchLeak { found, .. } if found == "elsewhere"
        )));
    }

    #[test]
    fn lost_accepted_append_is_flagged() {
        let mut result = run(8);
        result.trace.push(TraceEvent {
            round: 99,
            writer: 0,
            branch: MAIN_BRANCH.into(),
            fresh: true,
            outcome: Outcome::Accepted {
                key: ContentKey::new("phantom"),
                seq: 99,
            },
        });

        let oracle = ChainOracle::check_reachability(&result);
        assert!(oracle.violations.contains(&InvariantViolation::Unreachable {
            branch: MAIN_BRANCH.into(),
            key: ContentKey::new("phantom"),
        }));
        assert!(oracle
            .violations
            .iter()
            .any(|v| matches!(v, InvariantViolation::ChainLength { .. })));
        assert!(ChainOracle::check_single_winner(&result).passed);
    }

    #[test]
    fn unexpected_rejection_and_double_winner_are_flagged() {
        let mut result = run(9);
        result.trace.push(TraceEvent {
            round: 100,
            writer: 1,
            branch: MAIN_BRANCH.into(),
            fresh: true,
            outcome: Outcome::Rejected {
                code: ErrorCode::InvalidBranchSeq,
                message: "bad seq".into(),
            },
        });
        for writer in 0..2 {
            result.trace.push(TraceEvent {
                round: 101,
                writer,
                branch: MAIN_BRANCH.into(),
                fresh: true,
                outcome: Outcome::Accepted {
                    key: ContentKey::new(format!("w{writer}")),
                    seq: 50,
                },
            });
        }

        let rejections = ChainOracle::check_rejections(&result);
        assert_eq!(rejections.violations.len(), 1);
        assert_eq!(
            rejections.violations[0].to_string(),
            "UnexpectedRejection: round 100 writer 1 failed with E2002 \
             (Invalid branch sequence number): bad seq [hint: Use seq 1 for the first \
             node of a forked branch, previous.seq + 1 otherwise.]"
        );
        let winners = ChainOracle::check_single_winner(&result);
        assert!(winners.violations.contains(&InvariantViolation::WinnerCount {
            round: 100,
            branch: MAIN_BRANCH.into(),
            expected: 1,
            winners: 0,
        }));
        assert!(winners.violations.contains(&InvariantViolation::WinnerCount {
            round: 101,
            branch: MAIN_BRANCH.into(),
            expected: 1,
            winners: 2,
        }));
    }

    #[test]
    fn failed_audit_is_reported() {
        let mut result = run(10);
        result
            .audits
            .insert(MAIN_BRANCH.into(), Some("k: signature does not match".into()));
        let oracle = ChainOracle::check_all(&result);
        assert!(!oracle.passed);
        assert_eq!(
            oracle.violations[0].to_string(),
            "AuditFailed: main: k: signature does not match"
        );
    }
}
