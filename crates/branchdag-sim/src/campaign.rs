//! Campaign runner for deterministic simulation campaigns.
//!
//! Executes many seeds with the same parameters, collecting pass/fail
//! results and identifying the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::oracle::{ChainOracle, InvariantViolation, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Campaign-level configuration controlling how many seeds to run and
/// what simulation parameters to use for each seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g., `0..100`.
    pub seed_range: Range<u64>,
    pub writers: usize,
    pub rounds: u64,
    pub side_branches: usize,
    /// Stale-read probability (percent, 0–100).
    pub stale_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            writers: sim.writers,
            rounds: sim.rounds,
            side_branches: sim.side_branches,
            stale_percent: sim.stale_percent,
        }
    }
}

impl CampaignConfig {
    /// Build a [`SimulationConfig`] for a specific seed.
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            writers: self.writers,
            rounds: self.rounds,
            side_branches: self.side_branches,
            stale_percent: self.stale_percent,
        }
    }

    /// Validate configuration before running.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

/// Failure details for a single seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    /// Seeds that passed all invariants.
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Appends accepted across every seed.
    pub appends_accepted: usize,
    /// Appends that lost a head race across every seed.
    pub appends_rejected: usize,
}

impl CampaignReport {
    /// True if every seed passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Detailed trace produced by replaying a single seed.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run a full campaign across all seeds in the config.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation encounters
/// an internal error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        appends_accepted: 0,
        appends_rejected: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let trace = run_seed(seed, config)?;
        report.appends_accepted += trace.result.accepted();
        report.appends_rejected += trace.result.rejected();

        if trace.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace.oracle.violations.iter().map(ToString::to_string).collect(),
            });
        }
    }

    info!(
        seeds_run = report.seeds_run,
        seeds_passed = report.seeds_passed,
        "campaign complete"
    );
    Ok(report)
}

/// Run a single seed and return Ok(()) on pass, Err(violations) on failure.
///
/// # Errors
///
/// Returns an `anyhow::Error` if the simulation itself encounters an internal
/// error. The inner `Result` distinguishes pass from invariant violations.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let trace = run_seed(seed, config)?;
    if trace.oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(trace.oracle.violations))
    }
}

/// Replay a single seed with full trace details for debugging.
///
/// # Errors
///
/// Returns an error when config validation or simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.sim_config_for_seed(seed).validate()?;
    run_seed(seed, config)
}

fn run_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = ChainOracle::check_all(&result);
    Ok(DetailedTrace { result, oracle })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(seed_range: Range<u64>) -> CampaignConfig {
        CampaignConfig {
            seed_range,
            writers: 3,
            rounds: 10,
            side_branches: 1,
            stale_percent: 20,
        }
    }

    #[test]
    fn campaign_config_default_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn campaign_config_empty_seed_range_rejected() {
        assert!(small(5..5).validate().is_err());
    }

    #[test]
    fn campaign_config_zero_writers_rejected() {
        let config = CampaignConfig {
            writers: 0,
            ..small(0..1)
        };
        assert!(config.validate().is_err());
        assert!(run_campaign(&config).is_err());
    }

    #[test]
    fn sim_config_for_seed_uses_correct_seed() {
        let config = small(0..1);
        let sim = config.sim_config_for_seed(42);
        assert_eq!(sim.seed, 42);
        assert_eq!(sim.writers, config.writers);
        assert_eq!(sim.rounds, config.rounds);
    }

    #[test]
    fn run_single_seed_passes() {
        let result = run_single_seed(0, &small(0..1)).expect("sim should not error");
        assert!(result.is_ok(), "seed 0 should pass: {result:?}");
    }

    #[test]
    fn run_campaign_all_seeds_pass() {
        let report = run_campaign(&small(0..10)).expect("campaign should not error");
        assert_eq!(report.seeds_run, 10);
        assert_eq!(report.seeds_passed, 10);
        assert!(report.all_passed());
        assert!(report.first_failure.is_none());
        assert_eq!(report.appends_accepted + report.appends_rejected, 10 * 3 * 10);
        assert!(report.appends_rejected > 0, "three writers never collided");
    }

    #[test]
    fn replay_matches_campaign_run() {
        let config = small(0..1);
        let a = replay_seed(3, &config).expect("replay");
        let b = replay_seed(3, &config).expect("replay");
        assert_eq!(a.result.trace, b.result.trace);
        assert_eq!(a.oracle, b.oracle);
        assert!(a.oracle.passed);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = run_campaign(&small(0..2)).expect("campaign");
        let json = serde_json::to_string(&report).expect("json");
        let back: CampaignReport = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, report);
    }
}
