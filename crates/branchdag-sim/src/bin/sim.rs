#![forbid(unsafe_code)]

use std::env;

use anyhow::{Result, bail};
use branchdag_sim::Outcome;
use branchdag_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "branchdag-sim: seeded head-pointer race campaigns",
    long_about = None
)]
struct Cli {
    /// First seed to run.
    #[arg(long, default_value_t = 0)]
    seed_start: u64,

    /// Number of seeds to run.
    #[arg(long, default_value_t = 100)]
    seeds: u64,

    /// Concurrent writers per seed.
    #[arg(long, default_value_t = 4)]
    writers: usize,

    /// Rounds per seed.
    #[arg(long, default_value_t = 24)]
    rounds: u64,

    /// Branches opened by the root besides main.
    #[arg(long, default_value_t = 2)]
    side_branches: usize,

    /// Chance (percent) that a writer reuses a stale head.
    #[arg(long, default_value_t = 15)]
    stale_percent: u8,

    /// Replay one seed and print its commit trace.
    #[arg(long)]
    replay: Option<u64>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long)]
    json: bool,
}

impl Cli {
    const fn campaign_config(&self) -> CampaignConfig {
        CampaignConfig {
            seed_range: self.seed_start..self.seed_start.saturating_add(self.seeds),
            writers: self.writers,
            rounds: self.rounds,
            side_branches: self.side_branches,
            stale_percent: self.stale_percent,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("BRANCHDAG_LOG")
        .unwrap_or_else(|_| EnvFilter::new("branchdag_sim=info,branchdag_core=warn"));

    let format = env::var("BRANCHDAG_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.campaign_config();

    if let Some(seed) = cli.replay {
        let trace = replay_seed(seed, &config)?;
        for event in &trace.result.trace {
            let outcome = match &event.outcome {
                Outcome::Accepted { key, seq } => format!("accepted seq={seq} key={key}"),
                Outcome::Rejected { code, .. } => format!("rejected {code} {}", code.message()),
            };
            println!(
                "round={} writer={} branch={} fresh={} {outcome}",
                event.round, event.writer, event.branch, event.fresh
            );
        }
        for violation in &trace.oracle.violations {
            println!("VIOLATION {violation}");
        }
        if !trace.oracle.passed {
            bail!("seed {seed} violated {} invariants", trace.oracle.violations.len());
        }
        return Ok(());
    }

    let report = run_campaign(&config)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds_run={} seeds_passed={} accepted={} rejected={}",
            report.seeds_run,
            report.seeds_passed,
            report.appends_accepted,
            report.appends_rejected
        );
        for failure in &report.failures {
            println!("seed {} failed:", failure.seed);
            for violation in &failure.violations {
                println!("  {violation}");
            }
        }
    }

    if let Some(seed) = report.first_failure {
        bail!("campaign failed; replay with --replay {seed}");
    }
    Ok(())
}
