//! Canned parameter sweeps: run the cubic/bbr/copa trio across one axis
//! while holding the others fixed.
//!
//! Runs are strictly sequential — the emulation layer owns global
//! namespace state, so one topology exists at a time.

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::flow::Transport;
use crate::run::{CancelToken, RunConfig, execute};
use crate::topo::parse_delay;

const TRIO: [Transport; 3] = [Transport::Cubic, Transport::Bbr, Transport::Copa];

/// Axis a sweep varies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepAxis {
    Delay,
    Loss,
    Pairs,
}

impl clap::ValueEnum for SweepAxis {
    fn value_variants<'a>() -> &'a [Self] {
        &[SweepAxis::Delay, SweepAxis::Loss, SweepAxis::Pairs]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(match self {
            SweepAxis::Delay => "delay",
            SweepAxis::Loss => "loss",
            SweepAxis::Pairs => "pairs",
        }))
    }
}

/// Run the trio across the chosen axis, starting from `base` (its
/// transports field decides the per-run pair count for delay/loss sweeps).
/// Returns the run directories in execution order.
pub fn run_sweep(base: &RunConfig, axis: SweepAxis, cancel: &CancelToken) -> Result<Vec<PathBuf>> {
    match axis {
        SweepAxis::Delay => sweep_delay(base, cancel),
        SweepAxis::Loss => sweep_loss(base, cancel),
        SweepAxis::Pairs => sweep_pairs(base, cancel),
    }
}

fn sweep_delay(base: &RunConfig, cancel: &CancelToken) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for delay in ["0ms", "10ms", "100ms"] {
        let delay = parse_delay(delay)?;
        for transport in TRIO {
            let mut cfg = base.clone();
            cfg.delay = delay;
            cfg.transports = vec![transport; base.pairs()];
            dirs.push(run_step(&cfg, cancel)?);
            if cancel.is_cancelled() {
                return Ok(dirs);
            }
        }
    }
    Ok(dirs)
}

fn sweep_loss(base: &RunConfig, cancel: &CancelToken) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for loss in [0.0, 3.0, 10.0, 20.0] {
        for transport in TRIO {
            let mut cfg = base.clone();
            cfg.loss_percent = loss;
            cfg.transports = vec![transport; base.pairs()];
            dirs.push(run_step(&cfg, cancel)?);
            if cancel.is_cancelled() {
                return Ok(dirs);
            }
        }
    }
    Ok(dirs)
}

fn sweep_pairs(base: &RunConfig, cancel: &CancelToken) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for pairs in [2, 4, 10] {
        for transport in TRIO {
            let mut cfg = base.clone();
            cfg.transports = vec![transport; pairs];
            dirs.push(run_step(&cfg, cancel)?);
            if cancel.is_cancelled() {
                return Ok(dirs);
            }
        }
    }
    Ok(dirs)
}

fn run_step(cfg: &RunConfig, cancel: &CancelToken) -> Result<PathBuf> {
    info!(params = %cfg.param_string(), "sweep step");
    execute(cfg, cancel)
}
