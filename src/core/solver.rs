use serde::Serialize;
use tracing::debug;

use super::engine::build_timeline_at_rate;
use super::types::{LiquidityEvent, Scenario, WithdrawalMethod};
use crate::error::{ProjectionError, Result};

pub const SWR_SEARCH_MIN: f64 = 0.0;
pub const SWR_SEARCH_MAX: f64 = 20.0;
pub const DEFAULT_SWR_TOLERANCE: f64 = 0.01;
pub const DEFAULT_SWR_MAX_ITERATIONS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwrSolveConfig {
    /// Stop once the search interval is narrower than this many percentage
    /// points.
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for SwrSolveConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_SWR_TOLERANCE,
            max_iterations: DEFAULT_SWR_MAX_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwrIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_rate: f64,
    pub min_balance: f64,
    pub solvent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwrSolveResult {
    /// Highest tested withdrawal percentage that stayed solvent, or 0.0.
    pub rate: f64,
    pub iterations: Vec<SwrIteration>,
    pub converged: bool,
}

/// Maximum percentage-of-prior-balance withdrawal rate (0-20%) for which the
/// deterministic projection never goes negative. `None` when the scenario uses
/// fixed real withdrawals.
pub fn solve_safe_withdrawal_rate(
    scenario: &Scenario,
    events: &[LiquidityEvent],
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
) -> Result<Option<f64>> {
    let defaults = SwrSolveConfig::default();
    let config = SwrSolveConfig {
        tolerance: tolerance.unwrap_or(defaults.tolerance),
        max_iterations: max_iterations.unwrap_or(defaults.max_iterations),
    };
    Ok(solve_safe_withdrawal_rate_traced(scenario, events, config)?.map(|result| result.rate))
}

/// Same search as [`solve_safe_withdrawal_rate`], keeping every iteration.
pub fn solve_safe_withdrawal_rate_traced(
    scenario: &Scenario,
    events: &[LiquidityEvent],
    config: SwrSolveConfig,
) -> Result<Option<SwrSolveResult>> {
    if scenario.withdrawal_method != WithdrawalMethod::PercentOfPriorBalance {
        return Ok(None);
    }
    validate_config(config)?;
    scenario.validate()?;

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let mut lo = SWR_SEARCH_MIN;
    let mut hi = SWR_SEARCH_MAX;
    let mut best_rate = 0.0;
    let mut converged = false;

    for it in 1..=config.max_iterations {
        let mid = (lo + hi) * 0.5;
        let timeline = build_timeline_at_rate(scenario, events, mid)?;
        let min_balance = timeline.min_end_balance();
        let solvent = min_balance >= 0.0;

        iterations.push(SwrIteration {
            iteration: it,
            lower_bound: lo,
            upper_bound: hi,
            candidate_rate: mid,
            min_balance,
            solvent,
        });
        debug!(
            iteration = it,
            candidate_rate = mid,
            min_balance,
            solvent,
            "safe withdrawal rate iteration"
        );

        if solvent {
            best_rate = mid;
            lo = mid;
        } else {
            hi = mid;
        }

        if hi - lo < config.tolerance {
            converged = true;
            break;
        }
    }

    Ok(Some(SwrSolveResult {
        rate: best_rate,
        iterations,
        converged,
    }))
}

fn validate_config(config: SwrSolveConfig) -> Result<()> {
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(ProjectionError::parameter("tolerance", "must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(ProjectionError::parameter("max_iterations", "must be > 0"));
    }
    Ok(())
}
