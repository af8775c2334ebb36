use serde::Serialize;

use super::engine::build_timeline;
use super::monte_carlo::run_monte_carlo;
use super::types::{LiquidityEvent, Metrics, Scenario};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub name: String,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioComparison {
    pub a: ScenarioSummary,
    pub b: ScenarioSummary,
    /// `b - a` for the terminal balances.
    pub terminal_nominal_delta: f64,
    pub terminal_real_delta: f64,
    pub probability_delta: Option<f64>,
}

/// Runs both scenarios through the deterministic engine and, when
/// `monte_carlo_seed` is set, through the simulator as well. Each side runs
/// its own `mc_runs` trials from the shared seed.
pub fn compare_scenarios(
    a: (&Scenario, &[LiquidityEvent]),
    b: (&Scenario, &[LiquidityEvent]),
    monte_carlo_seed: Option<u64>,
) -> Result<ScenarioComparison> {
    let a = summarize(a.0, a.1, monte_carlo_seed)?;
    let b = summarize(b.0, b.1, monte_carlo_seed)?;

    let probability_delta = match (
        a.metrics.probability_no_shortfall,
        b.metrics.probability_no_shortfall,
    ) {
        (Some(pa), Some(pb)) => Some(pb - pa),
        _ => None,
    };

    Ok(ScenarioComparison {
        terminal_nominal_delta: b.metrics.terminal_nominal - a.metrics.terminal_nominal,
        terminal_real_delta: b.metrics.terminal_real - a.metrics.terminal_real,
        probability_delta,
        a,
        b,
    })
}

fn summarize(
    scenario: &Scenario,
    events: &[LiquidityEvent],
    monte_carlo_seed: Option<u64>,
) -> Result<ScenarioSummary> {
    let mut metrics = build_timeline(scenario, events)?.metrics;
    if let Some(seed) = monte_carlo_seed {
        let stats = run_monte_carlo(scenario, events, scenario.mc_runs, seed)?;
        metrics = metrics.with_monte_carlo(&stats);
    }
    Ok(ScenarioSummary {
        name: scenario.name.clone(),
        metrics,
    })
}
