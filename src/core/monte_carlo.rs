use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use tracing::debug;

use super::engine::{Rates, percentile, percentile_sorted, step_year};
use super::events::liquidity_schedule;
use super::types::{LiquidityEvent, MonteCarloStats, Scenario};
use crate::error::{ProjectionError, Result};

/// Annual nominal returns drawn up front, one row of `years` per trial.
///
/// Each row comes from its own generator seeded by `derive_seed(seed, trial)`,
/// so the grid is identical no matter how many threads fill it.
#[derive(Debug, Clone)]
struct ReturnGrid {
    years: usize,
    draws: Vec<f64>,
}

impl ReturnGrid {
    fn generate(normal: Normal<f64>, trials: usize, years: usize, seed: u64) -> Self {
        let mut draws = vec![0.0; trials * years];
        draws
            .par_chunks_mut(years)
            .enumerate()
            .for_each(|(trial, row)| {
                let mut rng = StdRng::seed_from_u64(derive_seed(seed, trial as u64));
                for draw in row.iter_mut() {
                    *draw = normal.sample(&mut rng);
                }
            });
        Self { years, draws }
    }

    fn trial(&self, trial: usize) -> &[f64] {
        &self.draws[trial * self.years..(trial + 1) * self.years]
    }
}

#[derive(Debug)]
struct TrialOutcome {
    terminal_nominal: f64,
    min_balance: f64,
    real_path: Vec<f64>,
}

/// Runs `trials` independent projections with normally distributed annual
/// returns and summarizes terminal values and per-age real percentiles.
pub fn run_monte_carlo(
    scenario: &Scenario,
    events: &[LiquidityEvent],
    trials: u32,
    seed: u64,
) -> Result<MonteCarloStats> {
    scenario.validate()?;
    if trials == 0 {
        return Err(ProjectionError::parameter("trials", "must be > 0"));
    }

    let normal = Normal::new(
        scenario.nominal_return_pct / 100.0,
        scenario.return_stdev_pct / 100.0,
    )
    .map_err(|e| ProjectionError::parameter("return_stdev_pct", e.to_string()))?;

    let years = scenario.horizon_years();
    let grid = ReturnGrid::generate(normal, trials as usize, years, seed);
    let rates = Rates::from_scenario(scenario, scenario.withdrawal_pct);
    let schedule = liquidity_schedule(scenario, events);

    let outcomes: Vec<TrialOutcome> = (0..trials as usize)
        .into_par_iter()
        .map(|trial| simulate_trial(scenario, rates, &schedule, grid.trial(trial)))
        .collect();

    let solvent = outcomes
        .iter()
        .filter(|outcome| outcome.min_balance >= 0.0)
        .count();
    let mut terminals = outcomes
        .iter()
        .map(|outcome| outcome.terminal_nominal)
        .collect::<Vec<_>>();

    let mut p10_path = Vec::with_capacity(years);
    let mut p50_path = Vec::with_capacity(years);
    let mut p90_path = Vec::with_capacity(years);
    let mut column = Vec::with_capacity(outcomes.len());
    for year in 0..years {
        column.clear();
        column.extend(outcomes.iter().map(|outcome| outcome.real_path[year]));
        column.sort_by(|a, b| a.total_cmp(b));
        p10_path.push(percentile_sorted(&column, 10.0));
        p50_path.push(percentile_sorted(&column, 50.0));
        p90_path.push(percentile_sorted(&column, 90.0));
    }

    let stats = MonteCarloStats {
        trials,
        seed,
        probability_no_shortfall: solvent as f64 / trials as f64,
        median_terminal: percentile(&mut terminals, 50.0),
        p10_terminal: percentile(&mut terminals, 10.0),
        p90_terminal: percentile(&mut terminals, 90.0),
        ages: scenario.ages().collect(),
        p10_path,
        p50_path,
        p90_path,
    };

    debug!(
        scenario = %scenario.name,
        trials,
        seed,
        years,
        probability_no_shortfall = stats.probability_no_shortfall,
        median_terminal = stats.median_terminal,
        "completed Monte Carlo run"
    );

    Ok(stats)
}

fn simulate_trial(
    scenario: &Scenario,
    rates: Rates,
    schedule: &[(f64, f64)],
    returns: &[f64],
) -> TrialOutcome {
    let mut balance = scenario.current_balance;
    let mut price_index = 1.0;
    let mut min_balance = balance;
    let mut real_path = Vec::with_capacity(returns.len());

    for (year, age) in scenario.ages().enumerate() {
        if year > 0 {
            price_index = rates.next_price_index(price_index);
        }

        let (liquidity_net, liquidity_taxes) = schedule[year];
        let flows = step_year(
            scenario,
            rates,
            age,
            balance,
            price_index,
            liquidity_net,
            liquidity_taxes,
            returns[year],
        );

        balance = flows.end_balance;
        min_balance = min_balance.min(balance);
        real_path.push(rates.to_real(balance, price_index));
    }

    TrialOutcome {
        terminal_nominal: balance,
        min_balance,
        real_path,
    }
}

fn derive_seed(base_seed: u64, trial: u64) -> u64 {
    splitmix64(base_seed ^ trial.wrapping_mul(0xD1B5_4A32_D192_ED03))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
