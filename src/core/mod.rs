mod compare;
mod engine;
mod events;
mod monte_carlo;
mod solver;
mod types;

pub use compare::{ScenarioComparison, ScenarioSummary, compare_scenarios};
pub use engine::{build_timeline, build_timeline_at_rate};
pub use events::{LiquidityAtAge, apply_liquidity_events, default_events};
pub use monte_carlo::run_monte_carlo;
pub use solver::{
    DEFAULT_SWR_MAX_ITERATIONS, DEFAULT_SWR_TOLERANCE, SwrIteration, SwrSolveConfig,
    SwrSolveResult, solve_safe_withdrawal_rate, solve_safe_withdrawal_rate_traced,
};
pub use types::{
    Cadence, EventKind, LiquidityEvent, Metrics, MonteCarloStats, Recurrence, Scenario, Timeline,
    TimelineRow, WithdrawalMethod,
};
