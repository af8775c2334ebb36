use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};

fn default_true() -> bool {
    true
}

/// Display grouping for a liquidity event. The sign of `amount` is what the
/// engine actually uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    Credit,
    Debit,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Recurrence {
    #[serde(rename = "One-time", alias = "OneTime", alias = "one-time")]
    OneTime,
    #[serde(alias = "annual")]
    Annual,
    #[serde(alias = "monthly")]
    Monthly,
}

/// Payment cadence for contributions and fixed-amount withdrawals.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Cadence {
    #[serde(alias = "monthly")]
    Monthly,
    #[serde(alias = "annual")]
    Annual,
}

impl Cadence {
    pub fn periods_per_year(self) -> f64 {
        match self {
            Cadence::Monthly => 12.0,
            Cadence::Annual => 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WithdrawalMethod {
    /// Annual percentage of the prior year's ending nominal balance.
    #[serde(rename = "Fixed % of prior-year end balance")]
    PercentOfPriorBalance,
    /// Constant purchasing-power amount, indexed by the price index.
    #[serde(rename = "Fixed real dollars", alias = "Fixed real amount")]
    FixedRealAmount,
}

/// A signed, optionally taxable cash event. Positive amounts are inflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub label: String,
    pub start_age: u32,
    pub end_age: u32,
    pub amount: f64,
    pub recurrence: Recurrence,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub taxable: bool,
    #[serde(default)]
    pub tax_rate: f64,
}

/// Complete configuration for one projection.
///
/// Rates are stored as percentages (7.0 means 7%), the way they are entered
/// and persisted; the engine converts them to fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub current_age: u32,
    pub retirement_age: u32,
    pub end_age: u32,
    pub current_balance: f64,
    pub contrib_amount: f64,
    pub contrib_cadence: Cadence,
    pub nominal_return_pct: f64,
    pub return_stdev_pct: f64,
    pub inflation_pct: f64,
    pub fee_pct: f64,
    pub withdrawal_method: WithdrawalMethod,
    pub withdrawal_pct: f64,
    pub withdrawal_real_amount: f64,
    pub withdrawal_frequency: Cadence,
    #[serde(default)]
    pub liquidity_events: Vec<LiquidityEvent>,
    pub enable_mc: bool,
    pub mc_runs: u32,
    pub enable_taxes: bool,
    pub effective_tax_rate_pct: f64,
    #[serde(default = "default_true")]
    pub inflation_enabled: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "Base".to_string(),
            current_age: 30,
            retirement_age: 65,
            end_age: 95,
            current_balance: 100_000.0,
            contrib_amount: 500.0,
            contrib_cadence: Cadence::Monthly,
            nominal_return_pct: 7.0,
            return_stdev_pct: 15.0,
            inflation_pct: 3.0,
            fee_pct: 0.5,
            withdrawal_method: WithdrawalMethod::PercentOfPriorBalance,
            withdrawal_pct: 4.0,
            withdrawal_real_amount: 50_000.0,
            withdrawal_frequency: Cadence::Annual,
            liquidity_events: Vec::new(),
            enable_mc: true,
            mc_runs: 1_000,
            enable_taxes: false,
            effective_tax_rate_pct: 0.0,
            inflation_enabled: true,
        }
    }
}

impl Scenario {
    /// Number of simulated ages, both ends inclusive.
    pub fn horizon_years(&self) -> usize {
        (self.end_age - self.current_age) as usize + 1
    }

    pub fn ages(&self) -> std::ops::RangeInclusive<u32> {
        self.current_age..=self.end_age
    }

    /// Rejects configurations that would otherwise produce an empty or
    /// meaningless projection.
    pub fn validate(&self) -> Result<()> {
        if self.current_age > self.retirement_age || self.retirement_age > self.end_age {
            return Err(ProjectionError::InvalidAges {
                current: self.current_age,
                retirement: self.retirement_age,
                end: self.end_age,
            });
        }

        for (field, value) in [
            ("current_balance", self.current_balance),
            ("contrib_amount", self.contrib_amount),
            ("nominal_return_pct", self.nominal_return_pct),
            ("withdrawal_real_amount", self.withdrawal_real_amount),
        ] {
            if !value.is_finite() {
                return Err(ProjectionError::parameter(field, "must be finite"));
            }
        }

        if !self.return_stdev_pct.is_finite() || self.return_stdev_pct < 0.0 {
            return Err(ProjectionError::parameter(
                "return_stdev_pct",
                "must be finite and >= 0",
            ));
        }
        if !self.inflation_pct.is_finite() || self.inflation_pct <= -100.0 {
            return Err(ProjectionError::parameter("inflation_pct", "must be > -100"));
        }
        if !self.withdrawal_pct.is_finite() || self.withdrawal_pct < 0.0 {
            return Err(ProjectionError::parameter("withdrawal_pct", "must be >= 0"));
        }
        if self.withdrawal_real_amount < 0.0 {
            return Err(ProjectionError::parameter(
                "withdrawal_real_amount",
                "must be >= 0",
            ));
        }
        for (field, value) in [
            ("fee_pct", self.fee_pct),
            ("effective_tax_rate_pct", self.effective_tax_rate_pct),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ProjectionError::parameter(field, "must be between 0 and 100"));
            }
        }
        Ok(())
    }
}

/// One simulated year of the deterministic projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRow {
    pub age: u32,
    pub start_balance_nominal: f64,
    pub contributions: f64,
    pub liquidity_net: f64,
    pub withdrawals: f64,
    pub fees: f64,
    pub taxes: f64,
    pub growth: f64,
    pub end_balance_nominal: f64,
    pub cpi_index: f64,
    pub end_balance_real: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub terminal_nominal: f64,
    pub terminal_real: f64,
    pub first_shortfall_age: Option<u32>,
    pub probability_no_shortfall: Option<f64>,
    pub median_terminal: Option<f64>,
    pub p10_terminal: Option<f64>,
    pub p90_terminal: Option<f64>,
}

impl Metrics {
    pub fn with_monte_carlo(mut self, stats: &MonteCarloStats) -> Self {
        self.probability_no_shortfall = Some(stats.probability_no_shortfall);
        self.median_terminal = Some(stats.median_terminal);
        self.p10_terminal = Some(stats.p10_terminal);
        self.p90_terminal = Some(stats.p90_terminal);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub rows: Vec<TimelineRow>,
    pub metrics: Metrics,
}

impl Timeline {
    /// Lowest ending nominal balance across all rows.
    pub fn min_end_balance(&self) -> f64 {
        self.rows
            .iter()
            .map(|row| row.end_balance_nominal)
            .fold(f64::INFINITY, f64::min)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloStats {
    pub trials: u32,
    pub seed: u64,
    pub probability_no_shortfall: f64,
    pub median_terminal: f64,
    pub p10_terminal: f64,
    pub p90_terminal: f64,
    pub ages: Vec<u32>,
    pub p10_path: Vec<f64>,
    pub p50_path: Vec<f64>,
    pub p90_path: Vec<f64>,
}
