use tracing::debug;

use super::events::liquidity_schedule;
use super::types::{
    Cadence, LiquidityEvent, Metrics, Scenario, Timeline, TimelineRow, WithdrawalMethod,
};
use crate::error::{ProjectionError, Result};

/// Scenario parameters converted to annual fractions once per run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rates {
    annual_contribution: f64,
    fee_rate: f64,
    withdrawal_tax_rate: f64,
    inflation_rate: f64,
    inflation_enabled: bool,
    withdrawal_fraction: f64,
    nominal_return: f64,
}

impl Rates {
    pub(crate) fn from_scenario(scenario: &Scenario, withdrawal_pct: f64) -> Self {
        Self {
            annual_contribution: scenario.contrib_amount
                * scenario.contrib_cadence.periods_per_year(),
            fee_rate: scenario.fee_pct / 100.0,
            withdrawal_tax_rate: if scenario.enable_taxes {
                scenario.effective_tax_rate_pct / 100.0
            } else {
                0.0
            },
            inflation_rate: scenario.inflation_pct / 100.0,
            inflation_enabled: scenario.inflation_enabled,
            withdrawal_fraction: withdrawal_pct / 100.0,
            nominal_return: scenario.nominal_return_pct / 100.0,
        }
    }

    /// Advances the cumulative price index by one year.
    pub(crate) fn next_price_index(self, price_index: f64) -> f64 {
        if self.inflation_enabled {
            price_index * (1.0 + self.inflation_rate)
        } else {
            price_index
        }
    }

    pub(crate) fn to_real(self, nominal: f64, price_index: f64) -> f64 {
        if self.inflation_enabled {
            nominal / price_index
        } else {
            nominal
        }
    }
}

/// Cash flows for one simulated age.
#[derive(Debug, Clone, Copy)]
pub(crate) struct YearFlows {
    pub(crate) contributions: f64,
    pub(crate) withdrawals: f64,
    pub(crate) fees: f64,
    pub(crate) taxes: f64,
    pub(crate) growth: f64,
    pub(crate) end_balance: f64,
}

/// The per-age recurrence shared by the deterministic and stochastic
/// projections. Only `annual_return` differs between them.
///
/// `start_balance` doubles as the prior year's ending balance that the
/// percentage withdrawal method is based on.
#[allow(clippy::too_many_arguments)]
pub(crate) fn step_year(
    scenario: &Scenario,
    rates: Rates,
    age: u32,
    start_balance: f64,
    price_index: f64,
    liquidity_net: f64,
    liquidity_taxes: f64,
    annual_return: f64,
) -> YearFlows {
    let contributions = if age < scenario.retirement_age {
        rates.annual_contribution
    } else {
        0.0
    };

    let withdrawals = if age < scenario.retirement_age {
        0.0
    } else {
        match scenario.withdrawal_method {
            WithdrawalMethod::PercentOfPriorBalance => start_balance * rates.withdrawal_fraction,
            WithdrawalMethod::FixedRealAmount => {
                let indexed = if rates.inflation_enabled {
                    scenario.withdrawal_real_amount * price_index
                } else {
                    scenario.withdrawal_real_amount
                };
                match scenario.withdrawal_frequency {
                    Cadence::Monthly => indexed * 12.0,
                    Cadence::Annual => indexed,
                }
            }
        }
    };

    // Fees are charged on the start-of-year balance, before any cash flow.
    let fees = start_balance * rates.fee_rate;
    let taxes = liquidity_taxes + withdrawals * rates.withdrawal_tax_rate;

    let after_cashflows =
        start_balance + contributions + liquidity_net - withdrawals - fees - taxes;
    let growth = after_cashflows * annual_return;

    YearFlows {
        contributions,
        withdrawals,
        fees,
        taxes,
        growth,
        end_balance: after_cashflows + growth,
    }
}

/// Deterministic projection at the scenario's own withdrawal percentage.
pub fn build_timeline(scenario: &Scenario, events: &[LiquidityEvent]) -> Result<Timeline> {
    scenario.validate()?;
    Ok(project(scenario, events, scenario.withdrawal_pct))
}

/// Deterministic projection with the withdrawal percentage replaced by
/// `withdrawal_pct`. Only meaningful for the percentage-of-prior-balance
/// method; any other method is rejected.
pub fn build_timeline_at_rate(
    scenario: &Scenario,
    events: &[LiquidityEvent],
    withdrawal_pct: f64,
) -> Result<Timeline> {
    if scenario.withdrawal_method != WithdrawalMethod::PercentOfPriorBalance {
        return Err(ProjectionError::WithdrawalMethodMismatch);
    }
    if !withdrawal_pct.is_finite() || withdrawal_pct < 0.0 {
        return Err(ProjectionError::parameter("withdrawal_pct", "must be >= 0"));
    }
    scenario.validate()?;
    Ok(project(scenario, events, withdrawal_pct))
}

fn project(scenario: &Scenario, events: &[LiquidityEvent], withdrawal_pct: f64) -> Timeline {
    let rates = Rates::from_scenario(scenario, withdrawal_pct);
    let schedule = liquidity_schedule(scenario, events);

    let mut rows = Vec::with_capacity(scenario.horizon_years());
    let mut balance = scenario.current_balance;
    let mut price_index = 1.0;
    let mut first_shortfall_age = None;

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
            rates.nominal_return,
        );

        rows.push(TimelineRow {
            age,
            start_balance_nominal: balance,
            contributions: flows.contributions,
            liquidity_net,
            withdrawals: flows.withdrawals,
            fees: flows.fees,
            taxes: flows.taxes,
            growth: flows.growth,
            end_balance_nominal: flows.end_balance,
            cpi_index: price_index,
            end_balance_real: rates.to_real(flows.end_balance, price_index),
        });

        if first_shortfall_age.is_none() && flows.end_balance < 0.0 {
            first_shortfall_age = Some(age);
        }
        balance = flows.end_balance;
    }

    // The age range is closed and validated, so there is always a last row.
    let last = rows[rows.len() - 1];
    debug!(
        scenario = %scenario.name,
        rows = rows.len(),
        withdrawal_pct,
        terminal_nominal = last.end_balance_nominal,
        ?first_shortfall_age,
        "built deterministic timeline"
    );

    Timeline {
        metrics: Metrics {
            terminal_nominal: last.end_balance_nominal,
            terminal_real: last.end_balance_real,
            first_shortfall_age,
            probability_no_shortfall: None,
            median_terminal: None,
            p10_terminal: None,
            p90_terminal: None,
        },
        rows,
    }
}

/// Linear-interpolation percentile between closest ranks; sorts `values`.
pub(crate) fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(values, p)
}

pub(crate) fn percentile_sorted(values: &[f64], p: f64) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{EventKind, Recurrence};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn flat_scenario() -> Scenario {
        Scenario {
            name: "flat".to_string(),
            current_age: 60,
            retirement_age: 62,
            end_age: 64,
            current_balance: 1_000.0,
            contrib_amount: 100.0,
            contrib_cadence: Cadence::Annual,
            nominal_return_pct: 10.0,
            return_stdev_pct: 0.0,
            inflation_pct: 0.0,
            fee_pct: 0.0,
            withdrawal_method: WithdrawalMethod::PercentOfPriorBalance,
            withdrawal_pct: 10.0,
            withdrawal_real_amount: 0.0,
            withdrawal_frequency: Cadence::Annual,
            liquidity_events: Vec::new(),
            enable_mc: false,
            mc_runs: 0,
            enable_taxes: false,
            effective_tax_rate_pct: 0.0,
            inflation_enabled: false,
        }
    }

    fn credit(label: &str, age: u32, amount: f64) -> LiquidityEvent {
        LiquidityEvent {
            kind: EventKind::Credit,
            label: label.to_string(),
            start_age: age,
            end_age: age,
            amount,
            recurrence: Recurrence::OneTime,
            enabled: true,
            taxable: false,
            tax_rate: 0.0,
        }
    }

    #[test]
    fn oracle_accumulation_then_percentage_drawdown_matches_hand_calculation() {
        let timeline = build_timeline(&flat_scenario(), &[]).expect("valid scenario");
        let rows = &timeline.rows;
        assert_eq!(rows.len(), 5);

        // 60: (1000 + 100) * 1.1 = 1210
        // 61: (1210 + 100) * 1.1 = 1441
        // 62: (1441 - 144.1) * 1.1 = 1426.59
        // 63: (1426.59 - 142.659) * 1.1 = 1412.3241
        // 64: (1412.3241 - 141.23241) * 1.1 = 1398.200859
        assert_approx(rows[0].end_balance_nominal, 1_210.0);
        assert_approx(rows[1].end_balance_nominal, 1_441.0);
        assert_approx(rows[2].withdrawals, 144.1);
        assert_approx(rows[2].contributions, 0.0);
        assert_approx(rows[2].end_balance_nominal, 1_426.59);
        assert_approx(rows[3].end_balance_nominal, 1_412.3241);
        assert_approx(rows[4].end_balance_nominal, 1_398.200859);
        assert_approx(timeline.metrics.terminal_nominal, 1_398.200859);
        assert_approx(timeline.metrics.terminal_real, 1_398.200859);
        assert_eq!(timeline.metrics.first_shortfall_age, None);
        assert!(timeline.metrics.probability_no_shortfall.is_none());
    }

    #[test]
    fn fees_are_charged_on_start_balance_and_taxes_on_withdrawals() {
        let mut scenario = flat_scenario();
        scenario.current_age = 62;
        scenario.fee_pct = 1.0;
        scenario.enable_taxes = true;
        scenario.effective_tax_rate_pct = 20.0;
        scenario.nominal_return_pct = 0.0;

        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        let row = timeline.rows[0];
        assert_approx(row.fees, 10.0);
        assert_approx(row.withdrawals, 100.0);
        assert_approx(row.taxes, 20.0);
        assert_approx(row.end_balance_nominal, 1_000.0 - 100.0 - 10.0 - 20.0);
    }

    #[test]
    fn withdrawal_taxes_ignored_when_taxes_disabled() {
        let mut scenario = flat_scenario();
        scenario.current_age = 62;
        scenario.effective_tax_rate_pct = 50.0;
        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        assert_approx(timeline.rows[0].taxes, 0.0);
    }

    #[test]
    fn monthly_contributions_are_annualized_before_retirement_only() {
        let mut scenario = flat_scenario();
        scenario.contrib_cadence = Cadence::Monthly;
        scenario.contrib_amount = 50.0;
        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        assert_approx(timeline.rows[0].contributions, 600.0);
        assert_approx(timeline.rows[1].contributions, 600.0);
        assert_approx(timeline.rows[2].contributions, 0.0);
    }

    #[test]
    fn price_index_starts_at_one_and_compounds_each_later_age() {
        let mut scenario = flat_scenario();
        scenario.inflation_enabled = true;
        scenario.inflation_pct = 10.0;
        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        let rows = &timeline.rows;
        assert_approx(rows[0].cpi_index, 1.0);
        assert_approx(rows[1].cpi_index, 1.1);
        assert_approx(rows[2].cpi_index, 1.21);
        assert_approx(rows[0].end_balance_real, rows[0].end_balance_nominal);
        assert_approx(rows[2].end_balance_real, rows[2].end_balance_nominal / 1.21);
    }

    #[test]
    fn disabled_inflation_pins_index_and_real_values() {
        let mut scenario = flat_scenario();
        scenario.inflation_enabled = false;
        scenario.inflation_pct = 10.0;
        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        for row in &timeline.rows {
            assert_approx(row.cpi_index, 1.0);
            assert_approx(row.end_balance_real, row.end_balance_nominal);
        }
    }

    #[test]
    fn fixed_real_withdrawal_is_indexed_and_annualized() {
        let mut scenario = flat_scenario();
        scenario.withdrawal_method = WithdrawalMethod::FixedRealAmount;
        scenario.withdrawal_real_amount = 10.0;
        scenario.withdrawal_frequency = Cadence::Monthly;
        scenario.inflation_enabled = true;
        scenario.inflation_pct = 10.0;
        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        let rows = &timeline.rows;
        // Age 62 is the third simulated year: index 1.21.
        assert_approx(rows[2].withdrawals, 10.0 * 1.21 * 12.0);
        assert_approx(rows[3].withdrawals, 10.0 * 1.331 * 12.0);

        scenario.inflation_enabled = false;
        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        assert_approx(timeline.rows[3].withdrawals, 120.0);
    }

    #[test]
    fn percentage_withdrawal_ignores_monthly_frequency() {
        let mut scenario = flat_scenario();
        let annual = build_timeline(&scenario, &[]).expect("valid scenario");
        scenario.withdrawal_frequency = Cadence::Monthly;
        let monthly = build_timeline(&scenario, &[]).expect("valid scenario");
        assert_eq!(annual.rows, monthly.rows);
    }

    #[test]
    fn one_time_credit_affects_only_its_age() {
        let scenario = flat_scenario();
        let events = vec![credit("bonus", 61, 5_000.0)];
        let timeline = build_timeline(&scenario, &events).expect("valid scenario");
        for row in &timeline.rows {
            let expected = if row.age == 61 { 5_000.0 } else { 0.0 };
            assert_approx(row.liquidity_net, expected);
        }
    }

    #[test]
    fn monthly_debit_is_annualized_on_every_row_in_range() {
        let mut scenario = flat_scenario();
        scenario.current_age = 58;
        scenario.end_age = 66;
        let care = LiquidityEvent {
            kind: EventKind::Debit,
            label: "care".to_string(),
            start_age: 60,
            end_age: 63,
            amount: -250.0,
            recurrence: Recurrence::Monthly,
            enabled: true,
            taxable: false,
            tax_rate: 0.0,
        };
        let timeline = build_timeline(&scenario, &[care]).expect("valid scenario");
        assert_eq!(timeline.rows.len(), 9);
        for row in &timeline.rows {
            let expected = if (60..=63).contains(&row.age) { -3_000.0 } else { 0.0 };
            assert_approx(row.liquidity_net, expected);
        }
    }

    #[test]
    fn taxable_event_tax_flows_into_row_taxes() {
        let scenario = flat_scenario();
        let mut sale = credit("sale", 60, 1_000.0);
        sale.taxable = true;
        sale.tax_rate = 15.0;
        let timeline = build_timeline(&scenario, &[sale]).expect("valid scenario");
        assert_approx(timeline.rows[0].taxes, 150.0);
        assert_approx(
            timeline.rows[0].end_balance_nominal,
            (1_000.0 + 100.0 + 1_000.0 - 150.0) * 1.1,
        );
    }

    #[test]
    fn first_shortfall_age_is_recorded_once() {
        let mut scenario = flat_scenario();
        scenario.current_age = 62;
        scenario.nominal_return_pct = 0.0;
        let events = vec![
            credit("crash", 63, -5_000.0),
            credit("windfall", 64, 100_000.0),
        ];
        let timeline = build_timeline(&scenario, &events).expect("valid scenario");
        assert!(timeline.rows[1].end_balance_nominal < 0.0);
        assert!(timeline.rows[2].end_balance_nominal > 0.0);
        assert_eq!(timeline.metrics.first_shortfall_age, Some(63));
    }

    #[test]
    fn zero_length_horizon_yields_one_row() {
        let mut scenario = flat_scenario();
        scenario.current_age = 64;
        scenario.retirement_age = 64;
        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        assert_eq!(timeline.rows.len(), 1);
        assert_eq!(timeline.rows[0].age, 64);
        assert_approx(timeline.rows[0].cpi_index, 1.0);
    }

    #[test]
    fn invalid_age_order_is_rejected() {
        let mut scenario = flat_scenario();
        scenario.end_age = 59;
        assert!(matches!(
            build_timeline(&scenario, &[]),
            Err(ProjectionError::InvalidAges { .. })
        ));
    }

    #[test]
    fn rate_override_rejects_fixed_real_method() {
        let mut scenario = flat_scenario();
        scenario.withdrawal_method = WithdrawalMethod::FixedRealAmount;
        assert_eq!(
            build_timeline_at_rate(&scenario, &[], 4.0),
            Err(ProjectionError::WithdrawalMethodMismatch)
        );
    }

    #[test]
    fn rate_override_replaces_scenario_percentage() {
        let scenario = flat_scenario();
        let timeline = build_timeline_at_rate(&scenario, &[], 0.0).expect("valid scenario");
        assert_approx(timeline.rows[2].withdrawals, 0.0);
    }

    #[test]
    fn default_planner_scenario_stays_positive_through_accumulation() {
        let scenario = Scenario::default();
        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        for row in timeline.rows.iter().filter(|row| row.age <= 65) {
            assert!(
                row.end_balance_nominal > 0.0,
                "age {} balance {}",
                row.age,
                row.end_balance_nominal
            );
        }
    }

    #[test]
    fn zero_withdrawal_percentage_never_goes_short_with_large_balance() {
        let scenario = Scenario {
            withdrawal_pct: 0.0,
            current_balance: 1_000_000.0,
            ..Scenario::default()
        };
        let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
        assert!(timeline.rows.iter().all(|row| row.withdrawals == 0.0));
        assert_eq!(timeline.metrics.first_shortfall_age, None);
    }

    #[test]
    fn percentile_interpolates_between_points() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_approx(percentile(&mut values, 25.0), 1.75);
        assert_approx(percentile(&mut values, 50.0), 2.5);
        assert_approx(percentile(&mut values, 90.0), 3.7);
        assert_approx(percentile(&mut [], 50.0), 0.0);
        assert_approx(percentile(&mut [7.0], 10.0), 7.0);
    }

    proptest! {
        #[test]
        fn timeline_has_one_row_per_age(
            current in 18_u32..70,
            to_retirement in 0_u32..30,
            to_end in 0_u32..40,
            balance in 0.0_f64..2.0e6,
            inflation in 0.0_f64..8.0,
        ) {
            let scenario = Scenario {
                current_age: current,
                retirement_age: current + to_retirement,
                end_age: current + to_retirement + to_end,
                current_balance: balance,
                inflation_pct: inflation,
                ..Scenario::default()
            };
            let timeline = build_timeline(&scenario, &[]).expect("valid scenario");
            prop_assert_eq!(
                timeline.rows.len(),
                (scenario.end_age - scenario.current_age + 1) as usize
            );
            prop_assert_eq!(timeline.rows[0].cpi_index, 1.0);
            for (offset, row) in timeline.rows.iter().enumerate() {
                prop_assert_eq!(row.age, current + offset as u32);
            }
        }

        #[test]
        fn disabling_an_event_equals_omitting_it(
            age in 30_u32..95,
            amount in -5.0e5_f64..5.0e5,
        ) {
            let scenario = Scenario::default();
            let mut event = credit("toggle", age, amount);
            event.enabled = false;
            let with_disabled = build_timeline(&scenario, &[event]).expect("valid scenario");
            let without = build_timeline(&scenario, &[]).expect("valid scenario");
            prop_assert!(with_disabled == without);
        }
    }
}
