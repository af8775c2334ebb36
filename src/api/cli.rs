use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::core::{
    Cadence, LiquidityEvent, Scenario, WithdrawalMethod, build_timeline, run_monte_carlo,
    solve_safe_withdrawal_rate_traced, SwrSolveConfig, DEFAULT_SWR_MAX_ITERATIONS,
    DEFAULT_SWR_TOLERANCE,
};
use crate::export::timeline_csv;
use crate::store::ScenarioStore;

/// Oldest age a projection may run to.
pub(crate) const MAX_AGE: u32 = 110;
/// Upper bound on Monte Carlo trials per run.
pub(crate) const MAX_TRIALS: u32 = 5_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum CliCadence {
    Monthly,
    Annual,
}

impl From<CliCadence> for Cadence {
    fn from(value: CliCadence) -> Self {
        match value {
            CliCadence::Monthly => Cadence::Monthly,
            CliCadence::Annual => Cadence::Annual,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum CliWithdrawalMethod {
    /// Percentage of the prior year's ending balance
    Percent,
    /// Inflation-indexed fixed amount
    FixedReal,
}

impl From<CliWithdrawalMethod> for WithdrawalMethod {
    fn from(value: CliWithdrawalMethod) -> Self {
        match value {
            CliWithdrawalMethod::Percent => WithdrawalMethod::PercentOfPriorBalance,
            CliWithdrawalMethod::FixedReal => WithdrawalMethod::FixedRealAmount,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Retirement portfolio projection: deterministic timeline, Monte Carlo and safe withdrawal rate"
)]
pub struct Cli {
    #[arg(long, global = true, default_value = "info", help = "Default log level when RUST_LOG is unset")]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Print the deterministic year-by-year projection
    Project {
        #[command(flatten)]
        scenario: ScenarioArgs,
        #[arg(long, help = "Also write the rows as CSV to this path")]
        csv: Option<PathBuf>,
    },
    /// Run the Monte Carlo simulation
    MonteCarlo {
        #[command(flatten)]
        scenario: ScenarioArgs,
        #[arg(long, help = "Number of trials; defaults to --mc-runs")]
        trials: Option<u32>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Search for the maximum safe percentage withdrawal rate
    Swr {
        #[command(flatten)]
        scenario: ScenarioArgs,
        #[arg(long, default_value_t = DEFAULT_SWR_TOLERANCE, help = "Search tolerance in percentage points")]
        tolerance: f64,
        #[arg(long, default_value_t = DEFAULT_SWR_MAX_ITERATIONS)]
        max_iterations: u32,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ScenarioArgs {
    #[arg(long, default_value = "Base")]
    pub(crate) name: String,
    #[arg(long, default_value_t = 30)]
    pub(crate) current_age: u32,
    #[arg(long, default_value_t = 65)]
    pub(crate) retirement_age: u32,
    #[arg(long, default_value_t = 95, help = "Last age to project, inclusive")]
    pub(crate) end_age: u32,
    #[arg(long, default_value_t = 100_000.0)]
    pub(crate) current_balance: f64,
    #[arg(long, default_value_t = 500.0, help = "Contribution per period before retirement")]
    pub(crate) contrib_amount: f64,
    #[arg(long, value_enum, default_value_t = CliCadence::Monthly)]
    pub(crate) contrib_cadence: CliCadence,
    #[arg(long, default_value_t = 7.0, help = "Expected annual nominal return in percent")]
    pub(crate) nominal_return: f64,
    #[arg(long, default_value_t = 15.0, help = "Annual return standard deviation in percent")]
    pub(crate) return_stdev: f64,
    #[arg(long, default_value_t = 3.0, help = "Annual inflation in percent")]
    pub(crate) inflation: f64,
    #[arg(long, help = "Ignore inflation: price index stays at 1.0")]
    pub(crate) no_inflation: bool,
    #[arg(long, default_value_t = 0.5, help = "Annual fee in percent of start-of-year balance")]
    pub(crate) fee: f64,
    #[arg(long, value_enum, default_value_t = CliWithdrawalMethod::Percent)]
    pub(crate) withdrawal_method: CliWithdrawalMethod,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Annual withdrawal in percent of prior-year balance; --withdrawal-frequency does not scale it"
    )]
    pub(crate) withdrawal_pct: f64,
    #[arg(
        long,
        default_value_t = 50_000.0,
        help = "Fixed withdrawal in today's money per --withdrawal-frequency period"
    )]
    pub(crate) withdrawal_real_amount: f64,
    #[arg(long, value_enum, default_value_t = CliCadence::Annual)]
    pub(crate) withdrawal_frequency: CliCadence,
    #[arg(long)]
    pub(crate) enable_taxes: bool,
    #[arg(long, default_value_t = 0.0, help = "Effective tax rate on withdrawals in percent")]
    pub(crate) effective_tax_rate: f64,
    #[arg(long, default_value_t = 1_000)]
    pub(crate) mc_runs: u32,
    #[arg(long, help = "JSON array of liquidity events")]
    pub(crate) events_file: Option<PathBuf>,
    #[arg(long, requires = "scenario", help = "Load the scenario from this store instead of flags")]
    pub(crate) scenario_file: Option<PathBuf>,
    #[arg(long, help = "Name of the stored scenario to load")]
    pub(crate) scenario: Option<String>,
}

impl Default for ScenarioArgs {
    fn default() -> Self {
        Self {
            name: "Base".to_string(),
            current_age: 30,
            retirement_age: 65,
            end_age: 95,
            current_balance: 100_000.0,
            contrib_amount: 500.0,
            contrib_cadence: CliCadence::Monthly,
            nominal_return: 7.0,
            return_stdev: 15.0,
            inflation: 3.0,
            no_inflation: false,
            fee: 0.5,
            withdrawal_method: CliWithdrawalMethod::Percent,
            withdrawal_pct: 4.0,
            withdrawal_real_amount: 50_000.0,
            withdrawal_frequency: CliCadence::Annual,
            enable_taxes: false,
            effective_tax_rate: 0.0,
            mc_runs: 1_000,
            events_file: None,
            scenario_file: None,
            scenario: None,
        }
    }
}

/// Builds a scenario from flag values. Errors name the offending flag.
pub(crate) fn build_scenario(
    args: ScenarioArgs,
    events: Vec<LiquidityEvent>,
) -> Result<Scenario, String> {
    if args.name.trim().is_empty() {
        return Err("--name must not be empty".to_string());
    }
    if args.retirement_age < args.current_age {
        return Err("--retirement-age must be >= --current-age".to_string());
    }
    if args.end_age < args.retirement_age {
        return Err("--end-age must be >= --retirement-age".to_string());
    }
    if args.end_age > MAX_AGE {
        return Err(format!("--end-age must be <= {MAX_AGE}"));
    }
    if !args.current_balance.is_finite() {
        return Err("--current-balance must be finite".to_string());
    }
    if !args.contrib_amount.is_finite() || args.contrib_amount < 0.0 {
        return Err("--contrib-amount must be >= 0".to_string());
    }
    if !args.nominal_return.is_finite() || args.nominal_return <= -100.0 {
        return Err("--nominal-return must be > -100".to_string());
    }
    if !args.return_stdev.is_finite() || args.return_stdev < 0.0 {
        return Err("--return-stdev must be >= 0".to_string());
    }
    if !args.inflation.is_finite() || args.inflation <= -100.0 {
        return Err("--inflation must be > -100".to_string());
    }
    for (name, rate) in [
        ("--fee", args.fee),
        ("--withdrawal-pct", args.withdrawal_pct),
        ("--effective-tax-rate", args.effective_tax_rate),
    ] {
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }
    if !args.withdrawal_real_amount.is_finite() || args.withdrawal_real_amount < 0.0 {
        return Err("--withdrawal-real-amount must be >= 0".to_string());
    }
    if args.mc_runs == 0 || args.mc_runs > MAX_TRIALS {
        return Err(format!("--mc-runs must be between 1 and {MAX_TRIALS}"));
    }
    for event in &events {
        event.validate().map_err(|e| e.to_string())?;
    }

    let scenario = Scenario {
        name: args.name,
        current_age: args.current_age,
        retirement_age: args.retirement_age,
        end_age: args.end_age,
        current_balance: args.current_balance,
        contrib_amount: args.contrib_amount,
        contrib_cadence: args.contrib_cadence.into(),
        nominal_return_pct: args.nominal_return,
        return_stdev_pct: args.return_stdev,
        inflation_pct: args.inflation,
        fee_pct: args.fee,
        withdrawal_method: args.withdrawal_method.into(),
        withdrawal_pct: args.withdrawal_pct,
        withdrawal_real_amount: args.withdrawal_real_amount,
        withdrawal_frequency: args.withdrawal_frequency.into(),
        liquidity_events: events,
        enable_mc: true,
        mc_runs: args.mc_runs,
        enable_taxes: args.enable_taxes,
        effective_tax_rate_pct: args.effective_tax_rate,
        inflation_enabled: !args.no_inflation,
    };
    scenario.validate().map_err(|e| e.to_string())?;
    Ok(scenario)
}

/// Resolves the scenario a command runs on: a stored scenario when
/// `--scenario-file` is given, otherwise the flags plus `--events-file`.
pub(crate) fn resolve_scenario(args: ScenarioArgs) -> Result<Scenario, String> {
    if let Some(path) = &args.scenario_file {
        let name = args
            .scenario
            .as_deref()
            .ok_or_else(|| "--scenario is required with --scenario-file".to_string())?;
        let store = ScenarioStore::load(path).map_err(|e| e.to_string())?;
        let scenario = store
            .get(name)
            .cloned()
            .ok_or_else(|| format!("scenario '{name}' not found in {}", path.display()))?;
        if scenario.end_age > MAX_AGE {
            return Err(format!("scenario '{name}': end_age must be <= {MAX_AGE}"));
        }
        if scenario.mc_runs > MAX_TRIALS {
            return Err(format!("scenario '{name}': mc_runs must be <= {MAX_TRIALS}"));
        }
        return Ok(scenario);
    }

    let events = match &args.events_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("--events-file {}: {e}", path.display()))?;
            serde_json::from_str::<Vec<LiquidityEvent>>(&text)
                .map_err(|e| format!("--events-file {}: {e}", path.display()))?
        }
        None => Vec::new(),
    };
    build_scenario(args, events)
}

/// Executes a non-server command, printing results to stdout.
pub fn run_cli(command: Command) -> Result<(), String> {
    match command {
        Command::Serve { .. } => Err("serve is handled by the async entry point".to_string()),
        Command::Project { scenario, csv } => {
            let scenario = resolve_scenario(scenario)?;
            let timeline =
                build_timeline(&scenario, &scenario.liquidity_events).map_err(|e| e.to_string())?;

            println!(
                "{:>4} {:>14} {:>11} {:>12} {:>12} {:>10} {:>10} {:>12} {:>14} {:>7} {:>14}",
                "age", "start", "contrib", "liquidity", "withdrawal", "fees", "taxes", "growth",
                "end", "cpi", "end (real)"
            );
            for row in &timeline.rows {
                println!(
                    "{:>4} {:>14.0} {:>11.0} {:>12.0} {:>12.0} {:>10.0} {:>10.0} {:>12.0} {:>14.0} {:>7.4} {:>14.0}",
                    row.age,
                    row.start_balance_nominal,
                    row.contributions,
                    row.liquidity_net,
                    row.withdrawals,
                    row.fees,
                    row.taxes,
                    row.growth,
                    row.end_balance_nominal,
                    row.cpi_index,
                    row.end_balance_real
                );
            }
            println!();
            println!("Terminal (nominal): {:.0}", timeline.metrics.terminal_nominal);
            println!("Terminal (real):    {:.0}", timeline.metrics.terminal_real);
            match timeline.metrics.first_shortfall_age {
                Some(age) => println!("First shortfall age: {age}"),
                None => println!("First shortfall age: none"),
            }

            if let Some(path) = csv {
                let text = timeline_csv(&timeline.rows).map_err(|e| e.to_string())?;
                fs::write(&path, text).map_err(|e| format!("--csv {}: {e}", path.display()))?;
                info!(path = %path.display(), rows = timeline.rows.len(), "wrote timeline CSV");
            }
            Ok(())
        }
        Command::MonteCarlo {
            scenario,
            trials,
            seed,
        } => {
            let scenario = resolve_scenario(scenario)?;
            let trials = trials.unwrap_or(scenario.mc_runs);
            if trials == 0 || trials > MAX_TRIALS {
                return Err(format!("--trials must be between 1 and {MAX_TRIALS}"));
            }
            let stats = run_monte_carlo(&scenario, &scenario.liquidity_events, trials, seed)
                .map_err(|e| e.to_string())?;
            println!("Trials: {} (seed {})", stats.trials, stats.seed);
            println!(
                "Probability of no shortfall: {:.1}%",
                stats.probability_no_shortfall * 100.0
            );
            println!("Median terminal: {:.0}", stats.median_terminal);
            println!("P10 terminal:    {:.0}", stats.p10_terminal);
            println!("P90 terminal:    {:.0}", stats.p90_terminal);
            Ok(())
        }
        Command::Swr {
            scenario,
            tolerance,
            max_iterations,
        } => {
            let scenario = resolve_scenario(scenario)?;
            let config = SwrSolveConfig {
                tolerance,
                max_iterations,
            };
            match solve_safe_withdrawal_rate_traced(&scenario, &scenario.liquidity_events, config)
                .map_err(|e| e.to_string())?
            {
                Some(result) => {
                    for it in &result.iterations {
                        println!(
                            "Iter {}: {:.4}% -> min balance {:.0} ({})",
                            it.iteration,
                            it.candidate_rate,
                            it.min_balance,
                            if it.solvent { "solvent" } else { "negative" }
                        );
                    }
                    println!("Safe withdrawal rate: {:.2}%", result.rate);
                }
                None => println!(
                    "Safe withdrawal rate needs --withdrawal-method percent; fixed real withdrawals have no rate"
                ),
            }
            Ok(())
        }
    }
}
