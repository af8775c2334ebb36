use axum::{
    Router,
    extract::Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    EventKind, LiquidityEvent, Metrics, MonteCarloStats, Recurrence, Scenario, SwrIteration,
    SwrSolveConfig, Timeline, build_timeline, compare_scenarios, run_monte_carlo,
    solve_safe_withdrawal_rate_traced,
};
use crate::error::ProjectionError;

mod cli;

pub use cli::{Cli, Command, ScenarioArgs, run_cli};
use cli::{CliCadence, CliWithdrawalMethod, MAX_TRIALS, build_scenario};

const DEFAULT_SEED: u64 = 42;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiCadence {
    #[serde(alias = "Monthly")]
    Monthly,
    #[serde(alias = "Annual", alias = "yearly")]
    Annual,
}

impl From<ApiCadence> for CliCadence {
    fn from(value: ApiCadence) -> Self {
        match value {
            ApiCadence::Monthly => CliCadence::Monthly,
            ApiCadence::Annual => CliCadence::Annual,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiWithdrawalMethod {
    #[serde(
        alias = "percentOfPriorBalance",
        alias = "percent_of_prior_balance",
        alias = "Fixed % of prior-year end balance"
    )]
    Percent,
    #[serde(
        alias = "fixedReal",
        alias = "fixed_real",
        alias = "Fixed real dollars",
        alias = "Fixed real amount"
    )]
    FixedReal,
}

impl From<ApiWithdrawalMethod> for CliWithdrawalMethod {
    fn from(value: ApiWithdrawalMethod) -> Self {
        match value {
            ApiWithdrawalMethod::Percent => CliWithdrawalMethod::Percent,
            ApiWithdrawalMethod::FixedReal => CliWithdrawalMethod::FixedReal,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiEventKind {
    #[serde(alias = "Credit")]
    Credit,
    #[serde(alias = "Debit")]
    Debit,
}

impl From<ApiEventKind> for EventKind {
    fn from(value: ApiEventKind) -> Self {
        match value {
            ApiEventKind::Credit => EventKind::Credit,
            ApiEventKind::Debit => EventKind::Debit,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiRecurrence {
    #[serde(alias = "oneTime", alias = "one_time", alias = "One-time")]
    OneTime,
    #[serde(alias = "Annual")]
    Annual,
    #[serde(alias = "Monthly")]
    Monthly,
}

impl From<ApiRecurrence> for Recurrence {
    fn from(value: ApiRecurrence) -> Self {
        match value {
            ApiRecurrence::OneTime => Recurrence::OneTime,
            ApiRecurrence::Annual => Recurrence::Annual,
            ApiRecurrence::Monthly => Recurrence::Monthly,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiLiquidityEvent {
    #[serde(rename = "type", alias = "kind")]
    kind: ApiEventKind,
    label: String,
    start_age: u32,
    end_age: u32,
    amount: f64,
    recurrence: ApiRecurrence,
    enabled: Option<bool>,
    #[serde(default)]
    taxable: bool,
    #[serde(default)]
    tax_rate: f64,
}

impl From<ApiLiquidityEvent> for LiquidityEvent {
    fn from(value: ApiLiquidityEvent) -> Self {
        LiquidityEvent {
            kind: value.kind.into(),
            label: value.label,
            start_age: value.start_age,
            end_age: value.end_age,
            amount: value.amount,
            recurrence: value.recurrence.into(),
            enabled: value.enabled.unwrap_or(true),
            taxable: value.taxable,
            tax_rate: value.tax_rate,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScenarioPayload {
    name: Option<String>,
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    end_age: Option<u32>,
    current_balance: Option<f64>,
    #[serde(alias = "contribution")]
    contrib_amount: Option<f64>,
    contrib_cadence: Option<ApiCadence>,
    #[serde(alias = "nominalReturnPct")]
    nominal_return: Option<f64>,
    #[serde(alias = "returnStdevPct")]
    return_stdev: Option<f64>,
    #[serde(alias = "inflationPct")]
    inflation: Option<f64>,
    inflation_enabled: Option<bool>,
    #[serde(alias = "feePct")]
    fee: Option<f64>,
    withdrawal_method: Option<ApiWithdrawalMethod>,
    withdrawal_pct: Option<f64>,
    withdrawal_real_amount: Option<f64>,
    withdrawal_frequency: Option<ApiCadence>,
    enable_taxes: Option<bool>,
    #[serde(alias = "effectiveTaxRatePct")]
    effective_tax_rate: Option<f64>,
    mc_runs: Option<u32>,
    #[serde(alias = "liquidityEvents")]
    events: Option<Vec<ApiLiquidityEvent>>,

    trials: Option<u32>,
    seed: Option<u64>,
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComparePayload {
    a: ScenarioPayload,
    b: ScenarioPayload,
    #[serde(default)]
    monte_carlo: bool,
}

#[derive(Debug)]
struct ApiRequest {
    scenario: Scenario,
    trials: u32,
    seed: u64,
    swr: SwrSolveConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimelineResponse {
    scenario: String,
    #[serde(flatten)]
    timeline: Timeline,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonteCarloResponse {
    scenario: String,
    metrics: Metrics,
    stats: MonteCarloStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwrResponse {
    scenario: String,
    applicable: bool,
    rate: Option<f64>,
    converged: Option<bool>,
    iterations: Vec<SwrIteration>,
    tolerance: f64,
    max_iterations: u32,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/timeline", post(timeline_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .route("/api/swr", post(swr_handler))
        .route("/api/compare", post(compare_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "projection HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn timeline_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(e) => return rejected("/api/timeline", &e),
    };
    info!(scenario = %request.scenario.name, "timeline request");

    let scenario = request.scenario;
    match build_timeline(&scenario, &scenario.liquidity_events) {
        Ok(timeline) => json_response(
            StatusCode::OK,
            TimelineResponse {
                scenario: scenario.name,
                timeline,
            },
        ),
        Err(e) => projection_error_response(&e),
    }
}

async fn monte_carlo_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(e) => return rejected("/api/monte-carlo", &e),
    };
    info!(
        scenario = %request.scenario.name,
        trials = request.trials,
        seed = request.seed,
        "monte carlo request"
    );

    match build_monte_carlo_response(request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => projection_error_response(&e),
    }
}

async fn swr_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(e) => return rejected("/api/swr", &e),
    };
    info!(scenario = %request.scenario.name, "safe withdrawal rate request");

    match build_swr_response(request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => projection_error_response(&e),
    }
}

async fn compare_handler(Json(payload): Json<ComparePayload>) -> Response {
    let monte_carlo = payload.monte_carlo;
    let (a, b) = match (
        compare_side_from_payload(payload.a),
        compare_side_from_payload(payload.b),
    ) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) => return rejected("/api/compare", &format!("scenario a: {e}")),
        (_, Err(e)) => return rejected("/api/compare", &format!("scenario b: {e}")),
    };
    info!(a = %a.scenario.name, b = %b.scenario.name, monte_carlo, "compare request");

    match compare_scenarios(
        (&a.scenario, &a.scenario.liquidity_events),
        (&b.scenario, &b.scenario.liquidity_events),
        monte_carlo.then_some(a.seed),
    ) {
        Ok(comparison) => json_response(StatusCode::OK, comparison),
        Err(e) => projection_error_response(&e),
    }
}

/// A comparison side runs its resolved trial count; `trials` overrides
/// `mcRuns` the same way it does for `/api/monte-carlo`.
fn compare_side_from_payload(payload: ScenarioPayload) -> Result<ApiRequest, String> {
    let mut request = api_request_from_payload(payload)?;
    request.scenario.mc_runs = request.trials;
    Ok(request)
}

fn build_monte_carlo_response(request: ApiRequest) -> Result<MonteCarloResponse, ProjectionError> {
    let scenario = request.scenario;
    let events = &scenario.liquidity_events;
    let timeline = build_timeline(&scenario, events)?;
    let stats = run_monte_carlo(&scenario, events, request.trials, request.seed)?;
    Ok(MonteCarloResponse {
        metrics: timeline.metrics.with_monte_carlo(&stats),
        stats,
        scenario: scenario.name,
    })
}

fn build_swr_response(request: ApiRequest) -> Result<SwrResponse, ProjectionError> {
    let scenario = request.scenario;
    let result =
        solve_safe_withdrawal_rate_traced(&scenario, &scenario.liquidity_events, request.swr)?;
    let response = match result {
        Some(result) => SwrResponse {
            scenario: scenario.name,
            applicable: true,
            rate: Some(result.rate),
            converged: Some(result.converged),
            iterations: result.iterations,
            tolerance: request.swr.tolerance,
            max_iterations: request.swr.max_iterations,
        },
        None => SwrResponse {
            scenario: scenario.name,
            applicable: false,
            rate: None,
            converged: None,
            iterations: Vec::new(),
            tolerance: request.swr.tolerance,
            max_iterations: request.swr.max_iterations,
        },
    };
    Ok(response)
}

fn rejected(route: &str, msg: &str) -> Response {
    warn!(route, error = msg, "rejected request");
    error_response(StatusCode::BAD_REQUEST, msg)
}

fn projection_error_response(err: &ProjectionError) -> Response {
    let status = match err {
        ProjectionError::Store(_) | ProjectionError::Export(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    };
    warn!(error = %err, "projection failed");
    error_response(status, &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<ScenarioPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: ScenarioPayload) -> Result<ApiRequest, String> {
    let mut args = ScenarioArgs::default();

    if let Some(v) = payload.name {
        args.name = v;
    }
    if let Some(v) = payload.current_age {
        args.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        args.retirement_age = v;
    }
    if let Some(v) = payload.end_age {
        args.end_age = v;
    }
    if let Some(v) = payload.current_balance {
        args.current_balance = v;
    }
    if let Some(v) = payload.contrib_amount {
        args.contrib_amount = v;
    }
    if let Some(v) = payload.contrib_cadence {
        args.contrib_cadence = v.into();
    }
    if let Some(v) = payload.nominal_return {
        args.nominal_return = v;
    }
    if let Some(v) = payload.return_stdev {
        args.return_stdev = v;
    }
    if let Some(v) = payload.inflation {
        args.inflation = v;
    }
    if let Some(v) = payload.inflation_enabled {
        args.no_inflation = !v;
    }
    if let Some(v) = payload.fee {
        args.fee = v;
    }
    if let Some(v) = payload.withdrawal_method {
        args.withdrawal_method = v.into();
    }
    if let Some(v) = payload.withdrawal_pct {
        args.withdrawal_pct = v;
    }
    if let Some(v) = payload.withdrawal_real_amount {
        args.withdrawal_real_amount = v;
    }
    if let Some(v) = payload.withdrawal_frequency {
        args.withdrawal_frequency = v.into();
    }
    if let Some(v) = payload.enable_taxes {
        args.enable_taxes = v;
    }
    if let Some(v) = payload.effective_tax_rate {
        args.effective_tax_rate = v;
    }
    if let Some(v) = payload.mc_runs {
        args.mc_runs = v;
    }

    let events = payload
        .events
        .unwrap_or_default()
        .into_iter()
        .map(LiquidityEvent::from)
        .collect();
    let scenario = build_scenario(args, events)?;

    let trials = payload.trials.unwrap_or(scenario.mc_runs);
    if trials == 0 || trials > MAX_TRIALS {
        return Err(format!("trials must be between 1 and {MAX_TRIALS}"));
    }
    let defaults = SwrSolveConfig::default();
    let swr = SwrSolveConfig {
        tolerance: payload.tolerance.unwrap_or(defaults.tolerance),
        max_iterations: payload.max_iterations.unwrap_or(defaults.max_iterations),
    };
    if !(swr.tolerance.is_finite() && swr.tolerance > 0.0) {
        return Err("tolerance must be > 0".to_string());
    }
    if swr.max_iterations == 0 {
        return Err("maxIterations must be > 0".to_string());
    }

    Ok(ApiRequest {
        scenario,
        trials,
        seed: payload.seed.unwrap_or(DEFAULT_SEED),
        swr,
    })
}
