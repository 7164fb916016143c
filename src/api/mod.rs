use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::SimulationParams;
use crate::worker::{self, EngineMessage, EngineRequest};

/// HTTP payload for `/api/simulate`. Every field is optional and overrides
/// the CLI defaults; rates are percentages, mirroring the CLI flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    years: Option<u32>,
    sims: Option<u32>,
    expected_return: Option<f64>,
    volatility: Option<f64>,
    ter: Option<f64>,
    bollo: Option<f64>,
    initial: Option<f64>,
    monthly: Option<f64>,
    adjust_inflation: Option<bool>,
    inflation_rate: Option<f64>,
    goal: Option<f64>,
    tax_rate: Option<f64>,
    seed: Option<u32>,
}

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Monte Carlo projection of investment growth (GBM with monthly contributions, fees and capital gains tax)"
)]
struct Cli {
    #[arg(long, default_value_t = 30, help = "Projection horizon in years")]
    years: u32,
    #[arg(long, default_value_t = 10_000, help = "Number of Monte Carlo trials")]
    sims: u32,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Expected annual return in percent, e.g. 5"
    )]
    expected_return: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Annual return volatility in percent"
    )]
    volatility: f64,
    #[arg(
        long,
        default_value_t = 0.2,
        help = "Total expense ratio drag in percent per year"
    )]
    ter: f64,
    #[arg(
        long,
        default_value_t = 0.2,
        help = "Stamp duty drag in percent per year"
    )]
    bollo: f64,
    #[arg(long, default_value_t = 10_000.0, help = "Starting wealth")]
    initial: f64,
    #[arg(long, default_value_t = 500.0, help = "Contribution per month")]
    monthly: f64,
    #[arg(
        long,
        default_value_t = false,
        help = "Step contributions up by inflation once per elapsed year"
    )]
    adjust_inflation: bool,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Annual inflation rate in percent, used to scale contributions"
    )]
    inflation_rate: f64,
    #[arg(long, default_value_t = 100_000.0, help = "Target wealth threshold")]
    goal: f64,
    #[arg(
        long,
        default_value_t = 26.0,
        help = "Tax rate on realized gains in percent"
    )]
    tax_rate: f64,
    #[arg(long, default_value_t = 1, help = "Generator seed; 0 is treated as 1")]
    seed: u32,
}

fn build_params(cli: Cli) -> Result<SimulationParams, String> {
    if cli.years < 1 {
        return Err("--years must be >= 1".to_string());
    }

    if cli.sims < 1 {
        return Err("--sims must be >= 1".to_string());
    }

    for (name, value) in [
        ("--expected-return", cli.expected_return),
        ("--volatility", cli.volatility),
        ("--ter", cli.ter),
        ("--bollo", cli.bollo),
        ("--initial", cli.initial),
        ("--monthly", cli.monthly),
        ("--inflation-rate", cli.inflation_rate),
        ("--goal", cli.goal),
        ("--tax-rate", cli.tax_rate),
    ] {
        if !value.is_finite() {
            return Err(format!("{name} must be a finite number"));
        }
    }

    if cli.volatility < 0.0 {
        return Err("--volatility must be >= 0".to_string());
    }

    if cli.initial < 0.0 {
        return Err("--initial must be >= 0".to_string());
    }

    if cli.monthly < 0.0 {
        return Err("--monthly must be >= 0".to_string());
    }

    if !(0.0..=100.0).contains(&cli.tax_rate) {
        return Err("--tax-rate must be between 0 and 100".to_string());
    }

    if !(0.0..=100.0).contains(&cli.ter) {
        return Err("--ter must be between 0 and 100".to_string());
    }

    if !(0.0..=100.0).contains(&cli.bollo) {
        return Err("--bollo must be between 0 and 100".to_string());
    }

    if cli.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    if cli.goal < 0.0 {
        return Err("--goal must be >= 0".to_string());
    }

    Ok(SimulationParams {
        years: cli.years,
        sims: cli.sims,
        mu: cli.expected_return / 100.0,
        sigma: cli.volatility / 100.0,
        ter: cli.ter / 100.0,
        bollo: cli.bollo / 100.0,
        initial: cli.initial,
        monthly: cli.monthly,
        adj_infl: cli.adjust_inflation,
        infl: cli.inflation_rate / 100.0,
        goal: cli.goal,
        tax: cli.tax_rate / 100.0,
        seed: cli.seed,
    })
}

fn default_cli_for_api() -> Cli {
    Cli {
        years: 30,
        sims: 10_000,
        expected_return: 5.0,
        volatility: 15.0,
        ter: 0.2,
        bollo: 0.2,
        initial: 10_000.0,
        monthly: 500.0,
        adjust_inflation: false,
        inflation_rate: 2.0,
        goal: 100_000.0,
        tax_rate: 26.0,
        seed: 1,
    }
}

fn params_from_payload(payload: SimulatePayload) -> Result<SimulationParams, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.years {
        cli.years = v;
    }
    if let Some(v) = payload.sims {
        cli.sims = v;
    }
    if let Some(v) = payload.expected_return {
        cli.expected_return = v;
    }
    if let Some(v) = payload.volatility {
        cli.volatility = v;
    }
    if let Some(v) = payload.ter {
        cli.ter = v;
    }
    if let Some(v) = payload.bollo {
        cli.bollo = v;
    }
    if let Some(v) = payload.initial {
        cli.initial = v;
    }
    if let Some(v) = payload.monthly {
        cli.monthly = v;
    }
    if let Some(v) = payload.adjust_inflation {
        cli.adjust_inflation = v;
    }
    if let Some(v) = payload.inflation_rate {
        cli.inflation_rate = v;
    }
    if let Some(v) = payload.goal {
        cli.goal = v;
    }
    if let Some(v) = payload.tax_rate {
        cli.tax_rate = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }

    build_params(cli)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("nestegg HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/api/simulate");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    json_response(
        StatusCode::NOT_FOUND,
        EngineMessage::Error {
            message: "Not found".to_string(),
            stack: None,
        },
    )
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let params = match params_from_payload(payload) {
        Ok(params) => params,
        Err(message) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                EngineMessage::Error {
                    message,
                    stack: None,
                },
            );
        }
    };

    let (tx, mut rx) = worker::spawn();
    if tx.send(EngineRequest::Run { params }).is_err() {
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            EngineMessage::Error {
                message: "engine worker unavailable".to_string(),
                stack: None,
            },
        );
    }
    drop(tx);

    // Progress updates are dropped here; HTTP clients only see the terminal
    // message.
    let mut terminal = None;
    while let Some(msg) = rx.recv().await {
        if msg.is_terminal() {
            terminal = Some(msg);
        }
    }

    match terminal {
        Some(msg @ EngineMessage::Result { .. }) => json_response(StatusCode::OK, msg),
        Some(msg) => json_response(StatusCode::INTERNAL_SERVER_ERROR, msg),
        None => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            EngineMessage::Error {
                message: "engine produced no result".to_string(),
                stack: None,
            },
        ),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

#[cfg(test)]
fn params_from_json(json: &str) -> Result<SimulationParams, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    params_from_payload(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_simulation;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        default_cli_for_api()
    }

    #[test]
    fn build_params_converts_percent_rates_to_decimals() {
        let params = build_params(sample_cli()).expect("valid inputs");
        assert_approx(params.mu, 0.05);
        assert_approx(params.sigma, 0.15);
        assert_approx(params.ter, 0.002);
        assert_approx(params.bollo, 0.002);
        assert_approx(params.infl, 0.02);
        assert_approx(params.tax, 0.26);
        assert_eq!(params.years, 30);
        assert_eq!(params.sims, 10_000);
    }

    #[test]
    fn build_params_accepts_zero_seed() {
        let mut cli = sample_cli();
        cli.seed = 0;
        let params = build_params(cli).expect("valid inputs");
        assert_eq!(params.seed, 0);
    }

    #[test]
    fn build_params_rejects_zero_sims() {
        let mut cli = sample_cli();
        cli.sims = 0;
        let err = build_params(cli).expect_err("must reject zero sims");
        assert!(err.contains("--sims"));
    }

    #[test]
    fn build_params_rejects_zero_years() {
        let mut cli = sample_cli();
        cli.years = 0;
        let err = build_params(cli).expect_err("must reject zero years");
        assert!(err.contains("--years"));
    }

    #[test]
    fn build_params_rejects_negative_volatility() {
        let mut cli = sample_cli();
        cli.volatility = -1.0;
        let err = build_params(cli).expect_err("must reject negative volatility");
        assert!(err.contains("--volatility"));
    }

    #[test]
    fn build_params_rejects_out_of_range_tax() {
        let mut cli = sample_cli();
        cli.tax_rate = 150.0;
        let err = build_params(cli).expect_err("must reject tax above 100");
        assert!(err.contains("--tax-rate"));
    }

    #[test]
    fn build_params_rejects_non_finite_rates() {
        let mut cli = sample_cli();
        cli.expected_return = f64::NAN;
        let err = build_params(cli).expect_err("must reject NaN");
        assert!(err.contains("--expected-return"));
    }

    #[test]
    fn build_params_rejects_negative_wealth_inputs() {
        let mut cli = sample_cli();
        cli.initial = -1.0;
        let err = build_params(cli).expect_err("must reject negative initial");
        assert!(err.contains("--initial"));

        let mut cli = sample_cli();
        cli.monthly = -1.0;
        let err = build_params(cli).expect_err("must reject negative monthly");
        assert!(err.contains("--monthly"));
    }

    #[test]
    fn params_from_json_parses_web_keys() {
        let json = r#"{
          "years": 20,
          "sims": 2000,
          "expectedReturn": 6.5,
          "volatility": 18,
          "ter": 0.3,
          "bollo": 0.2,
          "initial": 25000,
          "monthly": 300,
          "adjustInflation": true,
          "inflationRate": 2.5,
          "goal": 250000,
          "taxRate": 26,
          "seed": 9
        }"#;
        let params = params_from_json(json).expect("json should parse");

        assert_eq!(params.years, 20);
        assert_eq!(params.sims, 2000);
        assert_approx(params.mu, 0.065);
        assert_approx(params.sigma, 0.18);
        assert_approx(params.ter, 0.003);
        assert_approx(params.bollo, 0.002);
        assert_approx(params.initial, 25_000.0);
        assert_approx(params.monthly, 300.0);
        assert!(params.adj_infl);
        assert_approx(params.infl, 0.025);
        assert_approx(params.goal, 250_000.0);
        assert_approx(params.tax, 0.26);
        assert_eq!(params.seed, 9);
    }

    #[test]
    fn params_from_json_keeps_defaults_for_missing_keys() {
        let params = params_from_json(r#"{"sims": 50}"#).expect("json should parse");
        assert_eq!(params.sims, 50);
        assert_eq!(params.years, 30);
        assert_approx(params.mu, 0.05);
    }

    #[test]
    fn result_message_serialization_contains_wire_fields() {
        let mut params = build_params(sample_cli()).expect("valid inputs");
        params.years = 2;
        params.sims = 20;
        let result = run_simulation(&params, |_| {}).expect("run succeeds");
        let json =
            serde_json::to_string(&EngineMessage::Result { result }).expect("should serialize");

        assert!(json.contains("\"type\":\"result\""));
        assert!(json.contains("\"p10\""));
        assert!(json.contains("\"p50\""));
        assert!(json.contains("\"p90\""));
        assert!(json.contains("\"probGoal\""));
        assert!(json.contains("\"timelineYears\""));
        assert!(json.contains("\"timelineP10\""));
        assert!(json.contains("\"probGoalByYear\""));
        assert!(json.contains("\"ttgLabels\""));
        assert!(json.contains("\"ttgCounts\""));
        assert!(json.contains("\"ttgMeta\""));
        assert!(json.contains("\"contributedTotal\""));
        assert!(json.contains("\"p50Gross\""));
        assert!(json.contains("\"taxOnP50\""));
        assert!(json.contains("\"histBins\""));
        assert!(json.contains("\"histCounts\""));
        assert!(json.contains("\"csv\""));
    }
}
