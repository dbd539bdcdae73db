use axum::{
    Router,
    extract::{Json, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    BatchResult, DEFAULT_RUN_COUNT, EngineError, KeyMetrics, Plan, SimulationMode,
    SimulationResult, derive_batch_key_metrics, derive_key_metrics, run_batch, run_by_index,
    run_single,
};

/// Upper bound on runs accepted over HTTP.
const MAX_HTTP_RUNS: usize = 10_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliMode {
    Fixed,
    Stochastic,
    Historical,
    HistoricalBacktest,
}

impl From<CliMode> for SimulationMode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Fixed => SimulationMode::Fixed,
            CliMode::Stochastic => SimulationMode::Stochastic,
            CliMode::Historical => SimulationMode::Historical,
            CliMode::HistoricalBacktest => SimulationMode::HistoricalBacktest,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "fire-sim",
    about = "Year-by-year FIRE plan simulator (deterministic, stochastic and historical runs)"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scenario and print its data points and key metrics as JSON.
    Simulate {
        #[arg(long, help = "Path to a plan JSON file")]
        plan: PathBuf,
        #[arg(long, value_enum, help = "Overrides simulationSettings.mode")]
        mode: Option<CliMode>,
        #[arg(long, help = "Overrides simulationSettings.seed")]
        seed: Option<u64>,
    },
    /// Run a Monte Carlo batch and print the aggregate as JSON.
    Batch {
        #[arg(long, help = "Path to a plan JSON file")]
        plan: PathBuf,
        #[arg(long, default_value_t = DEFAULT_RUN_COUNT)]
        runs: usize,
        #[arg(long, value_enum, help = "Overrides simulationSettings.mode")]
        mode: Option<CliMode>,
        #[arg(long, help = "Base seed; defaults to simulationSettings.seed")]
        seed: Option<u64>,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid plan JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    #[serde(flatten)]
    result: SimulationResult,
    key_metrics: KeyMetrics,
}

impl From<SimulationResult> for SimulateResponse {
    fn from(result: SimulationResult) -> Self {
        let key_metrics = derive_key_metrics(&result);
        Self {
            result,
            key_metrics,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    #[serde(flatten)]
    batch: BatchResult,
    key_metrics: KeyMetrics,
}

impl From<BatchResult> for BatchResponse {
    fn from(batch: BatchResult) -> Self {
        let key_metrics = derive_batch_key_metrics(&batch);
        Self { batch, key_metrics }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulatePayload {
    plan: Plan,
    #[serde(default)]
    mode: Option<SimulationMode>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchPayload {
    plan: Plan,
    #[serde(default)]
    runs: Option<usize>,
    #[serde(default)]
    mode: Option<SimulationMode>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRunPayload {
    plan: Plan,
    index: usize,
    #[serde(default)]
    mode: Option<SimulationMode>,
    #[serde(default)]
    seed: Option<u64>,
}

fn read_plan(path: &Path) -> Result<Plan, CliError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Applies request overrides to the plan's simulation settings. Returns the
/// plan to run.
fn with_overrides(mut plan: Plan, mode: Option<SimulationMode>, seed: Option<u64>) -> Plan {
    if let Some(mode) = mode {
        plan.simulation_settings.mode = mode;
    }
    if let Some(seed) = seed {
        plan.simulation_settings.seed = seed;
    }
    plan
}

fn simulate(plan: Plan) -> Result<SimulateResponse, EngineError> {
    let mode = plan.simulation_settings.mode;
    Ok(run_single(&plan, mode)?.into())
}

fn batch(plan: Plan, runs: usize) -> Result<BatchResponse, EngineError> {
    let seed = plan.simulation_settings.seed;
    Ok(run_batch(&plan, runs, seed)?.into())
}

pub async fn run_cli(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Simulate { plan, mode, seed } => {
            let plan = with_overrides(read_plan(&plan)?, mode.map(Into::into), seed);
            let response = simulate(plan)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Batch {
            plan,
            runs,
            mode,
            seed,
        } => {
            let plan = with_overrides(read_plan(&plan)?, mode.map(Into::into), seed);
            let response = tokio::task::spawn_blocking(move || batch(plan, runs))
                .await
                .map_err(std::io::Error::other)??;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Serve { port } => run_http_server(port).await?,
    }
    Ok(())
}

pub fn router() -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_handler))
        .route("/api/batch", post(batch_handler))
        .route("/api/batch/run", post(batch_run_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "fire-sim HTTP API listening");

    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(payload: Result<Json<SimulatePayload>, JsonRejection>) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };
    let plan = with_overrides(payload.plan, payload.mode, payload.seed);
    blocking_json(move || simulate(plan)).await
}

async fn batch_handler(payload: Result<Json<BatchPayload>, JsonRejection>) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };
    let runs = payload.runs.unwrap_or(DEFAULT_RUN_COUNT);
    if runs > MAX_HTTP_RUNS {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("runs must be at most {MAX_HTTP_RUNS}"),
        );
    }
    let plan = with_overrides(payload.plan, payload.mode, payload.seed);
    blocking_json(move || batch(plan, runs)).await
}

async fn batch_run_handler(payload: Result<Json<BatchRunPayload>, JsonRejection>) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };
    let plan = with_overrides(payload.plan, payload.mode, payload.seed);
    let index = payload.index;
    blocking_json(move || {
        let base_seed = plan.simulation_settings.seed;
        run_by_index(&plan, base_seed, index).map(SimulateResponse::from)
    })
    .await
}

/// Runs engine work off the async runtime and maps the outcome to a response.
async fn blocking_json<T, F>(work: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(err)) => engine_error_response(&err),
        Err(join) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &join.to_string()),
    }
}

fn engine_error_response(err: &EngineError) -> Response {
    let status = match err {
        EngineError::InvalidPlan(_) | EngineError::EmptyBatch => StatusCode::BAD_REQUEST,
        EngineError::NumericFault { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };
    error_response(status, &err.to_string())
}

fn rejection_response(rejection: JsonRejection) -> Response {
    error_response(rejection.status(), &rejection.body_text())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
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
