use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{info, warn};

use super::engine::{period_count, simulate_scenario};
use super::error::{EngineError, EngineResult};
use super::metrics::derive_key_metrics;
use super::plan::{Plan, validate_plan};
use super::rng::derive_run_seed;
use super::types::{
    BatchResult, Phase, PercentileRow, RunStatus, RunSummary, SimulationResult, YearlyAggregate,
};

pub const DEFAULT_RUN_COUNT: usize = 500;

#[derive(Debug, Clone, Copy)]
struct PeriodSample {
    total: f64,
    taxes: f64,
    phase: Phase,
}

struct RunRecord {
    summary: RunSummary,
    trajectory: Option<Vec<PeriodSample>>,
}

fn run_one(plan: &Plan, base_seed: u64, index: usize) -> RunRecord {
    let seed = derive_run_seed(base_seed, index);
    match simulate_scenario(plan, plan.simulation_settings.mode, seed) {
        Ok(result) => RunRecord {
            summary: RunSummary {
                index,
                seed,
                status: RunStatus::Completed,
                final_phase: result.final_phase(),
                metrics: Some(derive_key_metrics(&result)),
                error: None,
            },
            trajectory: Some(
                result
                    .data_points
                    .iter()
                    .map(|dp| PeriodSample {
                        total: dp.portfolio.total,
                        taxes: dp.taxes.total_tax,
                        phase: dp.phase,
                    })
                    .collect(),
            ),
        },
        Err(err) => {
            warn!(index, seed, error = %err, "run failed");
            RunRecord {
                summary: RunSummary {
                    index,
                    seed,
                    status: RunStatus::Failed,
                    final_phase: None,
                    metrics: None,
                    error: Some(err.to_string()),
                },
                trajectory: None,
            }
        }
    }
}

pub fn run_batch(plan: &Plan, run_count: usize, base_seed: u64) -> EngineResult<BatchResult> {
    run_batch_with_cancel(plan, run_count, base_seed, &AtomicBool::new(false))
}

/// Runs `run_count` scenarios in parallel. Setting `cancel` stops runs that
/// have not started yet; the result keeps the contiguous prefix of finished
/// runs and reports `cancelled`.
pub fn run_batch_with_cancel(
    plan: &Plan,
    run_count: usize,
    base_seed: u64,
    cancel: &AtomicBool,
) -> EngineResult<BatchResult> {
    if run_count == 0 {
        return Err(EngineError::EmptyBatch);
    }
    validate_plan(plan)?;
    let mode = plan.simulation_settings.mode;
    info!(runs = run_count, base_seed, ?mode, "starting batch");

    let outcomes: Vec<Option<RunRecord>> = (0..run_count)
        .into_par_iter()
        .map(|index| {
            if cancel.load(Ordering::Relaxed) {
                None
            } else {
                Some(run_one(plan, base_seed, index))
            }
        })
        .collect();
    let records: Vec<RunRecord> = outcomes.into_iter().map_while(|r| r).collect();
    let cancelled = records.len() < run_count;

    let trajectories: Vec<&Vec<PeriodSample>> =
        records.iter().filter_map(|r| r.trajectory.as_ref()).collect();
    let completed_runs = trajectories.len();
    let failed_runs = records.len() - completed_runs;
    let successes: f64 = records
        .iter()
        .filter_map(|r| r.summary.metrics.as_ref())
        .map(|m| m.success)
        .sum();
    let success_rate = if completed_runs == 0 {
        0.0
    } else {
        successes / completed_runs as f64
    };

    let (percentiles, yearly) = aggregate_periods(plan, &trajectories);

    info!(
        completed = completed_runs,
        failed = failed_runs,
        cancelled,
        success_rate,
        "batch finished"
    );

    Ok(BatchResult {
        base_seed,
        mode,
        requested_runs: run_count,
        completed_runs,
        failed_runs,
        cancelled,
        success_rate,
        runs: records.into_iter().map(|r| r.summary).collect(),
        percentiles,
        yearly,
    })
}

fn aggregate_periods(
    plan: &Plan,
    trajectories: &[&Vec<PeriodSample>],
) -> (Vec<PercentileRow>, Vec<YearlyAggregate>) {
    let periods = period_count(plan);
    let n = trajectories.len() as f64;
    let mut percentiles = Vec::with_capacity(periods);
    let mut yearly = Vec::with_capacity(periods);

    for period_index in 0..periods {
        let age = plan.timeline.current_age + period_index as f64;
        let year = plan.timeline.start_year + period_index as i32;
        let samples: Vec<PeriodSample> = trajectories
            .iter()
            .filter_map(|t| t.get(period_index).copied())
            .collect();

        let mut totals: Vec<f64> = samples.iter().map(|s| s.total).collect();
        percentiles.push(PercentileRow {
            period_index,
            age,
            year,
            p10: percentile(&mut totals, 10.0),
            p25: percentile(&mut totals, 25.0),
            p50: percentile(&mut totals, 50.0),
            p75: percentile(&mut totals, 75.0),
            p90: percentile(&mut totals, 90.0),
        });

        let share = |phase: Phase| {
            if n == 0.0 {
                0.0
            } else {
                samples.iter().filter(|s| s.phase == phase).count() as f64 / n
            }
        };
        let mean = |value: fn(&PeriodSample) -> f64| {
            if n == 0.0 {
                0.0
            } else {
                samples.iter().map(value).sum::<f64>() / n
            }
        };
        yearly.push(YearlyAggregate {
            period_index,
            age,
            year,
            accumulation: share(Phase::Accumulation),
            retirement: share(Phase::Retirement),
            bankrupt: share(Phase::Bankrupt),
            mean_portfolio: mean(|s| s.total),
            mean_taxes: mean(|s| s.taxes),
        });
    }

    (percentiles, yearly)
}

/// Replays run `index` of a batch with the same seed derivation.
pub fn run_by_index(plan: &Plan, base_seed: u64, index: usize) -> EngineResult<SimulationResult> {
    validate_plan(plan)?;
    simulate_scenario(
        plan,
        plan.simulation_settings.mode,
        derive_run_seed(base_seed, index),
    )
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
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
