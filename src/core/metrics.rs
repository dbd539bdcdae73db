use super::types::{BatchResult, KeyMetrics, Phase, RunStatus, SimulationResult};

/// Final balance a run must stay above to count as a success.
pub const SUCCESS_FLOOR: f64 = 0.10;

pub fn derive_key_metrics(result: &SimulationResult) -> KeyMetrics {
    let points = &result.data_points;
    let retired_at = points.iter().position(|dp| dp.phase == Phase::Retirement);
    let bankruptcy_age = points
        .iter()
        .find(|dp| dp.phase == Phase::Bankrupt)
        .map(|dp| dp.age);

    let retirement_age = retired_at.map(|idx| points[idx].age);
    // Balance carried into the first retired period.
    let portfolio_at_retirement = retired_at.map(|idx| match idx {
        0 => result.context.initial_portfolio,
        _ => points[idx - 1].portfolio.total,
    });
    let progress_to_retirement = portfolio_at_retirement.map(|target| {
        if target <= 0.0 {
            1.0
        } else {
            (result.context.initial_portfolio / target).min(1.0)
        }
    });

    let final_portfolio = points.last().map(|dp| dp.portfolio.total).unwrap_or(0.0);
    let succeeded =
        retired_at.is_some() && bankruptcy_age.is_none() && final_portfolio > SUCCESS_FLOOR;

    KeyMetrics {
        success: if succeeded { 1.0 } else { 0.0 },
        retirement_age,
        years_to_retirement: retirement_age.map(|age| age - result.context.start_age),
        bankruptcy_age,
        portfolio_at_retirement,
        lifetime_taxes: points.iter().map(|dp| dp.taxes.total_tax).sum(),
        lifetime_penalties: points.iter().map(|dp| dp.taxes.penalties).sum(),
        final_portfolio,
        progress_to_retirement,
        underfunded_periods: points
            .iter()
            .filter(|dp| !dp.underfunded_rules.is_empty())
            .count() as f64,
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { None } else { Some(sum / n as f64) }
}

/// Means over the completed runs of a batch. Optional fields average only
/// the runs that have a value.
pub fn derive_batch_key_metrics(batch: &BatchResult) -> KeyMetrics {
    let completed: Vec<&KeyMetrics> = batch
        .runs
        .iter()
        .filter(|run| run.status == RunStatus::Completed)
        .filter_map(|run| run.metrics.as_ref())
        .collect();
    if completed.is_empty() {
        return KeyMetrics::default();
    }

    let mean = |f: fn(&KeyMetrics) -> f64| mean_of(completed.iter().map(|m| f(m))).unwrap_or(0.0);
    let mean_some =
        |f: fn(&KeyMetrics) -> Option<f64>| mean_of(completed.iter().filter_map(|m| f(m)));

    KeyMetrics {
        success: mean(|m| m.success),
        retirement_age: mean_some(|m| m.retirement_age),
        years_to_retirement: mean_some(|m| m.years_to_retirement),
        bankruptcy_age: mean_some(|m| m.bankruptcy_age),
        portfolio_at_retirement: mean_some(|m| m.portfolio_at_retirement),
        lifetime_taxes: mean(|m| m.lifetime_taxes),
        lifetime_penalties: mean(|m| m.lifetime_penalties),
        final_portfolio: mean(|m| m.final_portfolio),
        progress_to_retirement: mean_some(|m| m.progress_to_retirement),
        underfunded_periods: mean(|m| m.underfunded_periods),
    }
}
