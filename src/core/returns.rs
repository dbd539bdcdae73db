use super::history::{self, HistoricalYear};
use super::plan::{MarketAssumptions, Plan, SimulationMode, Volatility};
use super::rng::Lcg;
use super::types::{Phase, ReturnVector, YearRange};

/// Source of per-period market returns for one scenario.
#[derive(Debug, Clone)]
pub enum ReturnsProvider {
    Fixed(MarketAssumptions),
    Stochastic {
        assumptions: MarketAssumptions,
        volatility: Volatility,
        rng: Lcg,
    },
    Historical(HistoricalCursor),
    HistoricalBacktest { cursor: HistoricalCursor, rng: Lcg },
}

#[derive(Debug, Clone)]
pub struct HistoricalCursor {
    next_year: Option<i32>,
    start_override: Option<i32>,
    retirement_override: Option<i32>,
    retirement_applied: bool,
    ranges: Vec<YearRange>,
}

impl HistoricalCursor {
    fn new(start_override: Option<i32>, retirement_override: Option<i32>) -> Self {
        Self {
            next_year: None,
            start_override,
            retirement_override,
            retirement_applied: false,
            ranges: Vec::new(),
        }
    }

    /// Picks the year to replay for this period. `redraw` supplies a fresh
    /// start year for the backtest variant; plain replay passes `None` and
    /// wraps to the first year instead.
    fn advance(&mut self, phase: Phase, mut redraw: Option<&mut Lcg>) -> i32 {
        let retirement_jump = match self.retirement_override {
            Some(year) if phase == Phase::Retirement && !self.retirement_applied => Some(year),
            _ => None,
        };

        let year = if let Some(year) = retirement_jump {
            self.retirement_applied = true;
            year
        } else {
            match self.next_year {
                None => match (self.start_override, redraw.as_deref_mut()) {
                    (Some(year), _) => year,
                    (None, Some(rng)) => draw_year(rng),
                    (None, None) => history::first_year(),
                },
                Some(year) if year > history::last_year() => match redraw.as_deref_mut() {
                    Some(rng) => draw_year(rng),
                    None => history::first_year(),
                },
                Some(year) => year,
            }
        };

        match self.ranges.last_mut() {
            Some(range) if range.end + 1 == year => range.end = year,
            _ => self.ranges.push(YearRange {
                start: year,
                end: year,
            }),
        }
        self.next_year = Some(year + 1);
        year
    }
}

fn draw_year(rng: &mut Lcg) -> i32 {
    history::first_year() + rng.next_index(history::year_count()) as i32
}

fn historical_vector(year: i32) -> ReturnVector {
    // Years come from the table range or validated overrides.
    let row: HistoricalYear = history::historical_year(year)
        .copied()
        .unwrap_or(history::HISTORICAL_YEARS[0]);
    ReturnVector {
        stocks: row.stocks,
        bonds: row.bonds,
        cash: row.cash,
        inflation: row.inflation,
        stock_yield: row.stock_yield,
        bond_yield: row.bond_yield,
        source_year: Some(row.year),
    }
}

fn lognormal_return(mean_return: f64, vol: f64, z: f64) -> f64 {
    let mean = 1.0 + mean_return;
    if vol <= 0.0 || mean <= 0.0 {
        return mean_return;
    }
    let sigma = (1.0 + (vol * vol) / (mean * mean)).ln().sqrt();
    let mu = mean.ln() - sigma * sigma / 2.0;
    (mu + sigma * z).exp() - 1.0
}

fn normal_return(mean: f64, vol: f64, z: f64) -> f64 {
    (mean + vol * z).max(-1.0)
}

fn lognormal_yield(expected: f64, vol: f64, z: f64) -> f64 {
    if expected <= 0.0 {
        return 0.0;
    }
    if vol <= 0.0 {
        return expected;
    }
    let sigma = (1.0 + (vol * vol) / (expected * expected)).ln().sqrt();
    let mu = expected.ln() - sigma * sigma / 2.0;
    (mu + sigma * z).exp()
}

fn sample_market(assumptions: &MarketAssumptions, vol: &Volatility, rng: &mut Lcg) -> ReturnVector {
    // Draw order is part of the reproducibility contract.
    let z_stocks = rng.standard_normal();
    let z_bonds = rng.standard_normal();
    let z_cash = rng.standard_normal();
    let z_inflation = rng.standard_normal();
    let z_stock_yield = rng.standard_normal();
    let z_bond_yield = rng.standard_normal();

    ReturnVector {
        stocks: lognormal_return(assumptions.stock_return, vol.stocks, z_stocks),
        bonds: normal_return(assumptions.bond_return, vol.bonds, z_bonds),
        cash: normal_return(assumptions.cash_return, vol.cash, z_cash),
        inflation: normal_return(assumptions.inflation_rate, vol.inflation, z_inflation),
        stock_yield: lognormal_yield(assumptions.stock_yield, vol.stock_yield, z_stock_yield),
        bond_yield: lognormal_yield(assumptions.bond_yield, vol.bond_yield, z_bond_yield),
        source_year: None,
    }
}

impl ReturnsProvider {
    pub fn for_plan(plan: &Plan, mode: SimulationMode, seed: u64) -> Self {
        let settings = &plan.simulation_settings;
        let cursor = || {
            HistoricalCursor::new(settings.historical_start_year, settings.retirement_start_year)
        };
        match mode {
            SimulationMode::Fixed => ReturnsProvider::Fixed(plan.market_assumptions),
            SimulationMode::Stochastic => ReturnsProvider::Stochastic {
                assumptions: plan.market_assumptions,
                volatility: settings.volatility,
                rng: Lcg::new(seed),
            },
            SimulationMode::Historical => ReturnsProvider::Historical(cursor()),
            SimulationMode::HistoricalBacktest => ReturnsProvider::HistoricalBacktest {
                cursor: cursor(),
                rng: Lcg::new(seed),
            },
        }
    }

    /// Returns for `period_index`. Called once per period in increasing order;
    /// `phase` is the phase the period runs in.
    pub fn next_returns(&mut self, period_index: usize, phase: Phase) -> ReturnVector {
        tracing::trace!(period_index, ?phase, "drawing returns");
        match self {
            ReturnsProvider::Fixed(assumptions) => ReturnVector {
                stocks: assumptions.stock_return,
                bonds: assumptions.bond_return,
                cash: assumptions.cash_return,
                inflation: assumptions.inflation_rate,
                stock_yield: assumptions.stock_yield,
                bond_yield: assumptions.bond_yield,
                source_year: None,
            },
            ReturnsProvider::Stochastic {
                assumptions,
                volatility,
                rng,
            } => sample_market(assumptions, volatility, rng),
            ReturnsProvider::Historical(cursor) => historical_vector(cursor.advance(phase, None)),
            ReturnsProvider::HistoricalBacktest { cursor, rng } => {
                historical_vector(cursor.advance(phase, Some(rng)))
            }
        }
    }

    pub fn historical_ranges(&self) -> &[YearRange] {
        match self {
            ReturnsProvider::Historical(cursor)
            | ReturnsProvider::HistoricalBacktest { cursor, .. } => &cursor.ranges,
            ReturnsProvider::Fixed(_) | ReturnsProvider::Stochastic { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::fixtures::base_plan;
    use crate::core::plan::RetirementStrategy;
    use crate::core::rng::{lcg_next, seed_state};
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};

    fn plan_with(mode: SimulationMode, start: Option<i32>, retire: Option<i32>) -> Plan {
        let mut plan = base_plan(40.0, 90.0, RetirementStrategy::FixedAge { age: 65.0 });
        plan.market_assumptions = MarketAssumptions::default();
        plan.simulation_settings.mode = mode;
        plan.simulation_settings.historical_start_year = start;
        plan.simulation_settings.retirement_start_year = retire;
        plan
    }

    #[test]
    fn fixed_returns_assumptions_verbatim() {
        let plan = plan_with(SimulationMode::Fixed, None, None);
        let mut provider = ReturnsProvider::for_plan(&plan, SimulationMode::Fixed, 1);
        for period in 0..3 {
            let r = provider.next_returns(period, Phase::Accumulation);
            assert_eq!(r.stocks, 0.07);
            assert_eq!(r.bonds, 0.02);
            assert_eq!(r.cash, 0.0);
            assert_eq!(r.inflation, 0.03);
            assert_eq!(r.source_year, None);
        }
    }

    #[test]
    fn historical_first_period_matches_table_exactly() {
        let plan = plan_with(SimulationMode::Historical, Some(1966), None);
        let mut provider = ReturnsProvider::for_plan(&plan, SimulationMode::Historical, 7);
        let r = provider.next_returns(0, Phase::Accumulation);
        let row = history::historical_year(1966).expect("row");
        assert_eq!(r.stocks, row.stocks);
        assert_eq!(r.bonds, row.bonds);
        assert_eq!(r.source_year, Some(1966));
    }

    #[test]
    fn historical_replay_wraps_to_first_year() {
        let plan = plan_with(SimulationMode::Historical, Some(2023), None);
        let mut provider = ReturnsProvider::for_plan(&plan, SimulationMode::Historical, 7);
        let years: Vec<_> = (0..4)
            .map(|p| provider.next_returns(p, Phase::Accumulation).source_year)
            .collect();
        assert_eq!(years, vec![Some(2023), Some(2024), Some(1928), Some(1929)]);
        assert_eq!(
            provider.historical_ranges(),
            &[
                YearRange { start: 2023, end: 2024 },
                YearRange { start: 1928, end: 1929 }
            ]
        );
    }

    #[test]
    fn backtest_overflow_draws_new_year_from_rng() {
        let seed = 12_345;
        let plan = plan_with(SimulationMode::HistoricalBacktest, Some(2024), None);
        let mut provider = ReturnsProvider::for_plan(&plan, SimulationMode::HistoricalBacktest, seed);
        assert_eq!(provider.next_returns(0, Phase::Accumulation).source_year, Some(2024));

        // The start override consumed no draws, so the overflow uses the first one.
        let (u1, state) = lcg_next(seed_state(seed));
        let looped = 1928 + (u1 * 97.0).floor() as i32;
        assert_eq!(provider.next_returns(1, Phase::Accumulation).source_year, Some(looped));

        let following = if looped == 2024 {
            let (u2, _) = lcg_next(state);
            1928 + (u2 * 97.0).floor() as i32
        } else {
            looped + 1
        };
        assert_eq!(provider.next_returns(2, Phase::Accumulation).source_year, Some(following));
    }

    #[test]
    fn retirement_override_jumps_once() {
        let plan = plan_with(SimulationMode::Historical, Some(1950), Some(1929));
        let mut provider = ReturnsProvider::for_plan(&plan, SimulationMode::Historical, 7);
        let phases = [
            Phase::Accumulation,
            Phase::Accumulation,
            Phase::Retirement,
            Phase::Retirement,
        ];
        let years: Vec<_> = phases
            .iter()
            .enumerate()
            .map(|(p, phase)| provider.next_returns(p, *phase).source_year)
            .collect();
        assert_eq!(years, vec![Some(1950), Some(1951), Some(1929), Some(1930)]);
    }

    #[test]
    fn stochastic_with_zero_volatility_returns_means() {
        let mut plan = plan_with(SimulationMode::Stochastic, None, None);
        plan.simulation_settings.volatility = Volatility {
            stocks: 0.0,
            bonds: 0.0,
            cash: 0.0,
            inflation: 0.0,
            stock_yield: 0.0,
            bond_yield: 0.0,
        };
        let mut provider = ReturnsProvider::for_plan(&plan, SimulationMode::Stochastic, 99);
        let r = provider.next_returns(0, Phase::Accumulation);
        assert_eq!(r.stocks, 0.07);
        assert_eq!(r.bonds, 0.02);
        assert_eq!(r.stock_yield, 0.02);
        assert_eq!(r.bond_yield, 0.04);
    }

    #[test]
    fn lognormal_return_preserves_arithmetic_mean_at_zero_shock() {
        // exp(mu) - 1 sits below the mean by the variance correction.
        let r = lognormal_return(0.07, 0.18, 0.0);
        assert!(r < 0.07 && r > 0.05, "got {r}");
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_backtest_is_reproducible_and_in_range(seed in any::<u64>()) {
            let plan = plan_with(SimulationMode::HistoricalBacktest, None, None);
            let mut a = ReturnsProvider::for_plan(&plan, SimulationMode::HistoricalBacktest, seed);
            let mut b = ReturnsProvider::for_plan(&plan, SimulationMode::HistoricalBacktest, seed);
            for period in 0..150 {
                let ra = a.next_returns(period, Phase::Accumulation);
                let rb = b.next_returns(period, Phase::Accumulation);
                prop_assert_eq!(ra, rb);
                let year = ra.source_year.unwrap_or_default();
                prop_assert!((1928..=2024).contains(&year));
            }
        }

        #[test]
        fn prop_stochastic_returns_are_bounded_below(seed in any::<u64>()) {
            let plan = plan_with(SimulationMode::Stochastic, None, None);
            let mut provider = ReturnsProvider::for_plan(&plan, SimulationMode::Stochastic, seed);
            for period in 0..60 {
                let r = provider.next_returns(period, Phase::Retirement);
                prop_assert!(r.stocks > -1.0 && r.bonds >= -1.0 && r.cash >= -1.0);
                prop_assert!(r.stock_yield >= 0.0 && r.bond_yield >= 0.0);
            }
        }
    }
}
