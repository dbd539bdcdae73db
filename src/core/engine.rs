use std::collections::HashMap;

use tracing::debug;

use super::accounts::AccountState;
use super::cashflow::{
    CASH_EPSILON, TaxLedger, apply_contributions, ordered_rules, settle_taxes, take_rmds,
    withdraw_for_shortfall,
};
use super::error::{EngineError, EngineResult};
use super::plan::{
    BaseContributionRule, ContributionRule, Frequency, Growth, IncomeTaxTreatment, Plan,
    RetirementStrategy, SimulationMode, TaxCategory, TimePoint, Timeframe, validate_plan,
};
use super::returns::ReturnsProvider;
use super::tax::payroll_tax;
use super::types::{
    AssetAmounts, CashFlowSummary, Phase, PortfolioTotals, ReturnVector, SimulationContext,
    SimulationDataPoint, SimulationResult, TaxBreakdown,
};

/// Runs one scenario with the plan's own seed.
pub fn run_single(plan: &Plan, mode: SimulationMode) -> EngineResult<SimulationResult> {
    validate_plan(plan)?;
    simulate_scenario(plan, mode, plan.simulation_settings.seed)
}

/// Number of annual periods from the current age through life expectancy.
pub(crate) fn period_count(plan: &Plan) -> usize {
    let span = plan.timeline.life_expectancy - plan.timeline.current_age;
    if span < 0.0 {
        0
    } else {
        span.floor() as usize + 1
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PeriodClock {
    pub period_index: usize,
    pub age: f64,
    pub year: i32,
    pub phase: Phase,
    pub life_expectancy: f64,
}

impl PeriodClock {
    pub(crate) fn for_period(plan: &Plan, period_index: usize, phase: Phase) -> Self {
        Self {
            period_index,
            age: plan.timeline.current_age + period_index as f64,
            year: plan.timeline.start_year + period_index as i32,
            phase,
            life_expectancy: plan.timeline.life_expectancy,
        }
    }
}

fn start_fraction(point: &TimePoint, clock: &PeriodClock) -> f64 {
    let active = match *point {
        TimePoint::Now => true,
        TimePoint::AtRetirement => clock.phase == Phase::Retirement,
        TimePoint::AtLifeExpectancy => clock.age >= clock.life_expectancy,
        TimePoint::CustomAge { age } => clock.age >= age,
        TimePoint::CustomDate { year, month } => {
            if clock.year == year {
                return f64::from(13 - month.clamp(1, 12)) / 12.0;
            }
            clock.year > year
        }
    };
    if active { 1.0 } else { 0.0 }
}

fn end_fraction(point: &TimePoint, clock: &PeriodClock) -> f64 {
    let active = match *point {
        TimePoint::Now => false,
        TimePoint::AtRetirement => clock.phase != Phase::Retirement,
        TimePoint::AtLifeExpectancy => true,
        TimePoint::CustomAge { age } => clock.age <= age,
        TimePoint::CustomDate { year, month } => {
            if clock.year == year {
                return f64::from(month.clamp(1, 12)) / 12.0;
            }
            clock.year < year
        }
    };
    if active { 1.0 } else { 0.0 }
}

/// Share of the period a timeframe covers. Calendar-date bounds are prorated
/// by month.
pub(crate) fn active_fraction(timeframe: &Timeframe, clock: &PeriodClock) -> f64 {
    if let (TimePoint::CustomDate { year: ys, month: ms }, Some(TimePoint::CustomDate { year: ye, month: me })) =
        (timeframe.start, timeframe.end)
    {
        if ys == ye && ys == clock.year {
            return f64::from((me + 1).saturating_sub(ms).min(12)) / 12.0;
        }
    }
    let start = start_fraction(&timeframe.start, clock);
    let end = timeframe
        .end
        .map(|point| end_fraction(&point, clock))
        .unwrap_or(1.0);
    start * end
}

/// Real annual amount of a scheduled income or expense for this period.
/// Nominal growth compounds once per elapsed period and is deflated by
/// `price_level`, the compounded inflation those periods actually saw. A cap
/// bounds the grown amount in the direction of growth.
pub(crate) fn scheduled_amount(
    amount: f64,
    frequency: Frequency,
    growth: Option<&Growth>,
    price_level: f64,
    clock: &PeriodClock,
    fraction: f64,
    one_time_done: bool,
) -> f64 {
    if fraction <= 0.0 || (frequency == Frequency::OneTime && one_time_done) {
        return 0.0;
    }
    let nominal = growth.map(|g| g.rate).unwrap_or(0.0);
    let mut annual = amount * frequency.times_per_year()
        * (1.0 + nominal).powi(clock.period_index as i32)
        / price_level;
    if let Some(cap) = growth.and_then(|g| g.cap) {
        if nominal > 0.0 {
            annual = annual.min(cap);
        } else if nominal < 0.0 {
            annual = annual.max(cap);
        }
    }
    match frequency {
        Frequency::OneTime => annual,
        _ => annual * fraction,
    }
}

fn returns_are_finite(r: &ReturnVector) -> bool {
    [r.stocks, r.bonds, r.cash, r.inflation, r.stock_yield, r.bond_yield]
        .iter()
        .all(|v| v.is_finite())
}

struct Scenario<'a> {
    plan: &'a Plan,
    rules: Vec<&'a ContributionRule>,
    accounts: Vec<AccountState>,
    account_index: HashMap<String, usize>,
    bucket: usize,
    phase: Phase,
    income_paid_once: Vec<bool>,
    expense_paid_once: Vec<bool>,
    loss_carryover: f64,
    /// Compounded realized inflation of the periods run so far.
    price_level: f64,
}

impl<'a> Scenario<'a> {
    fn new(plan: &'a Plan) -> Self {
        let mut accounts: Vec<AccountState> =
            plan.accounts.iter().map(AccountState::from_plan).collect();
        accounts.push(AccountState::savings_bucket());
        let bucket = accounts.len() - 1;
        let account_index = accounts
            .iter()
            .enumerate()
            .map(|(idx, a)| (a.id.clone(), idx))
            .collect();

        Self {
            plan,
            rules: ordered_rules(&plan.contribution_rules),
            accounts,
            account_index,
            bucket,
            phase: Phase::Accumulation,
            income_paid_once: vec![false; plan.incomes.len()],
            expense_paid_once: vec![false; plan.expenses.len()],
            loss_carryover: 0.0,
            price_level: 1.0,
        }
    }

    fn portfolio_total(&self) -> f64 {
        self.accounts.iter().map(|a| a.balance).sum()
    }

    fn expense_total(&self, clock: &PeriodClock) -> f64 {
        let price_level = self.price_level;
        self.plan
            .expenses
            .iter()
            .zip(&self.expense_paid_once)
            .map(|(e, &done)| {
                let fraction = active_fraction(&e.timeframe, clock);
                scheduled_amount(e.amount, e.frequency, e.growth.as_ref(), price_level, clock, fraction, done)
            })
            .sum()
    }

    fn charge_expenses(&mut self, clock: &PeriodClock) -> f64 {
        let total = self.expense_total(clock);
        for (expense, done) in self.plan.expenses.iter().zip(self.expense_paid_once.iter_mut()) {
            if expense.frequency == Frequency::OneTime
                && !*done
                && active_fraction(&expense.timeframe, clock) > 0.0
            {
                *done = true;
            }
        }
        total
    }

    fn retirement_reached(&self, clock: &PeriodClock) -> bool {
        match self.plan.timeline.retirement_strategy {
            RetirementStrategy::FixedAge { age } => clock.age >= age,
            RetirementStrategy::SwrTarget { rate } => {
                let retired = PeriodClock {
                    phase: Phase::Retirement,
                    ..*clock
                };
                self.portfolio_total() * rate >= self.expense_total(&retired)
            }
        }
    }

    fn accrue_yields(&mut self, returns: &ReturnVector, ledger: &mut TaxLedger) {
        for account in &mut self.accounts {
            match account.category() {
                TaxCategory::Taxable => {
                    let values = account.asset_values();
                    let dividends = values.stocks * returns.stock_yield;
                    let interest =
                        values.bonds * returns.bond_yield + values.cash * returns.cash.max(0.0);
                    ledger.dividends += dividends;
                    ledger.interest += interest;
                    // reinvested
                    account.cost_basis += dividends + interest;
                }
                TaxCategory::CashSavings => {
                    ledger.interest += account.balance * returns.cash.max(0.0);
                }
                TaxCategory::TaxDeferred | TaxCategory::TaxFree => {}
            }
        }
    }

    fn dispose_surplus(&mut self, amount: f64, flow: &mut CashFlowSummary) {
        if amount <= 0.0 {
            return;
        }
        match self.plan.base_contribution_rule {
            BaseContributionRule::Save => {
                self.accounts[self.bucket].deposit(amount);
                flow.saved_surplus += amount;
            }
            BaseContributionRule::Spend => flow.discretionary_spending += amount,
        }
    }

    fn run_period(
        &mut self,
        clock: &PeriodClock,
        returns: ReturnVector,
    ) -> EngineResult<SimulationDataPoint> {
        if !returns_are_finite(&returns) {
            return Err(EngineError::NumericFault {
                age: clock.age,
                detail: format!("non-finite returns {returns:?}"),
            });
        }

        let plan = self.plan;
        let status = plan.tax_settings.filing_status;
        for account in &mut self.accounts {
            account.begin_period();
        }

        let mut ledger = TaxLedger::default();
        let mut flow = CashFlowSummary::default();
        self.accrue_yields(&returns, &mut ledger);

        let mut income_cash: HashMap<String, f64> = HashMap::new();
        let mut gross_income = 0.0;
        let mut net_income = 0.0;
        for (idx, income) in plan.incomes.iter().enumerate() {
            let fraction = active_fraction(&income.timeframe, clock);
            let gross = scheduled_amount(
                income.amount,
                income.frequency,
                income.growth.as_ref(),
                self.price_level,
                clock,
                fraction,
                self.income_paid_once[idx],
            );
            if gross <= 0.0 {
                continue;
            }
            if income.frequency == Frequency::OneTime {
                self.income_paid_once[idx] = true;
            }

            let withheld = gross * income.withholding;
            let payroll = match income.tax_treatment {
                IncomeTaxTreatment::Wage => payroll_tax(gross),
                _ => 0.0,
            };
            match income.tax_treatment {
                IncomeTaxTreatment::Wage
                | IncomeTaxTreatment::SelfEmployment
                | IncomeTaxTreatment::Pension => {
                    ledger.earned_income += gross;
                    flow.earned_income += gross;
                }
                IncomeTaxTreatment::SocialSecurity => {
                    ledger.social_security += gross;
                    flow.social_security_income += gross;
                }
                IncomeTaxTreatment::Exempt => {
                    ledger.tax_exempt += gross;
                    flow.tax_exempt_income += gross;
                }
            }
            ledger.withheld += withheld;
            ledger.payroll_tax += payroll;

            let net = gross - withheld - payroll;
            *income_cash.entry(income.id.clone()).or_insert(0.0) += net;
            gross_income += gross;
            net_income += net;
        }
        flow.withholding = ledger.withheld;

        let expenses = self.charge_expenses(clock);
        flow.expenses = expenses;

        let rmd = take_rmds(&mut self.accounts, clock.age, &mut ledger);
        flow.rmd = rmd;

        // Tax owed beyond withholding on what is known so far; negative when
        // withholding already over-covers it.
        let estimate = ledger.assess(status, self.loss_carryover);
        let mut tax_paid = estimate.liability() - ledger.withheld;
        let mut cash = net_income - expenses - tax_paid;

        let mut rmd_left = rmd;
        if cash < 0.0 {
            let used = rmd_left.min(-cash);
            cash += used;
            rmd_left -= used;
        }
        if rmd_left > 0.0 {
            self.accounts[self.bucket].deposit(rmd_left);
            flow.saved_surplus += rmd_left;
        }

        let mut unmet = 0.0;
        let mut underfunded = Vec::new();
        if cash < 0.0 {
            let out = withdraw_for_shortfall(&mut self.accounts, -cash, clock.age, &mut ledger);
            unmet += out.unmet;
        } else if self.phase == Phase::Accumulation {
            let out = apply_contributions(
                &self.rules,
                &mut self.accounts,
                &self.account_index,
                cash,
                &income_cash,
                clock.age,
                &mut ledger,
            );
            underfunded = out.underfunded;
            self.dispose_surplus(out.leftover, &mut flow);
        } else {
            self.dispose_surplus(cash, &mut flow);
        }

        let assessment = if unmet < CASH_EPSILON {
            let settlement = settle_taxes(
                &mut self.accounts,
                &mut ledger,
                status,
                self.loss_carryover,
                clock.age,
                &mut tax_paid,
            );
            unmet += settlement.unmet;
            self.dispose_surplus(settlement.refund, &mut flow);
            settlement.assessment
        } else {
            ledger.assess(status, self.loss_carryover)
        };
        self.loss_carryover = assessment.loss_carryover;

        let mut flows = (0.0, 0.0, 0.0);
        for account in &self.accounts {
            flows.0 += account.flows.contributions;
            flows.1 += account.flows.employer_match;
            flows.2 += account.flows.withdrawals;
        }
        let (contributions, employer_match, withdrawals) = flows;

        let mut return_amounts = AssetAmounts::default();
        if unmet >= CASH_EPSILON {
            for account in &mut self.accounts {
                account.zero();
            }
            self.phase = Phase::Bankrupt;
            debug!(age = clock.age, unmet, "scenario bankrupt");
        } else {
            for account in &mut self.accounts {
                return_amounts.add(account.apply_returns(&returns));
            }
        }

        let computation = assessment.computation;
        let taxes = TaxBreakdown {
            ordinary_income: assessment.ordinary_income,
            taxable_ordinary_income: computation.taxable_ordinary,
            qualified_income: assessment.qualified_income,
            taxable_social_security: assessment.taxable_social_security,
            ordinary_tax: computation.ordinary_tax,
            capital_gains_tax: computation.cap_gains_tax,
            payroll_tax: ledger.payroll_tax,
            penalties: ledger.penalties,
            withheld: ledger.withheld,
            total_tax: computation.total() + ledger.payroll_tax,
            marginal_rate: computation.marginal_rate,
            effective_rate: computation.effective_rate,
        };

        flow.contributions = contributions;
        flow.withdrawals = withdrawals;
        flow.unmet_shortfall = unmet;
        flow.operating_cash_flow = gross_income - expenses - taxes.total_tax - taxes.penalties;

        let portfolio = self.portfolio_totals(return_amounts, contributions, employer_match, withdrawals);
        if !portfolio.total.is_finite() || !taxes.total_tax.is_finite() {
            return Err(EngineError::NumericFault {
                age: clock.age,
                detail: format!(
                    "portfolio {} tax {} after period {}",
                    portfolio.total, taxes.total_tax, clock.period_index
                ),
            });
        }

        self.price_level *= 1.0 + returns.inflation;
        if !self.price_level.is_finite() || self.price_level <= 0.0 {
            return Err(EngineError::NumericFault {
                age: clock.age,
                detail: format!("price level {} after inflation {}", self.price_level, returns.inflation),
            });
        }

        Ok(SimulationDataPoint {
            period_index: clock.period_index,
            age: clock.age,
            year: clock.year,
            phase: self.phase,
            returns,
            accounts: self.accounts.iter().map(AccountState::snapshot).collect(),
            portfolio,
            taxes,
            cash_flow: flow,
            underfunded_rules: underfunded,
        })
    }

    fn portfolio_totals(
        &self,
        returns: AssetAmounts,
        contributions: f64,
        employer_match: f64,
        withdrawals: f64,
    ) -> PortfolioTotals {
        let mut by_asset = AssetAmounts::default();
        for account in &self.accounts {
            by_asset.add(account.asset_values());
        }
        PortfolioTotals {
            total: self.portfolio_total(),
            by_asset,
            returns,
            contributions,
            employer_match,
            withdrawals,
        }
    }

    fn bankrupt_point(&mut self, clock: &PeriodClock) -> SimulationDataPoint {
        for account in &mut self.accounts {
            account.begin_period();
            account.zero();
        }
        SimulationDataPoint {
            period_index: clock.period_index,
            age: clock.age,
            year: clock.year,
            phase: Phase::Bankrupt,
            returns: ReturnVector::default(),
            accounts: self.accounts.iter().map(AccountState::snapshot).collect(),
            portfolio: PortfolioTotals::default(),
            taxes: TaxBreakdown::default(),
            cash_flow: CashFlowSummary::default(),
            underfunded_rules: Vec::new(),
        }
    }
}

/// Runs one scenario without validating the plan. Callers validate once and
/// reuse the plan across seeds.
pub(crate) fn simulate_scenario(
    plan: &Plan,
    mode: SimulationMode,
    seed: u64,
) -> EngineResult<SimulationResult> {
    let mut scenario = Scenario::new(plan);
    let mut provider = ReturnsProvider::for_plan(plan, mode, seed);
    let initial_portfolio = scenario.portfolio_total();
    let periods = period_count(plan);
    let mut data_points = Vec::with_capacity(periods);

    for period_index in 0..periods {
        let mut clock = PeriodClock::for_period(plan, period_index, scenario.phase);
        if scenario.phase == Phase::Bankrupt {
            data_points.push(scenario.bankrupt_point(&clock));
            continue;
        }

        if scenario.phase == Phase::Accumulation && scenario.retirement_reached(&clock) {
            scenario.phase = Phase::Retirement;
            clock.phase = Phase::Retirement;
            debug!(
                age = clock.age,
                portfolio = scenario.portfolio_total(),
                "entering retirement"
            );
        }

        let returns = provider.next_returns(period_index, scenario.phase);
        data_points.push(scenario.run_period(&clock, returns)?);
    }

    Ok(SimulationResult {
        context: SimulationContext {
            start_age: plan.timeline.current_age,
            start_year: plan.timeline.start_year,
            life_expectancy: plan.timeline.life_expectancy,
            seed,
            mode,
            initial_portfolio,
            historical_ranges: provider.historical_ranges().to_vec(),
        },
        data_points,
    })
}
