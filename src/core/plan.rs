use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::error::{EngineResult, invalid};
use super::history;

const ALLOCATION_TOLERANCE: f64 = 1e-6;
const MAX_AGE: f64 = 130.0;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    HeadOfHousehold,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountType {
    Savings,
    TaxableBrokerage,
    #[serde(rename = "401k")]
    Traditional401k,
    #[serde(rename = "403b")]
    Traditional403b,
    #[serde(rename = "ira")]
    TraditionalIra,
    #[serde(rename = "roth401k")]
    Roth401k,
    #[serde(rename = "roth403b")]
    Roth403b,
    RothIra,
    Hsa,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaxCategory {
    Taxable,
    TaxDeferred,
    TaxFree,
    CashSavings,
}

/// IRS annual contribution limit groups. Accounts in the same group share one
/// employee limit. `Section415c` caps employee plus employer money across the
/// employer-plan group.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LimitGroup {
    Employer401k,
    Ira,
    Hsa,
    Section415c,
}

impl AccountType {
    pub fn tax_category(self) -> TaxCategory {
        match self {
            AccountType::Savings => TaxCategory::CashSavings,
            AccountType::TaxableBrokerage => TaxCategory::Taxable,
            AccountType::Traditional401k
            | AccountType::Traditional403b
            | AccountType::TraditionalIra
            | AccountType::Hsa => TaxCategory::TaxDeferred,
            AccountType::Roth401k | AccountType::Roth403b | AccountType::RothIra => {
                TaxCategory::TaxFree
            }
        }
    }

    pub fn requires_rmd(self) -> bool {
        matches!(
            self,
            AccountType::Traditional401k
                | AccountType::Traditional403b
                | AccountType::TraditionalIra
        )
    }

    pub fn limit_group(self) -> Option<LimitGroup> {
        match self {
            AccountType::Traditional401k
            | AccountType::Traditional403b
            | AccountType::Roth401k
            | AccountType::Roth403b => Some(LimitGroup::Employer401k),
            AccountType::TraditionalIra | AccountType::RothIra => Some(LimitGroup::Ira),
            AccountType::Hsa => Some(LimitGroup::Hsa),
            AccountType::Savings | AccountType::TaxableBrokerage => None,
        }
    }

    pub fn supports_mega_backdoor_roth(self) -> bool {
        matches!(self, AccountType::Roth401k | AccountType::Roth403b)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAllocation {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
}

impl AssetAllocation {
    pub const CASH_ONLY: AssetAllocation = AssetAllocation {
        stocks: 0.0,
        bonds: 0.0,
        cash: 1.0,
    };

    pub fn total(&self) -> f64 {
        self.stocks + self.bonds + self.cash
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub balance: f64,
    pub allocation: AssetAllocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_basis: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution_basis: Option<f64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContributionType {
    DollarAmount { amount: f64 },
    PercentRemaining { percent: f64 },
    Unlimited,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRule {
    pub id: String,
    pub account_id: String,
    pub rank: u32,
    pub contribution: ContributionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub income_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employer_match: Option<f64>,
    /// After-tax contributions up to the §415(c) total on Roth 401(k) and
    /// Roth 403(b) accounts. Ignored for other account types.
    #[serde(default)]
    pub enable_mega_backdoor_roth: bool,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseContributionRule {
    #[default]
    Spend,
    Save,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Frequency {
    Yearly,
    Quarterly,
    Monthly,
    Biweekly,
    Weekly,
    OneTime,
}

impl Frequency {
    pub fn times_per_year(self) -> f64 {
        match self {
            Frequency::Yearly | Frequency::OneTime => 1.0,
            Frequency::Quarterly => 4.0,
            Frequency::Monthly => 12.0,
            Frequency::Biweekly => 26.0,
            Frequency::Weekly => 52.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TimePoint {
    Now,
    AtRetirement,
    AtLifeExpectancy,
    CustomDate { year: i32, month: u32 },
    CustomAge { age: f64 },
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeframe {
    pub start: TimePoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<TimePoint>,
}

impl Default for Timeframe {
    fn default() -> Self {
        Self {
            start: TimePoint::Now,
            end: None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Growth {
    pub rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap: Option<f64>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IncomeTaxTreatment {
    #[default]
    Wage,
    SocialSecurity,
    Exempt,
    SelfEmployment,
    Pension,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Income {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub amount: f64,
    pub frequency: Frequency,
    #[serde(default)]
    pub timeframe: Timeframe,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth: Option<Growth>,
    #[serde(default)]
    pub tax_treatment: IncomeTaxTreatment,
    #[serde(default)]
    pub withholding: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub amount: f64,
    pub frequency: Frequency,
    #[serde(default)]
    pub timeframe: Timeframe,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth: Option<Growth>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RetirementStrategy {
    FixedAge { age: f64 },
    SwrTarget { rate: f64 },
}

fn default_start_year() -> i32 {
    2025
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub current_age: f64,
    pub life_expectancy: f64,
    #[serde(default = "default_start_year")]
    pub start_year: i32,
    pub retirement_strategy: RetirementStrategy,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAssumptions {
    pub stock_return: f64,
    pub stock_yield: f64,
    pub bond_return: f64,
    pub bond_yield: f64,
    pub cash_return: f64,
    pub inflation_rate: f64,
}

impl Default for MarketAssumptions {
    fn default() -> Self {
        Self {
            stock_return: 0.07,
            stock_yield: 0.02,
            bond_return: 0.02,
            bond_yield: 0.04,
            cash_return: 0.0,
            inflation_rate: 0.03,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxSettings {
    pub filing_status: FilingStatus,
}

impl Default for TaxSettings {
    fn default() -> Self {
        Self {
            filing_status: FilingStatus::Single,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SimulationMode {
    #[default]
    Fixed,
    Stochastic,
    Historical,
    HistoricalBacktest,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Volatility {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
    pub inflation: f64,
    pub stock_yield: f64,
    pub bond_yield: f64,
}

impl Default for Volatility {
    fn default() -> Self {
        Self {
            stocks: 0.18,
            bonds: 0.06,
            cash: 0.03,
            inflation: 0.04,
            stock_yield: 0.01,
            bond_yield: 0.015,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationSettings {
    pub seed: u64,
    pub mode: SimulationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub historical_start_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retirement_start_year: Option<i32>,
    pub volatility: Volatility,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub timeline: Timeline,
    #[serde(default)]
    pub incomes: Vec<Income>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub contribution_rules: Vec<ContributionRule>,
    #[serde(default)]
    pub base_contribution_rule: BaseContributionRule,
    #[serde(default)]
    pub market_assumptions: MarketAssumptions,
    #[serde(default)]
    pub tax_settings: TaxSettings,
    #[serde(default)]
    pub simulation_settings: SimulationSettings,
}

fn finite_non_negative(value: f64, what: &str) -> EngineResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(format!("{what} must be a finite value >= 0")));
    }
    Ok(())
}

fn finite(value: f64, what: &str) -> EngineResult<()> {
    if !value.is_finite() {
        return Err(invalid(format!("{what} must be finite")));
    }
    Ok(())
}

fn check_unique<'a>(ids: impl Iterator<Item = &'a str>, what: &str) -> EngineResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(invalid(format!("duplicate {what} id '{id}'")));
        }
    }
    Ok(())
}

fn check_historical_year(year: Option<i32>, what: &str) -> EngineResult<()> {
    match year {
        Some(year) if history::historical_year(year).is_none() => Err(invalid(format!(
            "{what} {year} is outside {}..={}",
            history::first_year(),
            history::last_year()
        ))),
        _ => Ok(()),
    }
}

fn check_growth(growth: Option<&Growth>, what: &str) -> EngineResult<()> {
    if let Some(growth) = growth {
        if !growth.rate.is_finite() || growth.rate <= -1.0 {
            return Err(invalid(format!("{what} growth rate must be > -1")));
        }
        if let Some(cap) = growth.cap {
            finite_non_negative(cap, &format!("{what} growth cap"))?;
        }
    }
    Ok(())
}

fn check_timeframe(timeframe: &Timeframe, what: &str) -> EngineResult<()> {
    for point in std::iter::once(&timeframe.start).chain(timeframe.end.iter()) {
        match *point {
            TimePoint::CustomDate { month, .. } if !(1..=12).contains(&month) => {
                return Err(invalid(format!("{what} timeframe month must be 1..=12")));
            }
            TimePoint::CustomAge { age } if !age.is_finite() => {
                return Err(invalid(format!("{what} timeframe age must be finite")));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Rejects plans the engine cannot simulate. Structural checks (JSON shape)
/// happen at deserialization; this covers numeric ranges and cross references.
pub fn validate_plan(plan: &Plan) -> EngineResult<()> {
    let timeline = &plan.timeline;
    finite_non_negative(timeline.current_age, "timeline.currentAge")?;
    finite(timeline.life_expectancy, "timeline.lifeExpectancy")?;
    if timeline.life_expectancy < timeline.current_age {
        return Err(invalid("timeline.lifeExpectancy must be >= timeline.currentAge"));
    }
    if timeline.life_expectancy > MAX_AGE {
        return Err(invalid(format!("timeline.lifeExpectancy must be <= {MAX_AGE}")));
    }
    match timeline.retirement_strategy {
        RetirementStrategy::FixedAge { age } => finite_non_negative(age, "retirement age")?,
        RetirementStrategy::SwrTarget { rate } => {
            if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
                return Err(invalid("safe withdrawal rate must be in (0, 1]"));
            }
        }
    }

    check_unique(plan.accounts.iter().map(|a| a.id.as_str()), "account")?;
    for account in &plan.accounts {
        let what = format!("account '{}'", account.id);
        finite_non_negative(account.balance, &format!("{what} balance"))?;
        let alloc = account.allocation;
        for (part, name) in [(alloc.stocks, "stocks"), (alloc.bonds, "bonds"), (alloc.cash, "cash")] {
            finite_non_negative(part, &format!("{what} allocation.{name}"))?;
        }
        if (alloc.total() - 1.0).abs() > ALLOCATION_TOLERANCE {
            return Err(invalid(format!(
                "{what} allocation must sum to 1 (got {:.6})",
                alloc.total()
            )));
        }
        if let Some(basis) = account.cost_basis {
            finite_non_negative(basis, &format!("{what} costBasis"))?;
            if basis > account.balance + ALLOCATION_TOLERANCE {
                return Err(invalid(format!("{what} costBasis must be <= balance")));
            }
        }
        if let Some(basis) = account.contribution_basis {
            finite_non_negative(basis, &format!("{what} contributionBasis"))?;
            if basis > account.balance + ALLOCATION_TOLERANCE {
                return Err(invalid(format!("{what} contributionBasis must be <= balance")));
            }
        }
    }

    check_unique(plan.incomes.iter().map(|i| i.id.as_str()), "income")?;
    for income in &plan.incomes {
        let what = format!("income '{}'", income.id);
        finite_non_negative(income.amount, &format!("{what} amount"))?;
        if !(0.0..=1.0).contains(&income.withholding) {
            return Err(invalid(format!("{what} withholding must be between 0 and 1")));
        }
        check_growth(income.growth.as_ref(), &what)?;
        check_timeframe(&income.timeframe, &what)?;
    }

    check_unique(plan.expenses.iter().map(|e| e.id.as_str()), "expense")?;
    for expense in &plan.expenses {
        let what = format!("expense '{}'", expense.id);
        finite_non_negative(expense.amount, &format!("{what} amount"))?;
        check_growth(expense.growth.as_ref(), &what)?;
        check_timeframe(&expense.timeframe, &what)?;
    }

    check_unique(plan.contribution_rules.iter().map(|r| r.id.as_str()), "contribution rule")?;
    for rule in &plan.contribution_rules {
        let what = format!("contribution rule '{}'", rule.id);
        if !plan.accounts.iter().any(|a| a.id == rule.account_id) {
            return Err(invalid(format!(
                "{what} references unknown account '{}'",
                rule.account_id
            )));
        }
        if let Some(missing) = rule
            .income_ids
            .iter()
            .find(|id| !plan.incomes.iter().any(|i| &i.id == *id))
        {
            return Err(invalid(format!("{what} references unknown income '{missing}'")));
        }
        match rule.contribution {
            ContributionType::DollarAmount { amount } => {
                finite_non_negative(amount, &format!("{what} amount"))?
            }
            ContributionType::PercentRemaining { percent } => {
                if !(0.0..=1.0).contains(&percent) {
                    return Err(invalid(format!("{what} percent must be between 0 and 1")));
                }
            }
            ContributionType::Unlimited => {}
        }
        if let Some(max) = rule.max_balance {
            finite_non_negative(max, &format!("{what} maxBalance"))?;
        }
        if let Some(m) = rule.employer_match {
            finite_non_negative(m, &format!("{what} employerMatch"))?;
        }
    }

    let market = &plan.market_assumptions;
    for (value, name) in [
        (market.stock_return, "stockReturn"),
        (market.bond_return, "bondReturn"),
        (market.cash_return, "cashReturn"),
        (market.inflation_rate, "inflationRate"),
    ] {
        if !value.is_finite() || value <= -1.0 {
            return Err(invalid(format!("marketAssumptions.{name} must be > -1")));
        }
    }
    finite_non_negative(market.stock_yield, "marketAssumptions.stockYield")?;
    finite_non_negative(market.bond_yield, "marketAssumptions.bondYield")?;

    let settings = &plan.simulation_settings;
    check_historical_year(settings.historical_start_year, "historicalStartYear")?;
    check_historical_year(settings.retirement_start_year, "retirementStartYear")?;
    let vol = settings.volatility;
    for (value, name) in [
        (vol.stocks, "stocks"),
        (vol.bonds, "bonds"),
        (vol.cash, "cash"),
        (vol.inflation, "inflation"),
        (vol.stock_yield, "stockYield"),
        (vol.bond_yield, "bondYield"),
    ] {
        finite_non_negative(value, &format!("volatility.{name}"))?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn account(id: &str, account_type: AccountType, balance: f64) -> Account {
        Account {
            id: id.to_string(),
            name: id.to_string(),
            account_type,
            balance,
            allocation: AssetAllocation {
                stocks: 0.6,
                bonds: 0.4,
                cash: 0.0,
            },
            cost_basis: None,
            contribution_basis: None,
        }
    }

    pub fn income(id: &str, amount: f64, treatment: IncomeTaxTreatment) -> Income {
        Income {
            id: id.to_string(),
            name: id.to_string(),
            amount,
            frequency: Frequency::Yearly,
            timeframe: Timeframe::default(),
            growth: None,
            tax_treatment: treatment,
            withholding: 0.0,
        }
    }

    pub fn expense(id: &str, amount: f64) -> Expense {
        Expense {
            id: id.to_string(),
            name: id.to_string(),
            amount,
            frequency: Frequency::Yearly,
            timeframe: Timeframe::default(),
            growth: None,
        }
    }

    pub fn zero_market() -> MarketAssumptions {
        MarketAssumptions {
            stock_return: 0.0,
            stock_yield: 0.0,
            bond_return: 0.0,
            bond_yield: 0.0,
            cash_return: 0.0,
            inflation_rate: 0.0,
        }
    }

    pub fn base_plan(current_age: f64, life_expectancy: f64, strategy: RetirementStrategy) -> Plan {
        Plan {
            timeline: Timeline {
                current_age,
                life_expectancy,
                start_year: 2025,
                retirement_strategy: strategy,
            },
            incomes: Vec::new(),
            expenses: Vec::new(),
            accounts: Vec::new(),
            contribution_rules: Vec::new(),
            base_contribution_rule: BaseContributionRule::Spend,
            market_assumptions: zero_market(),
            tax_settings: TaxSettings::default(),
            simulation_settings: SimulationSettings::default(),
        }
    }
}
