use serde::{Deserialize, Serialize};

use super::plan::{AccountType, SimulationMode, TaxCategory};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Accumulation,
    Retirement,
    Bankrupt,
}

impl Phase {
    /// Position in the one-way lifecycle; a run never moves to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            Phase::Accumulation => 0,
            Phase::Retirement => 1,
            Phase::Bankrupt => 2,
        }
    }
}

/// Rates applied for one period. `source_year` is set when the rates were
/// replayed from the historical table.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnVector {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
    pub inflation: f64,
    pub stock_yield: f64,
    pub bond_yield: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_year: Option<i32>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAmounts {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
}

impl AssetAmounts {
    pub fn total(&self) -> f64 {
        self.stocks + self.bonds + self.cash
    }

    pub fn add(&mut self, other: AssetAmounts) {
        self.stocks += other.stocks;
        self.bonds += other.bonds;
        self.cash += other.cash;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub id: String,
    pub account_type: AccountType,
    pub tax_category: TaxCategory,
    pub balance: f64,
    pub contributions: f64,
    pub employer_match: f64,
    pub withdrawals: f64,
    pub realized_gains: f64,
    pub rmd: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioTotals {
    pub total: f64,
    pub by_asset: AssetAmounts,
    pub returns: AssetAmounts,
    pub contributions: f64,
    pub employer_match: f64,
    pub withdrawals: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub ordinary_income: f64,
    pub taxable_ordinary_income: f64,
    pub qualified_income: f64,
    pub taxable_social_security: f64,
    pub ordinary_tax: f64,
    pub capital_gains_tax: f64,
    pub payroll_tax: f64,
    pub penalties: f64,
    pub withheld: f64,
    pub total_tax: f64,
    pub marginal_rate: f64,
    pub effective_rate: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowSummary {
    pub earned_income: f64,
    pub social_security_income: f64,
    pub tax_exempt_income: f64,
    pub withholding: f64,
    pub expenses: f64,
    pub contributions: f64,
    pub withdrawals: f64,
    pub rmd: f64,
    pub saved_surplus: f64,
    pub discretionary_spending: f64,
    pub operating_cash_flow: f64,
    pub unmet_shortfall: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationDataPoint {
    pub period_index: usize,
    pub age: f64,
    pub year: i32,
    pub phase: Phase,
    pub returns: ReturnVector,
    pub accounts: Vec<AccountSnapshot>,
    pub portfolio: PortfolioTotals,
    pub taxes: TaxBreakdown,
    pub cash_flow: CashFlowSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub underfunded_rules: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationContext {
    pub start_age: f64,
    pub start_year: i32,
    pub life_expectancy: f64,
    pub seed: u64,
    pub mode: SimulationMode,
    pub initial_portfolio: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub historical_ranges: Vec<YearRange>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub context: SimulationContext,
    pub data_points: Vec<SimulationDataPoint>,
}

impl SimulationResult {
    pub fn final_phase(&self) -> Option<Phase> {
        self.data_points.last().map(|dp| dp.phase)
    }
}

/// Headline numbers for one run, or means across a batch. `success` is the
/// fraction of successful runs (0 or 1 for a single run).
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetrics {
    pub success: f64,
    pub retirement_age: Option<f64>,
    pub years_to_retirement: Option<f64>,
    pub bankruptcy_age: Option<f64>,
    pub portfolio_at_retirement: Option<f64>,
    pub lifetime_taxes: f64,
    pub lifetime_penalties: f64,
    pub final_portfolio: f64,
    pub progress_to_retirement: Option<f64>,
    /// Periods in which at least one dollar-amount rule was under-funded.
    pub underfunded_periods: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub index: usize,
    pub seed: u64,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<KeyMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileRow {
    pub period_index: usize,
    pub age: f64,
    pub year: i32,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyAggregate {
    pub period_index: usize,
    pub age: f64,
    pub year: i32,
    pub accumulation: f64,
    pub retirement: f64,
    pub bankrupt: f64,
    pub mean_portfolio: f64,
    pub mean_taxes: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub base_seed: u64,
    pub mode: SimulationMode,
    pub requested_runs: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub cancelled: bool,
    pub success_rate: f64,
    pub runs: Vec<RunSummary>,
    pub percentiles: Vec<PercentileRow>,
    pub yearly: Vec<YearlyAggregate>,
}
