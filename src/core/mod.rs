mod accounts;
mod batch;
mod cashflow;
mod engine;
mod error;
mod history;
mod metrics;
mod plan;
mod returns;
mod rng;
mod tax;
mod types;

pub use batch::{DEFAULT_RUN_COUNT, run_batch, run_batch_with_cancel, run_by_index};
pub use engine::run_single;
pub use error::{EngineError, EngineResult};
pub use history::{HISTORICAL_YEARS, HistoricalYear, historical_year, uniform_lifetime_factor};
pub use metrics::{derive_batch_key_metrics, derive_key_metrics};
pub use plan::{
    Account, AccountType, AssetAllocation, BaseContributionRule, ContributionRule,
    ContributionType, Expense, FilingStatus, Frequency, Growth, Income, IncomeTaxTreatment,
    LimitGroup, MarketAssumptions, Plan, RetirementStrategy, SimulationMode, SimulationSettings,
    TaxCategory, TaxSettings, TimePoint, Timeframe, Timeline, Volatility, validate_plan,
};
pub use rng::{Lcg, derive_run_seed};
pub use tax::{
    TaxComputation, compute_tax, early_withdrawal_penalty, hsa_withdrawal_penalty, payroll_tax,
    taxable_social_security,
};
pub use types::{
    AccountSnapshot, AssetAmounts, BatchResult, CashFlowSummary, KeyMetrics, PercentileRow, Phase,
    PortfolioTotals, ReturnVector, RunStatus, RunSummary, SimulationContext, SimulationDataPoint,
    SimulationResult, TaxBreakdown, YearRange, YearlyAggregate,
};
