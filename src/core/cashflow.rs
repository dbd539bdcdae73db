use std::collections::HashMap;

use tracing::debug;

use super::accounts::AccountState;
use super::history;
use super::plan::{
    AccountType, ContributionRule, ContributionType, FilingStatus, LimitGroup, TaxCategory,
};
use super::tax::{
    self, TaxComputation, compute_tax, early_withdrawal_penalty, hsa_withdrawal_penalty,
    net_capital_gains, taxable_social_security,
};

pub const RMD_START_AGE: f64 = 73.0;

/// Shortfalls below this are treated as fully covered.
pub const CASH_EPSILON: f64 = 0.01;

const MAX_SETTLEMENT_PASSES: usize = 32;

/// Taxable events accumulated over one period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaxLedger {
    pub earned_income: f64,
    pub social_security: f64,
    pub tax_exempt: f64,
    pub interest: f64,
    pub dividends: f64,
    pub realized_gains: f64,
    pub deferred_withdrawals: f64,
    pub roth_taxable_earnings: f64,
    pub pretax_contributions: f64,
    pub penalties: f64,
    pub payroll_tax: f64,
    pub withheld: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaxAssessment {
    pub computation: TaxComputation,
    pub ordinary_income: f64,
    pub qualified_income: f64,
    pub taxable_social_security: f64,
    pub penalties: f64,
    pub loss_carryover: f64,
}

impl TaxAssessment {
    /// Income tax owed for the period, penalties included, payroll tax excluded.
    pub fn liability(&self) -> f64 {
        self.computation.total() + self.penalties
    }
}

impl TaxLedger {
    pub fn assess(&self, filing_status: FilingStatus, loss_carryover: f64) -> TaxAssessment {
        let netting = net_capital_gains(self.realized_gains, loss_carryover);
        let ordinary_before_benefits = self.earned_income
            + self.interest
            + self.deferred_withdrawals
            + self.roth_taxable_earnings
            - self.pretax_contributions
            - netting.ordinary_offset;
        let qualified_income = self.dividends + netting.taxable_gains;
        let taxable_benefits = taxable_social_security(
            self.social_security,
            ordinary_before_benefits + qualified_income,
            filing_status,
        );
        let ordinary_income = (ordinary_before_benefits + taxable_benefits).max(0.0);

        TaxAssessment {
            computation: compute_tax(ordinary_income, qualified_income, filing_status),
            ordinary_income,
            qualified_income,
            taxable_social_security: taxable_benefits,
            penalties: self.penalties,
            loss_carryover: netting.carryover,
        }
    }
}

/// Withdrawal tiers in the order they are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    CashSavings,
    Taxable,
    RothBasis,
    RothEarnings,
    TaxDeferred,
    Hsa,
}

const WITHDRAWAL_ORDER: [Tier; 6] = [
    Tier::CashSavings,
    Tier::Taxable,
    Tier::RothBasis,
    Tier::RothEarnings,
    Tier::TaxDeferred,
    Tier::Hsa,
];

impl Tier {
    fn holds(self, account: &AccountState) -> bool {
        match self {
            Tier::CashSavings => account.category() == TaxCategory::CashSavings,
            Tier::Taxable => account.category() == TaxCategory::Taxable,
            Tier::RothBasis | Tier::RothEarnings => account.category() == TaxCategory::TaxFree,
            Tier::TaxDeferred => {
                account.category() == TaxCategory::TaxDeferred
                    && account.account_type != AccountType::Hsa
            }
            Tier::Hsa => account.account_type == AccountType::Hsa,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WithdrawalOutcome {
    pub withdrawn: f64,
    pub unmet: f64,
}

fn record_withdrawal(tier: Tier, amount: f64, gain: f64, age: f64, ledger: &mut TaxLedger) {
    match tier {
        Tier::CashSavings | Tier::RothBasis => {}
        Tier::Taxable => ledger.realized_gains += gain,
        Tier::RothEarnings => {
            if age < tax::EARLY_WITHDRAWAL_AGE {
                ledger.roth_taxable_earnings += gain;
                ledger.penalties += early_withdrawal_penalty(gain, age);
            }
        }
        Tier::TaxDeferred => {
            ledger.deferred_withdrawals += amount;
            ledger.penalties += early_withdrawal_penalty(amount, age);
        }
        Tier::Hsa => {
            ledger.deferred_withdrawals += amount;
            ledger.penalties += hsa_withdrawal_penalty(amount, age);
        }
    }
}

/// Draws `shortfall` from the accounts in tier order, clamping each
/// withdrawal to the account balance. Whatever cannot be covered is returned
/// as `unmet`.
pub fn withdraw_for_shortfall(
    accounts: &mut [AccountState],
    shortfall: f64,
    age: f64,
    ledger: &mut TaxLedger,
) -> WithdrawalOutcome {
    let mut remaining = shortfall.max(0.0);
    let mut withdrawn = 0.0;

    'tiers: for tier in WITHDRAWAL_ORDER {
        for account in accounts.iter_mut().filter(|a| tier.holds(a)) {
            if remaining <= 0.0 {
                break 'tiers;
            }
            let w = match tier {
                Tier::RothBasis => account.withdraw_basis(remaining),
                _ => account.withdraw(remaining),
            };
            if w.amount <= 0.0 {
                continue;
            }
            record_withdrawal(tier, w.amount, w.gain, age, ledger);
            remaining -= w.amount;
            withdrawn += w.amount;
        }
    }

    WithdrawalOutcome {
        withdrawn,
        unmet: remaining.max(0.0),
    }
}

/// Takes required minimum distributions from every RMD-eligible account and
/// returns the total distributed.
pub fn take_rmds(accounts: &mut [AccountState], age: f64, ledger: &mut TaxLedger) -> f64 {
    if age < RMD_START_AGE {
        return 0.0;
    }
    let Some(factor) = history::uniform_lifetime_factor(age.floor() as u32) else {
        return 0.0;
    };

    let mut total = 0.0;
    for account in accounts.iter_mut().filter(|a| a.account_type.requires_rmd()) {
        let required = account.balance / factor;
        let w = account.withdraw(required);
        if w.amount > 0.0 {
            account.flows.rmd += w.amount;
            ledger.deferred_withdrawals += w.amount;
            total += w.amount;
        }
    }
    total
}

pub fn contribution_limit(group: LimitGroup, age: f64) -> f64 {
    match group {
        LimitGroup::Employer401k if age >= 50.0 => 31_000.0,
        LimitGroup::Employer401k => 23_500.0,
        LimitGroup::Ira if age >= 50.0 => 8_000.0,
        LimitGroup::Ira => 7_000.0,
        LimitGroup::Hsa if age >= 55.0 => 5_300.0,
        LimitGroup::Hsa => 4_300.0,
        LimitGroup::Section415c if age >= 60.0 && age < 64.0 => 83_250.0,
        LimitGroup::Section415c if age >= 50.0 => 80_000.0,
        LimitGroup::Section415c => 72_000.0,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContributionOutcome {
    pub contributed: f64,
    pub employer_match: f64,
    pub leftover: f64,
    pub underfunded: Vec<String>,
}

/// Rules in resolution order: ascending rank, ties broken by id.
pub fn ordered_rules(rules: &[ContributionRule]) -> Vec<&ContributionRule> {
    let mut ordered: Vec<&ContributionRule> = rules.iter().filter(|r| !r.disabled).collect();
    ordered.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));
    ordered
}

/// Unspent net cash per income. A dollar taken by one rule is gone for
/// every later rule.
struct IncomePools {
    cash: HashMap<String, f64>,
}

impl IncomePools {
    fn new(income_cash: &HashMap<String, f64>) -> Self {
        Self {
            cash: income_cash
                .iter()
                .map(|(id, amount)| (id.clone(), amount.max(0.0)))
                .collect(),
        }
    }

    fn listed<'a>(ids: &'a [String]) -> impl Iterator<Item = &'a String> {
        ids.iter()
            .enumerate()
            .filter(move |(i, id)| !ids[..*i].contains(*id))
            .map(|(_, id)| id)
    }

    fn available(&self, ids: &[String]) -> f64 {
        Self::listed(ids)
            .filter_map(|id| self.cash.get(id))
            .sum()
    }

    fn total(&self) -> f64 {
        self.cash.values().sum()
    }

    /// Takes `amount` from the listed incomes in order.
    fn drain_listed(&mut self, ids: &[String], amount: f64) {
        let mut left = amount;
        for id in Self::listed(ids) {
            if left <= 0.0 {
                break;
            }
            if let Some(pool) = self.cash.get_mut(id) {
                let take = left.min(*pool);
                *pool -= take;
                left -= take;
            }
        }
    }

    /// Takes `amount` out of `remaining` cash for an unrestricted rule. Cash
    /// not attributed to any income goes first; the rest comes out of every
    /// income pro rata.
    fn drain_unrestricted(&mut self, remaining: f64, amount: f64) {
        let pooled = self.total();
        let from_pools = amount - (remaining - pooled).max(0.0).min(amount);
        if from_pools <= 0.0 || pooled <= 0.0 {
            return;
        }
        let share = (from_pools / pooled).min(1.0);
        for pool in self.cash.values_mut() {
            *pool = (*pool - *pool * share).max(0.0);
        }
    }
}

/// Allocates `available_cash` across the rules. `income_cash` maps income id
/// to its net cash this period; rules restricted to incomes draw only from
/// what those incomes have left.
pub fn apply_contributions(
    rules: &[&ContributionRule],
    accounts: &mut [AccountState],
    account_index: &HashMap<String, usize>,
    available_cash: f64,
    income_cash: &HashMap<String, f64>,
    age: f64,
    ledger: &mut TaxLedger,
) -> ContributionOutcome {
    let mut remaining = available_cash.max(0.0);
    let mut limits_used: HashMap<LimitGroup, f64> = HashMap::new();
    let mut pools = IncomePools::new(income_cash);
    let mut outcome = ContributionOutcome::default();
    let room = |group: LimitGroup, used: &HashMap<LimitGroup, f64>| {
        (contribution_limit(group, age) - used.get(&group).copied().unwrap_or(0.0)).max(0.0)
    };

    for rule in rules {
        if remaining <= 0.0 {
            break;
        }
        let Some(&idx) = account_index.get(&rule.account_id) else {
            continue;
        };
        let account = &mut accounts[idx];

        let eligible = if rule.income_ids.is_empty() {
            remaining
        } else {
            remaining.min(pools.available(&rule.income_ids))
        };

        let desired = match rule.contribution {
            ContributionType::DollarAmount { amount } => amount,
            ContributionType::PercentRemaining { percent } => remaining * percent,
            ContributionType::Unlimited => f64::INFINITY,
        };

        let group = account.account_type.limit_group();
        let employer_plan = group == Some(LimitGroup::Employer401k);
        let total_room = if employer_plan {
            room(LimitGroup::Section415c, &limits_used)
        } else {
            f64::INFINITY
        };
        let mega_backdoor =
            rule.enable_mega_backdoor_roth && account.account_type.supports_mega_backdoor_roth();
        let limit_room = if mega_backdoor {
            total_room
        } else {
            group
                .map(|g| room(g, &limits_used))
                .unwrap_or(f64::INFINITY)
        };
        let balance_room = rule
            .max_balance
            .map(|max| (max - account.balance).max(0.0))
            .unwrap_or(f64::INFINITY);

        let capped = desired.min(limit_room).min(balance_room);
        let amount = capped.min(eligible).max(0.0);
        if matches!(rule.contribution, ContributionType::DollarAmount { .. })
            && capped.is_finite()
            && amount + CASH_EPSILON < capped
        {
            debug!(rule = %rule.id, wanted = capped, funded = amount, "contribution under-funded");
            outcome.underfunded.push(rule.id.clone());
        }

        let employer = rule
            .employer_match
            .map(|ceiling| amount.min(ceiling))
            .unwrap_or(0.0)
            .min((balance_room - amount).max(0.0))
            .min((total_room - amount).max(0.0));

        if amount <= 0.0 && employer <= 0.0 {
            continue;
        }

        account.contribute(amount, employer);
        if let Some(g) = group {
            *limits_used.entry(g).or_insert(0.0) += amount;
        }
        if employer_plan {
            *limits_used.entry(LimitGroup::Section415c).or_insert(0.0) += amount + employer;
        }
        if account.category() == TaxCategory::TaxDeferred {
            ledger.pretax_contributions += amount;
        }
        if rule.income_ids.is_empty() {
            pools.drain_unrestricted(remaining, amount);
        } else {
            pools.drain_listed(&rule.income_ids, amount);
        }
        remaining -= amount;
        outcome.contributed += amount;
        outcome.employer_match += employer;
    }

    outcome.leftover = remaining.max(0.0);
    outcome
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Settlement {
    pub assessment: TaxAssessment,
    pub withdrawn: f64,
    pub refund: f64,
    pub unmet: f64,
}

/// Reconciles the period's income tax with what has already been paid
/// (`tax_paid`, beyond withholding). Unpaid tax is withdrawn through the
/// waterfall; each withdrawal can raise the liability, so the loop repeats
/// until the balance due is under a cent or the accounts run dry.
pub fn settle_taxes(
    accounts: &mut [AccountState],
    ledger: &mut TaxLedger,
    filing_status: FilingStatus,
    loss_carryover: f64,
    age: f64,
    tax_paid: &mut f64,
) -> Settlement {
    let mut settlement = Settlement::default();

    for _ in 0..MAX_SETTLEMENT_PASSES {
        let assessment = ledger.assess(filing_status, loss_carryover);
        settlement.assessment = assessment;
        let due = assessment.liability() - ledger.withheld - *tax_paid;

        if due < 0.0 {
            settlement.refund = -due;
            *tax_paid += due;
            return settlement;
        }
        if due < CASH_EPSILON {
            return settlement;
        }

        let out = withdraw_for_shortfall(accounts, due, age, ledger);
        *tax_paid += out.withdrawn;
        settlement.withdrawn += out.withdrawn;
        if out.unmet >= CASH_EPSILON {
            settlement.unmet = out.unmet;
            settlement.assessment = ledger.assess(filing_status, loss_carryover);
            return settlement;
        }
    }

    settlement.assessment = ledger.assess(filing_status, loss_carryover);
    settlement
}
