use super::plan::{Account, AccountType, AssetAllocation, TaxCategory};
use super::types::{AccountSnapshot, AssetAmounts, ReturnVector};

/// Id of the cash bucket that receives saved surplus and unneeded RMDs.
pub const SAVINGS_BUCKET_ID: &str = "__savings__";

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeriodFlows {
    pub contributions: f64,
    pub employer_match: f64,
    pub withdrawals: f64,
    pub realized_gains: f64,
    pub rmd: f64,
}

/// Result of taking cash out of one account. `basis` is the cost basis
/// (taxable) or contribution basis (Roth) consumed; `gain` is the realized
/// gain or Roth earnings portion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Withdrawal {
    pub amount: f64,
    pub basis: f64,
    pub gain: f64,
}

#[derive(Debug, Clone)]
pub struct AccountState {
    pub id: String,
    pub account_type: AccountType,
    pub allocation: AssetAllocation,
    pub balance: f64,
    pub cost_basis: f64,
    pub contribution_basis: f64,
    pub flows: PeriodFlows,
}

impl AccountState {
    pub fn from_plan(account: &Account) -> Self {
        let cost_basis = match account.account_type.tax_category() {
            TaxCategory::Taxable => account.cost_basis.unwrap_or(account.balance),
            _ => 0.0,
        };
        let contribution_basis = match account.account_type.tax_category() {
            TaxCategory::TaxFree => account.contribution_basis.unwrap_or(0.0),
            _ => 0.0,
        };
        Self {
            id: account.id.clone(),
            account_type: account.account_type,
            allocation: account.allocation,
            balance: account.balance,
            cost_basis,
            contribution_basis,
            flows: PeriodFlows::default(),
        }
    }

    pub fn savings_bucket() -> Self {
        Self {
            id: SAVINGS_BUCKET_ID.to_string(),
            account_type: AccountType::Savings,
            allocation: AssetAllocation::CASH_ONLY,
            balance: 0.0,
            cost_basis: 0.0,
            contribution_basis: 0.0,
            flows: PeriodFlows::default(),
        }
    }

    pub fn category(&self) -> TaxCategory {
        self.account_type.tax_category()
    }

    pub fn begin_period(&mut self) {
        self.flows = PeriodFlows::default();
    }

    pub fn contribute(&mut self, employee: f64, employer: f64) {
        let employee = employee.max(0.0);
        let employer = employer.max(0.0);
        let total = employee + employer;
        if total <= 0.0 {
            return;
        }
        self.balance += total;
        match self.category() {
            TaxCategory::Taxable => self.cost_basis += total,
            TaxCategory::TaxFree => self.contribution_basis += employee,
            TaxCategory::TaxDeferred | TaxCategory::CashSavings => {}
        }
        self.flows.contributions += employee;
        self.flows.employer_match += employer;
    }

    /// Deposit that is not a contribution (saved surplus, RMD proceeds).
    pub fn deposit(&mut self, amount: f64) {
        if amount > 0.0 {
            self.balance += amount;
            if self.category() == TaxCategory::Taxable {
                self.cost_basis += amount;
            }
        }
    }

    /// Withdraws up to `requested`, clamped to the balance. Taxable accounts
    /// release basis pro rata; Roth accounts release contribution basis
    /// before earnings.
    pub fn withdraw(&mut self, requested: f64) -> Withdrawal {
        let amount = requested.min(self.balance).max(0.0);
        if amount <= 0.0 {
            return Withdrawal::default();
        }

        let (basis, gain) = match self.category() {
            TaxCategory::Taxable => {
                let basis = (self.cost_basis * amount / self.balance).min(self.cost_basis);
                self.cost_basis -= basis;
                (basis, amount - basis)
            }
            TaxCategory::TaxFree => {
                let basis = amount.min(self.contribution_basis);
                self.contribution_basis -= basis;
                (basis, amount - basis)
            }
            TaxCategory::TaxDeferred | TaxCategory::CashSavings => (0.0, 0.0),
        };

        self.balance -= amount;
        if self.balance <= 0.0 {
            self.zero();
        }
        self.flows.withdrawals += amount;
        if self.category() == TaxCategory::Taxable {
            self.flows.realized_gains += gain;
        }
        Withdrawal {
            amount,
            basis,
            gain,
        }
    }

    /// Roth withdrawal limited to contribution basis.
    pub fn withdraw_basis(&mut self, requested: f64) -> Withdrawal {
        let cap = self.contribution_basis.min(self.balance);
        self.withdraw(requested.min(cap))
    }

    pub fn asset_values(&self) -> AssetAmounts {
        AssetAmounts {
            stocks: self.balance * self.allocation.stocks,
            bonds: self.balance * self.allocation.bonds,
            cash: self.balance * self.allocation.cash,
        }
    }

    /// Grows each asset slice by its rate and rebalances back to target.
    pub fn apply_returns(&mut self, returns: &ReturnVector) -> AssetAmounts {
        let values = self.asset_values();
        let amounts = AssetAmounts {
            stocks: values.stocks * returns.stocks.max(-1.0),
            bonds: values.bonds * returns.bonds.max(-1.0),
            cash: values.cash * returns.cash.max(-1.0),
        };
        self.balance = (self.balance + amounts.total()).max(0.0);
        amounts
    }

    pub fn zero(&mut self) {
        self.balance = 0.0;
        self.cost_basis = 0.0;
        self.contribution_basis = 0.0;
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.id.clone(),
            account_type: self.account_type,
            tax_category: self.category(),
            balance: self.balance,
            contributions: self.flows.contributions,
            employer_match: self.flows.employer_match,
            withdrawals: self.flows.withdrawals,
            realized_gains: self.flows.realized_gains,
            rmd: self.flows.rmd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::fixtures::account;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn taxable_withdrawal_realizes_pro_rata_gain() {
        let mut plan_account = account("t", AccountType::TaxableBrokerage, 100_000.0);
        plan_account.cost_basis = Some(60_000.0);
        let mut state = AccountState::from_plan(&plan_account);

        let w = state.withdraw(25_000.0);
        assert_approx(w.basis, 15_000.0);
        assert_approx(w.gain, 10_000.0);
        assert_approx(state.balance, 75_000.0);
        assert_approx(state.cost_basis, 45_000.0);
        assert_approx(state.flows.realized_gains, 10_000.0);
    }

    #[test]
    fn taxable_basis_defaults_to_balance() {
        let state = AccountState::from_plan(&account("t", AccountType::TaxableBrokerage, 5_000.0));
        assert_approx(state.cost_basis, 5_000.0);
    }

    #[test]
    fn roth_withdrawal_uses_basis_before_earnings() {
        let mut plan_account = account("r", AccountType::RothIra, 50_000.0);
        plan_account.contribution_basis = Some(20_000.0);
        let mut state = AccountState::from_plan(&plan_account);

        let first = state.withdraw_basis(30_000.0);
        assert_approx(first.amount, 20_000.0);
        assert_approx(first.gain, 0.0);

        let second = state.withdraw(10_000.0);
        assert_approx(second.basis, 0.0);
        assert_approx(second.gain, 10_000.0);
        assert_approx(state.balance, 20_000.0);
    }

    #[test]
    fn emptied_roth_forgets_its_old_basis() {
        // 5,000 contributed, then markets cut the balance to 1,000
        let mut plan_account = account("r", AccountType::RothIra, 1_000.0);
        plan_account.contribution_basis = Some(5_000.0);
        let mut state = AccountState::from_plan(&plan_account);

        let drained = state.withdraw_basis(f64::INFINITY);
        assert_approx(drained.amount, 1_000.0);
        assert_approx(state.balance, 0.0);
        assert_approx(state.contribution_basis, 0.0);

        state.contribute(500.0, 0.0);
        state.apply_returns(&ReturnVector {
            stocks: 1.0,
            bonds: 1.0,
            ..ReturnVector::default()
        });
        let again = state.withdraw_basis(f64::INFINITY);
        assert_approx(again.amount, 500.0);
        assert_approx(state.balance, 500.0);
    }

    #[test]
    fn withdrawal_is_clamped_to_balance() {
        let mut state = AccountState::from_plan(&account("k", AccountType::Traditional401k, 1_000.0));
        let w = state.withdraw(5_000.0);
        assert_approx(w.amount, 1_000.0);
        assert_approx(state.balance, 0.0);
    }

    #[test]
    fn contributions_track_basis_by_category() {
        let mut roth = AccountState::from_plan(&account("r", AccountType::Roth401k, 0.0));
        roth.contribute(5_000.0, 2_000.0);
        assert_approx(roth.balance, 7_000.0);
        assert_approx(roth.contribution_basis, 5_000.0);
        assert_approx(roth.flows.employer_match, 2_000.0);

        let mut taxable = AccountState::from_plan(&account("t", AccountType::TaxableBrokerage, 0.0));
        taxable.contribute(3_000.0, 0.0);
        assert_approx(taxable.cost_basis, 3_000.0);
    }

    #[test]
    fn returns_apply_per_asset_slice() {
        // 60/40 split of 100,000: 60,000 * 10% + 40,000 * -5% = 4,000
        let mut state = AccountState::from_plan(&account("k", AccountType::TraditionalIra, 100_000.0));
        let amounts = state.apply_returns(&ReturnVector {
            stocks: 0.10,
            bonds: -0.05,
            ..ReturnVector::default()
        });
        assert_approx(amounts.stocks, 6_000.0);
        assert_approx(amounts.bonds, -2_000.0);
        assert_approx(state.balance, 104_000.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_balance_never_negative(
            start in 0.0f64..1_000_000.0,
            basis_frac in 0.0f64..1.0,
            draws in proptest::collection::vec(0.0f64..400_000.0, 1..8),
            shock in -1.5f64..1.0,
        ) {
            let mut plan_account = account("t", AccountType::TaxableBrokerage, start);
            plan_account.cost_basis = Some(start * basis_frac);
            let mut state = AccountState::from_plan(&plan_account);
            for d in draws {
                state.withdraw(d);
                prop_assert!(state.balance >= 0.0);
                prop_assert!(state.cost_basis >= -1e-9);
                state.apply_returns(&ReturnVector { stocks: shock, bonds: shock, ..ReturnVector::default() });
                prop_assert!(state.balance >= 0.0);
            }
        }
    }
}
