use serde::Serialize;

use super::plan::FilingStatus;

pub const EARLY_WITHDRAWAL_AGE: f64 = 59.5;
pub const EARLY_WITHDRAWAL_PENALTY_RATE: f64 = 0.10;
pub const HSA_PENALTY_AGE: f64 = 65.0;
pub const HSA_PENALTY_RATE: f64 = 0.20;
pub const FICA_RATE: f64 = 0.0765;
pub const CAPITAL_LOSS_LIMIT: f64 = 3_000.0;

#[derive(Debug, Clone, Copy)]
pub struct Bracket {
    pub floor: f64,
    pub rate: f64,
}

const fn bracket(floor: f64, rate: f64) -> Bracket {
    Bracket { floor, rate }
}

#[derive(Debug)]
pub struct TaxTable {
    pub standard_deduction: f64,
    pub ordinary: &'static [Bracket],
    pub capital_gains: &'static [Bracket],
    /// Provisional-income thresholds for the 50% and 85% Social Security tiers.
    pub social_security_thresholds: (f64, f64),
}

static SINGLE: TaxTable = TaxTable {
    standard_deduction: 15_000.0,
    ordinary: &[
        bracket(0.0, 0.10),
        bracket(11_925.0, 0.12),
        bracket(48_475.0, 0.22),
        bracket(103_350.0, 0.24),
        bracket(197_300.0, 0.32),
        bracket(250_525.0, 0.35),
        bracket(626_350.0, 0.37),
    ],
    capital_gains: &[
        bracket(0.0, 0.0),
        bracket(47_025.0, 0.15),
        bracket(518_900.0, 0.20),
    ],
    social_security_thresholds: (25_000.0, 34_000.0),
};

static MARRIED_FILING_JOINTLY: TaxTable = TaxTable {
    standard_deduction: 30_000.0,
    ordinary: &[
        bracket(0.0, 0.10),
        bracket(23_850.0, 0.12),
        bracket(96_950.0, 0.22),
        bracket(206_700.0, 0.24),
        bracket(394_600.0, 0.32),
        bracket(501_050.0, 0.35),
        bracket(751_600.0, 0.37),
    ],
    capital_gains: &[
        bracket(0.0, 0.0),
        bracket(94_050.0, 0.15),
        bracket(583_750.0, 0.20),
    ],
    social_security_thresholds: (32_000.0, 44_000.0),
};

static HEAD_OF_HOUSEHOLD: TaxTable = TaxTable {
    standard_deduction: 22_500.0,
    ordinary: &[
        bracket(0.0, 0.10),
        bracket(17_000.0, 0.12),
        bracket(64_850.0, 0.22),
        bracket(103_350.0, 0.24),
        bracket(197_300.0, 0.32),
        bracket(250_500.0, 0.35),
        bracket(626_350.0, 0.37),
    ],
    capital_gains: &[
        bracket(0.0, 0.0),
        bracket(63_000.0, 0.15),
        bracket(551_350.0, 0.20),
    ],
    social_security_thresholds: (25_000.0, 34_000.0),
};

pub fn tax_table(status: FilingStatus) -> &'static TaxTable {
    match status {
        FilingStatus::Single => &SINGLE,
        FilingStatus::MarriedFilingJointly => &MARRIED_FILING_JOINTLY,
        FilingStatus::HeadOfHousehold => &HEAD_OF_HOUSEHOLD,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxComputation {
    pub ordinary_tax: f64,
    pub cap_gains_tax: f64,
    pub marginal_rate: f64,
    pub effective_rate: f64,
    pub taxable_ordinary: f64,
    pub taxable_qualified: f64,
}

impl TaxComputation {
    pub fn total(&self) -> f64 {
        self.ordinary_tax + self.cap_gains_tax
    }
}

/// Tax on the slice of income between `from` and `to`, where `from` is the
/// income already stacked below it.
fn tax_on_slice(brackets: &[Bracket], from: f64, to: f64) -> f64 {
    if to <= from {
        return 0.0;
    }
    let mut tax = 0.0;
    for (idx, b) in brackets.iter().enumerate() {
        let upper = brackets
            .get(idx + 1)
            .map(|next| next.floor)
            .unwrap_or(f64::INFINITY);
        let overlap = to.min(upper) - from.max(b.floor);
        if overlap > 0.0 {
            tax += overlap * b.rate;
        }
    }
    tax
}

fn marginal_rate(brackets: &[Bracket], income: f64) -> f64 {
    brackets
        .iter()
        .rev()
        .find(|b| income >= b.floor)
        .map(|b| b.rate)
        .unwrap_or(0.0)
}

/// Federal income tax for one year. The standard deduction is taken from
/// ordinary income first; any unused remainder shelters qualified income,
/// which is then stacked on top of ordinary income in the preferential
/// brackets.
pub fn compute_tax(
    taxable_ordinary_income: f64,
    qualified_income: f64,
    filing_status: FilingStatus,
) -> TaxComputation {
    let table = tax_table(filing_status);
    let ordinary = taxable_ordinary_income.max(0.0);
    let qualified = qualified_income.max(0.0);

    let taxable_ordinary = (ordinary - table.standard_deduction).max(0.0);
    let unused_deduction = (table.standard_deduction - ordinary).max(0.0);
    let taxable_qualified = (qualified - unused_deduction).max(0.0);

    let ordinary_tax = tax_on_slice(table.ordinary, 0.0, taxable_ordinary);
    let cap_gains_tax = tax_on_slice(
        table.capital_gains,
        taxable_ordinary,
        taxable_ordinary + taxable_qualified,
    );

    let gross = ordinary + qualified;
    let effective_rate = if gross > 0.0 {
        (ordinary_tax + cap_gains_tax) / gross
    } else {
        0.0
    };

    TaxComputation {
        ordinary_tax,
        cap_gains_tax,
        marginal_rate: marginal_rate(table.ordinary, taxable_ordinary),
        effective_rate,
        taxable_ordinary,
        taxable_qualified,
    }
}

/// Portion of Social Security benefits included in ordinary income, using the
/// provisional-income tiers. `other_income` excludes the benefits themselves.
pub fn taxable_social_security(benefits: f64, other_income: f64, filing_status: FilingStatus) -> f64 {
    if benefits <= 0.0 {
        return 0.0;
    }
    let (base, adjusted_base) = tax_table(filing_status).social_security_thresholds;
    let provisional = other_income.max(0.0) + 0.5 * benefits;

    if provisional <= base {
        0.0
    } else if provisional <= adjusted_base {
        (0.5 * (provisional - base)).min(0.5 * benefits)
    } else {
        let first_tier = (0.5 * (adjusted_base - base)).min(0.5 * benefits);
        (0.85 * (provisional - adjusted_base) + first_tier).min(0.85 * benefits)
    }
}

pub fn early_withdrawal_penalty(amount: f64, age: f64) -> f64 {
    if age < EARLY_WITHDRAWAL_AGE && amount > 0.0 {
        amount * EARLY_WITHDRAWAL_PENALTY_RATE
    } else {
        0.0
    }
}

pub fn hsa_withdrawal_penalty(amount: f64, age: f64) -> f64 {
    if age < HSA_PENALTY_AGE && amount > 0.0 {
        amount * HSA_PENALTY_RATE
    } else {
        0.0
    }
}

pub fn payroll_tax(wages: f64) -> f64 {
    wages.max(0.0) * FICA_RATE
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CapitalGainsNetting {
    pub taxable_gains: f64,
    pub ordinary_offset: f64,
    pub carryover: f64,
}

/// Nets realized gains against losses carried from earlier years. A net loss
/// offsets up to $3,000 of ordinary income; the rest carries forward.
pub fn net_capital_gains(realized: f64, carryover: f64) -> CapitalGainsNetting {
    let net = realized - carryover.max(0.0);
    if net >= 0.0 {
        return CapitalGainsNetting {
            taxable_gains: net,
            ordinary_offset: 0.0,
            carryover: 0.0,
        };
    }
    let loss = -net;
    let offset = loss.min(CAPITAL_LOSS_LIMIT);
    CapitalGainsNetting {
        taxable_gains: 0.0,
        ordinary_offset: offset,
        carryover: loss - offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    const STATUSES: [FilingStatus; 3] = [
        FilingStatus::Single,
        FilingStatus::MarriedFilingJointly,
        FilingStatus::HeadOfHousehold,
    ];

    #[test]
    fn oracle_single_ordinary_tax_matches_hand_calculation() {
        // 60,000 - 15,000 deduction = 45,000 taxable
        // 11,925 * 10% + (45,000 - 11,925) * 12% = 1,192.50 + 3,969.00
        let t = compute_tax(60_000.0, 0.0, FilingStatus::Single);
        assert_approx(t.taxable_ordinary, 45_000.0);
        assert_approx(t.ordinary_tax, 5_161.5);
        assert_approx(t.cap_gains_tax, 0.0);
        assert_approx(t.marginal_rate, 0.12);
        assert_approx(t.effective_rate, 5_161.5 / 60_000.0);
    }

    #[test]
    fn oracle_gains_stack_on_top_of_ordinary_income() {
        // Ordinary fills 0..45,000; gains occupy 45,000..55,000.
        // 2,025 at 0%, 7,975 at 15% = 1,196.25
        let t = compute_tax(60_000.0, 10_000.0, FilingStatus::Single);
        assert_approx(t.ordinary_tax, 5_161.5);
        assert_approx(t.cap_gains_tax, 1_196.25);
    }

    #[test]
    fn unused_deduction_shelters_qualified_income() {
        let t = compute_tax(10_000.0, 20_000.0, FilingStatus::Single);
        assert_approx(t.taxable_ordinary, 0.0);
        assert_approx(t.taxable_qualified, 15_000.0);
        assert_approx(t.total(), 0.0);
    }

    #[test]
    fn married_brackets_are_wider_than_single() {
        let single = compute_tax(150_000.0, 0.0, FilingStatus::Single);
        let joint = compute_tax(150_000.0, 0.0, FilingStatus::MarriedFilingJointly);
        let hoh = compute_tax(150_000.0, 0.0, FilingStatus::HeadOfHousehold);
        assert!(joint.ordinary_tax < hoh.ordinary_tax);
        assert!(hoh.ordinary_tax < single.ordinary_tax);
    }

    #[test]
    fn top_bracket_applies_above_last_floor() {
        let t = compute_tax(1_000_000.0, 0.0, FilingStatus::Single);
        assert_approx(t.marginal_rate, 0.37);
    }

    #[test]
    fn oracle_social_security_tiers() {
        // provisional = 20,000 + 15,000 = 35,000 (> 34,000)
        // 85% * 1,000 + min(50% * 9,000, 15,000) = 850 + 4,500
        assert_approx(taxable_social_security(30_000.0, 20_000.0, FilingStatus::Single), 5_350.0);
        assert_approx(taxable_social_security(20_000.0, 10_000.0, FilingStatus::Single), 0.0);
        // capped at 85% of benefits
        assert_approx(
            taxable_social_security(40_000.0, 500_000.0, FilingStatus::Single),
            34_000.0,
        );
    }

    #[test]
    fn penalties_apply_only_below_threshold_ages() {
        assert_approx(early_withdrawal_penalty(10_000.0, 59.0), 1_000.0);
        assert_approx(early_withdrawal_penalty(10_000.0, 59.5), 0.0);
        assert_approx(hsa_withdrawal_penalty(10_000.0, 64.0), 2_000.0);
        assert_approx(hsa_withdrawal_penalty(10_000.0, 65.0), 0.0);
    }

    #[test]
    fn capital_losses_offset_ordinary_up_to_limit_and_carry() {
        let n = net_capital_gains(-10_000.0, 0.0);
        assert_approx(n.ordinary_offset, 3_000.0);
        assert_approx(n.carryover, 7_000.0);

        let n = net_capital_gains(5_000.0, 7_000.0);
        assert_approx(n.taxable_gains, 0.0);
        assert_approx(n.ordinary_offset, 2_000.0);
        assert_approx(n.carryover, 0.0);

        let n = net_capital_gains(9_000.0, 2_000.0);
        assert_approx(n.taxable_gains, 7_000.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(128))]

        #[test]
        fn prop_tax_is_non_decreasing_in_income(
            ordinary in 0.0f64..1_500_000.0,
            qualified in 0.0f64..800_000.0,
            bump in 0.0f64..50_000.0,
            status_idx in 0usize..3,
        ) {
            let status = STATUSES[status_idx];
            let base = compute_tax(ordinary, qualified, status).total();
            let more_ordinary = compute_tax(ordinary + bump, qualified, status).total();
            let more_qualified = compute_tax(ordinary, qualified + bump, status).total();
            prop_assert!(more_ordinary + 1e-9 >= base);
            prop_assert!(more_qualified + 1e-9 >= base);
        }

        #[test]
        fn prop_tax_is_deterministic_and_below_income(
            ordinary in 0.0f64..2_000_000.0,
            qualified in 0.0f64..500_000.0,
            status_idx in 0usize..3,
        ) {
            let status = STATUSES[status_idx];
            let a = compute_tax(ordinary, qualified, status);
            let b = compute_tax(ordinary, qualified, status);
            prop_assert!(a == b);
            prop_assert!(a.total() <= (ordinary + qualified) * 0.37 + 1e-9);
        }

        #[test]
        fn prop_taxable_social_security_is_monotone(
            benefits in 0.0f64..80_000.0,
            other in 0.0f64..200_000.0,
            bump in 0.0f64..20_000.0,
        ) {
            let base = taxable_social_security(benefits, other, FilingStatus::Single);
            let more = taxable_social_security(benefits, other + bump, FilingStatus::Single);
            prop_assert!(more + 1e-9 >= base);
            prop_assert!(base <= 0.85 * benefits + 1e-9);
        }
    }
}
