use std::f64::consts::PI;

const MODULUS: u64 = 1 << 31;
const MULTIPLIER: u64 = 1_103_515_245;
const INCREMENT: u64 = 12_345;

/// Spacing between Monte Carlo run seeds.
pub const SEED_STRIDE: u64 = 1009;

pub fn seed_state(seed: u64) -> u64 {
    let state = seed % MODULUS;
    if state == 0 { 1 } else { state }
}

/// One LCG step. Returns the uniform draw in `[0, 1)` and the next state.
pub fn lcg_next(state: u64) -> (f64, u64) {
    let next = (MULTIPLIER * (state % MODULUS) + INCREMENT) % MODULUS;
    (next as f64 / MODULUS as f64, next)
}

pub fn derive_run_seed(base_seed: u64, run_index: usize) -> u64 {
    base_seed.wrapping_add((run_index as u64).wrapping_mul(SEED_STRIDE))
}

#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed_state(seed),
        }
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    pub fn next_f64(&mut self) -> f64 {
        let (value, state) = lcg_next(self.state);
        self.state = state;
        value
    }

    pub fn standard_normal(&mut self) -> f64 {
        let mut u1 = self.next_f64();
        while u1 == 0.0 {
            u1 = self.next_f64();
        }
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// Uniform index in `0..n`.
    pub fn next_index(&mut self, n: usize) -> usize {
        let idx = (self.next_f64() * n as f64).floor() as usize;
        idx.min(n.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};

    #[test]
    fn first_draws_match_hand_calculation() {
        // state 1 -> 1103515245 + 12345 = 1103527590 (< 2^31)
        let (value, state) = lcg_next(1);
        assert_eq!(state, 1_103_527_590);
        assert_eq!(value, 1_103_527_590.0 / 2_147_483_648.0);

        // zero seeds are promoted to 1
        let mut rng = Lcg::new(0);
        assert_eq!(rng.next_f64(), value);
    }

    #[test]
    fn seed_wraps_at_modulus() {
        assert_eq!(seed_state(1 << 31), 1);
        assert_eq!(seed_state((1 << 31) + 5), 5);
    }

    #[test]
    fn run_seeds_are_spaced_by_stride() {
        assert_eq!(derive_run_seed(42, 0), 42);
        assert_eq!(derive_run_seed(42, 3), 42 + 3 * 1009);
        assert_eq!(derive_run_seed(u64::MAX, 1), 1008);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_draws_are_unit_interval_and_repeatable(seed in any::<u64>()) {
            let mut a = Lcg::new(seed);
            let mut b = Lcg::new(seed);
            for _ in 0..50 {
                let x = a.next_f64();
                prop_assert!((0.0..1.0).contains(&x));
                prop_assert_eq!(x.to_bits(), b.next_f64().to_bits());
            }
            let z = a.standard_normal();
            prop_assert!(z.is_finite());
            b.standard_normal();
            prop_assert_eq!(a.state(), b.state());
        }

        #[test]
        fn prop_next_index_stays_in_range(seed in any::<u64>(), n in 1usize..200) {
            let mut rng = Lcg::new(seed);
            for _ in 0..20 {
                prop_assert!(rng.next_index(n) < n);
            }
        }
    }
}
