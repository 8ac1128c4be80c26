//! Property tests for windowing and imputation invariants.
//!
//! Uses proptest to verify:
//! 1. Window count is exactly N - L - max(H) whenever history suffices
//! 2. Every target is the price at its documented offset
//! 3. Imputation leaves no gaps and never invents values before the first observation
//! 4. Scaled training inputs stay inside [0, 1]

use chrono::NaiveDate;
use proptest::prelude::*;

use coincast_core::features::{build_training_set, impute_series, DataError, FeatureRow};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_prices(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.01..100_000.0_f64, 1..max_len)
}

fn arb_horizons() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(1..10u32, 1..5)
}

fn rows(prices: &[f64]) -> Vec<FeatureRow> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    prices
        .iter()
        .enumerate()
        .map(|(i, p)| FeatureRow {
            day: start + chrono::Duration::days(i as i64),
            raw: [Some(*p), Some(p * 2.0), Some(1.0), None, Some(50.0), None, None],
        })
        .collect()
}

// ── 1 + 2. Window count and target offsets ───────────────────────────

proptest! {
    #[test]
    fn window_count_and_targets(
        prices in arb_prices(60),
        seq_len in 1..8usize,
        horizons in arb_horizons(),
    ) {
        let mut sorted = horizons.clone();
        sorted.sort_unstable();
        sorted.dedup();
        let max_h = *sorted.last().unwrap() as usize;
        let n = prices.len();

        match build_training_set("p", &rows(&prices), seq_len, &horizons) {
            Ok(set) => {
                prop_assert!(n > seq_len + max_h);
                prop_assert_eq!(set.len(), n - seq_len - max_h);
                prop_assert_eq!(&set.horizons, &sorted);
                for (i, targets) in set.targets.iter().enumerate() {
                    prop_assert_eq!(set.windows[i].anchor_price, prices[i + seq_len - 1]);
                    for (k, h) in sorted.iter().enumerate() {
                        prop_assert_eq!(targets[k], prices[i + seq_len + *h as usize - 1]);
                    }
                }
            }
            Err(DataError::InsufficientHistory { available, required, .. }) => {
                prop_assert_eq!(available, n);
                prop_assert!(n < required);
            }
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
    }
}

// ── 3. Imputation ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn imputation_fills_every_slot(values in prop::collection::vec(prop::option::of(-1e6..1e6_f64), 0..40)) {
        let filled = impute_series(&values);
        prop_assert_eq!(filled.len(), values.len());
        prop_assert!(filled.iter().all(|v| v.is_finite()));

        match values.iter().position(Option::is_some) {
            None => prop_assert!(filled.iter().all(|v| *v == 0.0)),
            Some(first) => {
                let first_value = values[first].unwrap();
                for v in &filled[..first] {
                    prop_assert_eq!(*v, first_value);
                }
                for (i, original) in values.iter().enumerate() {
                    if let Some(x) = original {
                        prop_assert_eq!(filled[i], *x);
                    }
                }
            }
        }
    }
}

// ── 4. Scaling bounds ────────────────────────────────────────────────

proptest! {
    #[test]
    fn training_inputs_are_unit_scaled(prices in prop::collection::vec(0.01..1e5_f64, 12..40)) {
        let set = build_training_set("p", &rows(&prices), 4, &[1, 2]).unwrap();
        for w in &set.windows {
            for v in w.flatten() {
                prop_assert!((0.0..=1.0 + 1e-12).contains(&v), "value {v} out of range");
            }
        }
    }
}
