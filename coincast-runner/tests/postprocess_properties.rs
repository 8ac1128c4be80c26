//! Property tests for prediction post-processing bounds.
//!
//! Uses proptest to verify:
//! 1. Every horizon price is finite and positive
//! 2. The 7d price never exceeds the upside cap
//! 3. Horizon prices move monotonically in the direction of the model output
//! 4. Confidence stays inside [0, 100]

use chrono::NaiveDate;
use proptest::prelude::*;

use coincast_core::domain::{Horizon, HorizonError, ModelPerformanceRecord};
use coincast_runner::{OutputKind, PostProcessor};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    1e-6..1e6_f64
}

fn arb_delta() -> impl Strategy<Value = f64> {
    -50.0..50.0_f64
}

fn performance(mae: f64) -> ModelPerformanceRecord {
    ModelPerformanceRecord {
        asset_id: "prop".into(),
        model_version: "RIDGE_20240101".into(),
        trained_at: NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        errors: vec![HorizonError {
            horizon: Horizon::H24,
            mae,
            rmse: mae,
        }],
        training_samples: 10,
        notes: None,
    }
}

proptest! {
    #[test]
    fn horizon_prices_are_positive_and_capped(current in arb_price(), delta in arb_delta()) {
        let post = PostProcessor::default();
        let prices = post.horizon_prices(current, delta).unwrap();

        for p in prices {
            prop_assert!(p.is_finite());
            prop_assert!(p > 0.0);
        }
        prop_assert!(prices[3] <= current * post.max_upside_ratio * (1.0 + 1e-12));
        prop_assert!(prices[3] >= current * post.min_price_ratio * (1.0 - 1e-9));
    }

    #[test]
    fn horizon_prices_follow_the_output_direction(current in arb_price(), delta in arb_delta()) {
        let prices = PostProcessor::default().horizon_prices(current, delta).unwrap();
        for pair in prices.windows(2) {
            if delta >= 0.0 {
                prop_assert!(pair[1] >= pair[0]);
            } else {
                prop_assert!(pair[1] <= pair[0]);
            }
        }
    }

    #[test]
    fn absolute_outputs_are_converted_to_relative(current in arb_price(), ratio in 0.5..1.5_f64) {
        let post = PostProcessor::default();
        let delta = post.base_delta(current, &[current * ratio], OutputKind::AbsolutePrice).unwrap();
        prop_assert!((delta - (ratio - 1.0)).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped(current in arb_price(), mae in 0.0..1e7_f64) {
        let post = PostProcessor::default();
        let c = post.confidence(current, Some(&performance(mae)));
        prop_assert!((0.0..=100.0).contains(&c));
    }
}
