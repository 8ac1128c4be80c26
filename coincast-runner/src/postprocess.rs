//! Raw model output to bounded per-horizon prices and a confidence score.
//!
//! Only the shortest-horizon output is used. Its relative change Δ is spread
//! over the reported horizons with fixed multipliers (24h ×1, 48h ×1.5,
//! 3d ×2, 7d ×3), then bounded:
//! - upside: the 7d price may not exceed `max_upside_ratio × current`
//! - positivity: no price may fall to or below `min_price_ratio × current`
//!
//! Both bounds rescale Δ itself, so the horizon ordering is preserved.

use chrono::NaiveDateTime;
use thiserror::Error;

use coincast_core::domain::{Horizon, ModelPerformanceRecord, Prediction};

use crate::config::ForecastConfig;
use crate::model::OutputKind;

#[derive(Debug, Error, PartialEq)]
pub enum PostProcessError {
    #[error("current price must be positive and finite, got {0}")]
    InvalidCurrentPrice(f64),

    #[error("model produced no output")]
    EmptyOutput,

    #[error("model produced a non-finite output: {0}")]
    NonFiniteOutput(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessor {
    pub max_upside_ratio: f64,
    pub min_price_ratio: f64,
    pub default_confidence: f64,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self {
            max_upside_ratio: 2.0,
            min_price_ratio: 0.01,
            default_confidence: 50.0,
        }
    }
}

impl From<&ForecastConfig> for PostProcessor {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            max_upside_ratio: config.max_upside_ratio,
            min_price_ratio: config.min_price_ratio,
            default_confidence: config.default_confidence,
        }
    }
}

impl PostProcessor {
    /// Relative change implied by the shortest-horizon output.
    pub fn base_delta(
        &self,
        current_price: f64,
        raw: &[f64],
        kind: OutputKind,
    ) -> Result<f64, PostProcessError> {
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(PostProcessError::InvalidCurrentPrice(current_price));
        }
        let first = *raw.first().ok_or(PostProcessError::EmptyOutput)?;
        if !first.is_finite() {
            return Err(PostProcessError::NonFiniteOutput(first));
        }
        Ok(match kind {
            OutputKind::RelativeChange => first,
            OutputKind::AbsolutePrice => first / current_price - 1.0,
        })
    }

    /// Prices for [`Horizon::ALL`], in that order.
    pub fn horizon_prices(&self, current_price: f64, delta: f64) -> Result<[f64; 4], PostProcessError> {
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(PostProcessError::InvalidCurrentPrice(current_price));
        }
        if !delta.is_finite() {
            return Err(PostProcessError::NonFiniteOutput(delta));
        }

        let widest = Horizon::D7.multiplier();
        let mut delta = delta;
        if 1.0 + widest * delta > self.max_upside_ratio {
            delta = (self.max_upside_ratio - 1.0) / widest;
        } else if 1.0 + widest * delta <= self.min_price_ratio {
            delta = (self.min_price_ratio - 1.0) / widest;
        }

        Ok(Horizon::ALL.map(|h| current_price * (1.0 + h.multiplier() * delta)))
    }

    /// `100 × (1 − mean MAE / current)`, clamped to [0, 100]. Without usable
    /// error history the neutral default is returned.
    pub fn confidence(&self, current_price: f64, performance: Option<&ModelPerformanceRecord>) -> f64 {
        let Some(mae) = performance.and_then(ModelPerformanceRecord::mean_mae) else {
            return self.default_confidence;
        };
        if !current_price.is_finite() || current_price <= 0.0 {
            return self.default_confidence;
        }
        (100.0 * (1.0 - mae / current_price)).clamp(0.0, 100.0)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build_prediction(
        &self,
        asset_id: &str,
        made_at: NaiveDateTime,
        model_version: &str,
        current_price: f64,
        raw: &[f64],
        kind: OutputKind,
        performance: Option<&ModelPerformanceRecord>,
    ) -> Result<Prediction, PostProcessError> {
        let delta = self.base_delta(current_price, raw, kind)?;
        let [price_24h, price_48h, price_3d, price_7d] = self.horizon_prices(current_price, delta)?;
        Ok(Prediction {
            id: None,
            asset_id: asset_id.to_string(),
            prediction_made_at: made_at,
            model_version: model_version.to_string(),
            price_24h,
            price_48h,
            price_3d,
            price_7d,
            confidence_score: self.confidence(current_price, performance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use coincast_core::domain::HorizonError;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn large_gain_capped_at_double_with_order_kept() {
        let p = PostProcessor::default().horizon_prices(100.0, 0.5).unwrap();
        assert!(close(p[3], 200.0), "7d = {}", p[3]);
        assert!(p[0] < p[1] && p[1] < p[2] && p[2] < p[3]);
        assert!(close(p[0], 100.0 + 100.0 / 3.0));
    }

    #[test]
    fn moderate_change_uses_multipliers() {
        let p = PostProcessor::default().horizon_prices(200.0, 0.1).unwrap();
        assert!(close(p[0], 220.0));
        assert!(close(p[1], 230.0));
        assert!(close(p[2], 240.0));
        assert!(close(p[3], 260.0));

        let p = PostProcessor::default().horizon_prices(200.0, -0.1).unwrap();
        assert!(close(p[3], 140.0));
        assert!(p[0] > p[1] && p[1] > p[2] && p[2] > p[3]);
    }

    #[test]
    fn crash_bottoms_out_at_one_percent() {
        let p = PostProcessor::default().horizon_prices(50.0, -0.9).unwrap();
        assert!(close(p[3], 0.5));
        assert!(p.iter().all(|v| *v > 0.0));
        assert!(p[0] > p[3]);
    }

    #[test]
    fn non_finite_output_rejected() {
        let pp = PostProcessor::default();
        assert!(matches!(
            pp.base_delta(10.0, &[f64::NAN], OutputKind::RelativeChange),
            Err(PostProcessError::NonFiniteOutput(_))
        ));
        assert!(matches!(
            pp.horizon_prices(10.0, f64::INFINITY),
            Err(PostProcessError::NonFiniteOutput(_))
        ));
    }

    #[test]
    fn absolute_output_converted_to_change() {
        let pp = PostProcessor::default();
        let d = pp.base_delta(100.0, &[110.0, 999.0], OutputKind::AbsolutePrice).unwrap();
        assert!(close(d, 0.1));
        assert!(matches!(
            pp.base_delta(0.0, &[1.0], OutputKind::RelativeChange),
            Err(PostProcessError::InvalidCurrentPrice(_))
        ));
        assert_eq!(
            pp.base_delta(1.0, &[], OutputKind::RelativeChange),
            Err(PostProcessError::EmptyOutput)
        );
    }

    fn perf(maes: &[f64]) -> ModelPerformanceRecord {
        ModelPerformanceRecord {
            asset_id: "x".into(),
            model_version: "RIDGE_20240101".into(),
            trained_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            errors: maes
                .iter()
                .zip(Horizon::ALL)
                .map(|(mae, horizon)| HorizonError {
                    horizon,
                    mae: *mae,
                    rmse: *mae,
                })
                .collect(),
            training_samples: 10,
            notes: None,
        }
    }

    #[test]
    fn confidence_from_mae_and_clamped() {
        let pp = PostProcessor::default();
        assert!(close(pp.confidence(100.0, Some(&perf(&[10.0, 30.0]))), 80.0));
        assert_eq!(pp.confidence(100.0, Some(&perf(&[500.0]))), 0.0);
        assert_eq!(pp.confidence(100.0, None), 50.0);
        assert_eq!(pp.confidence(100.0, Some(&perf(&[]))), 50.0);
    }

    #[test]
    fn build_prediction_fills_every_field() {
        let made_at = NaiveDate::from_ymd_opt(2024, 5, 5)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let p = PostProcessor::default()
            .build_prediction("x", made_at, "RIDGE_20240504", 10.0, &[0.02], OutputKind::RelativeChange, None)
            .unwrap();
        assert_eq!(p.model_version, "RIDGE_20240504");
        assert!(close(p.price_24h, 10.2));
        assert!(close(p.price_7d, 10.6));
        assert_eq!(p.confidence_score, 50.0);
        assert_eq!(p.id, None);
    }
}
