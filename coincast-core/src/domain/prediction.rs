use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{AssetId, Horizon};

/// Output of one forecast run for one asset. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Store-assigned row id; `None` until persisted.
    pub id: Option<i64>,
    pub asset_id: AssetId,
    pub prediction_made_at: NaiveDateTime,
    pub model_version: String,
    pub price_24h: f64,
    pub price_48h: f64,
    pub price_3d: f64,
    pub price_7d: f64,
    /// Trust in the forecast, always within [0, 100].
    pub confidence_score: f64,
}

impl Prediction {
    pub fn price_at(&self, horizon: Horizon) -> f64 {
        match horizon {
            Horizon::H24 => self.price_24h,
            Horizon::H48 => self.price_48h,
            Horizon::D3 => self.price_3d,
            Horizon::D7 => self.price_7d,
        }
    }
}

/// Validation error of a trained model at one horizon, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonError {
    pub horizon: Horizon,
    pub mae: f64,
    pub rmse: f64,
}

/// Error metrics written once when a model is trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformanceRecord {
    pub asset_id: AssetId,
    pub model_version: String,
    pub trained_at: NaiveDateTime,
    /// Only horizons the model was trained on are present.
    pub errors: Vec<HorizonError>,
    pub training_samples: usize,
    pub notes: Option<String>,
}

impl ModelPerformanceRecord {
    pub fn mae(&self, horizon: Horizon) -> Option<f64> {
        self.errors
            .iter()
            .find(|e| e.horizon == horizon)
            .map(|e| e.mae)
    }

    /// Mean MAE over the recorded horizons, `None` when nothing usable is recorded.
    pub fn mean_mae(&self) -> Option<f64> {
        let finite: Vec<f64> = self
            .errors
            .iter()
            .map(|e| e.mae)
            .filter(|m| m.is_finite())
            .collect();
        if finite.is_empty() {
            return None;
        }
        Some(finite.iter().sum::<f64>() / finite.len() as f64)
    }
}
