//! Domain records: assets, daily observations, forecasts and model metrics.

pub mod asset;
pub mod horizon;
pub mod ids;
pub mod metric;
pub mod prediction;

pub use asset::AssetRecord;
pub use horizon::Horizon;
pub use ids::{ModelVersion, ModelVersionError};
pub use metric::{DailyMetric, SentimentMetric};
pub use prediction::{HorizonError, ModelPerformanceRecord, Prediction};

/// Stable upstream asset identifier (e.g. `bitcoin`).
pub type AssetId = String;
