//! Turning stored histories into model-ready sequences.
//!
//! - [`impute`]: gap filling for market features
//! - [`scaler`]: per-feature min-max scaling, persisted with the model
//! - [`window`]: sliding windows with multi-horizon targets

pub mod impute;
pub mod scaler;
pub mod window;

use thiserror::Error;

pub use impute::{fill_market_gaps, impute_series};
pub use scaler::MinMaxScaler;
pub use window::{
    align_daily, build_feature_rows, build_training_set, inference_window, normalize_horizons, FeatureRow,
    TrainingSet, Window, FEATURE_COUNT, FEATURE_NAMES,
};

/// Why an asset's history cannot be turned into windows.
#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("{asset_id}: {available} usable days, need at least {required}")]
    InsufficientHistory {
        asset_id: String,
        available: usize,
        required: usize,
    },

    #[error("feature width mismatch: expected {expected}, got {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    #[error("invalid horizons: {0}")]
    InvalidHorizons(String),
}
