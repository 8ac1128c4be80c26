//! Forecast model contract.
//!
//! A trainer turns a [`TrainingSet`] into a fitted [`ForecastModel`]; the
//! model maps one scaled window to one raw output per horizon. What the
//! output means is fixed by the model family and travels with the artifact.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use coincast_core::domain::HorizonError;
use coincast_core::features::{DataError, TrainingSet, Window};

/// Meaning of a model's raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputKind {
    /// Fractional change from the window's last price.
    RelativeChange,
    /// Price level in USD.
    AbsolutePrice,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("input width mismatch: model expects {expected}, window has {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("need at least {required} training windows, got {available}")]
    NotEnoughSamples { available: usize, required: usize },

    #[error("training diverged after {epoch} epochs")]
    Diverged { epoch: usize },

    #[error("invalid model parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// A fitted model. Predictions are deterministic for a given window.
pub trait ForecastModel: Send + Sync {
    /// Family name, e.g. `RIDGE`. Part of the version string.
    fn family(&self) -> &str;

    fn output_kind(&self) -> OutputKind;

    /// Days ahead, ascending; `predict` returns one value per entry.
    fn horizons(&self) -> &[u32];

    fn predict(&self, window: &Window) -> Result<Vec<f64>, ModelError>;

    /// Fitted parameters, stored verbatim in the artifact.
    fn parameters(&self) -> serde_json::Value;
}

/// Result of one training run.
pub struct TrainedModel {
    pub model: Box<dyn ForecastModel>,
    /// Validation error in USD per recorded horizon.
    pub validation: Vec<HorizonError>,
    /// Mean squared error of the raw output on the validation split.
    pub validation_loss: f64,
    pub epochs: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
}

impl std::fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("family", &self.model.family())
            .field("validation_loss", &self.validation_loss)
            .field("epochs", &self.epochs)
            .field("train_samples", &self.train_samples)
            .field("validation_samples", &self.validation_samples)
            .finish()
    }
}

pub trait ForecastTrainer: Send + Sync {
    fn family(&self) -> &str;

    /// Fit on `set`, stopping once validation loss has not improved for
    /// `patience` epochs.
    fn train(&self, set: &TrainingSet, patience: usize) -> Result<TrainedModel, ModelError>;
}
