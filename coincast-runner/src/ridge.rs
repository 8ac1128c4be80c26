//! Baseline forecaster: multi-output linear ridge regression.
//!
//! Input is the flattened scaled window; output is the relative price change
//! per horizon. Fitted by full-batch gradient descent from zero weights on
//! the chronologically first part of the windows, with early stopping on
//! the held-out tail.

use serde::{Deserialize, Serialize};

use coincast_core::domain::{Horizon, HorizonError};
use coincast_core::features::{TrainingSet, Window};

use crate::config::ForecastConfig;
use crate::model::{ForecastModel, ForecastTrainer, ModelError, OutputKind, TrainedModel};

pub const FAMILY: &str = "RIDGE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeModel {
    pub horizons: Vec<u32>,
    pub input_dim: usize,
    /// One row of `input_dim` weights per horizon.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl RidgeModel {
    fn zeros(horizons: Vec<u32>, input_dim: usize) -> Self {
        let k = horizons.len();
        Self {
            horizons,
            input_dim,
            weights: vec![vec![0.0; input_dim]; k],
            bias: vec![0.0; k],
        }
    }

    pub fn from_parameters(value: serde_json::Value) -> Result<Self, ModelError> {
        let model: RidgeModel = serde_json::from_value(value)
            .map_err(|e| ModelError::InvalidParameters(e.to_string()))?;
        let k = model.horizons.len();
        if k == 0 || model.weights.len() != k || model.bias.len() != k {
            return Err(ModelError::InvalidParameters(format!(
                "{k} horizons, {} weight rows, {} biases",
                model.weights.len(),
                model.bias.len()
            )));
        }
        if model.weights.iter().any(|w| w.len() != model.input_dim) {
            return Err(ModelError::InvalidParameters("ragged weight rows".into()));
        }
        Ok(model)
    }

    fn forward(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>())
            .collect()
    }

    fn is_finite(&self) -> bool {
        self.bias.iter().chain(self.weights.iter().flatten()).all(|v| v.is_finite())
    }
}

impl ForecastModel for RidgeModel {
    fn family(&self) -> &str {
        FAMILY
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::RelativeChange
    }

    fn horizons(&self) -> &[u32] {
        &self.horizons
    }

    fn predict(&self, window: &Window) -> Result<Vec<f64>, ModelError> {
        let x = window.flatten();
        if x.len() != self.input_dim {
            return Err(ModelError::ShapeMismatch {
                expected: self.input_dim,
                actual: x.len(),
            });
        }
        Ok(self.forward(&x))
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct RidgeTrainer {
    pub max_epochs: usize,
    /// Scaled by the mean squared input norm, so the step stays stable
    /// regardless of window length.
    pub learning_rate: f64,
    pub l2: f64,
    pub validation_fraction: f64,
}

impl Default for RidgeTrainer {
    fn default() -> Self {
        Self {
            max_epochs: 500,
            learning_rate: 0.05,
            l2: 1e-3,
            validation_fraction: 0.2,
        }
    }
}

impl From<&ForecastConfig> for RidgeTrainer {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            max_epochs: config.max_epochs,
            learning_rate: config.learning_rate,
            l2: config.l2,
            validation_fraction: config.validation_fraction,
        }
    }
}

impl RidgeTrainer {
    /// Chronological split point: the last `validation_fraction` of windows
    /// (at least one) are held out, as long as one remains for training.
    fn split(&self, n: usize) -> usize {
        if n < 2 || self.validation_fraction <= 0.0 {
            return n;
        }
        let held_out = ((n as f64) * self.validation_fraction).round().max(1.0) as usize;
        n - held_out.min(n - 1)
    }
}

fn mse(model: &RidgeModel, xs: &[Vec<f64>], ys: &[Vec<f64>]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let k = model.horizons.len() as f64;
    let total: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| {
            model
                .forward(x)
                .iter()
                .zip(y)
                .map(|(p, t)| (p - t).powi(2))
                .sum::<f64>()
        })
        .sum();
    total / (xs.len() as f64 * k)
}

impl ForecastTrainer for RidgeTrainer {
    fn family(&self) -> &str {
        FAMILY
    }

    fn train(&self, set: &TrainingSet, patience: usize) -> Result<TrainedModel, ModelError> {
        let n = set.len();
        if n == 0 {
            return Err(ModelError::NotEnoughSamples {
                available: 0,
                required: 1,
            });
        }
        let xs: Vec<Vec<f64>> = set.windows.iter().map(Window::flatten).collect();
        let ys = set.relative_targets();
        let input_dim = xs[0].len();
        let k = set.horizons.len();

        let split = self.split(n);
        let (train_x, val_x) = xs.split_at(split);
        let (train_y, val_y) = ys.split_at(split);
        // Without a held-out tail, stop on training loss.
        let (stop_x, stop_y) = if val_x.is_empty() {
            (train_x, train_y)
        } else {
            (val_x, val_y)
        };

        let mean_sq_norm =
            train_x.iter().map(|x| x.iter().map(|v| v * v).sum::<f64>()).sum::<f64>() / split as f64;
        let step = self.learning_rate / (1.0 + mean_sq_norm);

        let mut model = RidgeModel::zeros(set.horizons.clone(), input_dim);
        let mut best = model.clone();
        let mut best_loss = mse(&model, stop_x, stop_y);
        let mut since_best = 0;
        let mut epochs = 0;

        for epoch in 1..=self.max_epochs {
            epochs = epoch;
            let mut grad_w = vec![vec![0.0; input_dim]; k];
            let mut grad_b = vec![0.0; k];
            for (x, y) in train_x.iter().zip(train_y) {
                let pred = model.forward(x);
                for h in 0..k {
                    let err = pred[h] - y[h];
                    grad_b[h] += err;
                    for (g, xi) in grad_w[h].iter_mut().zip(x) {
                        *g += err * xi;
                    }
                }
            }
            let scale = 2.0 / split as f64;
            for h in 0..k {
                model.bias[h] -= step * scale * grad_b[h];
                for (w, g) in model.weights[h].iter_mut().zip(&grad_w[h]) {
                    *w -= step * (scale * g + 2.0 * self.l2 * *w);
                }
            }
            if !model.is_finite() {
                return Err(ModelError::Diverged { epoch });
            }

            let loss = mse(&model, stop_x, stop_y);
            if loss < best_loss - 1e-12 {
                best_loss = loss;
                best = model.clone();
                since_best = 0;
            } else {
                since_best += 1;
                if since_best >= patience.max(1) {
                    tracing::debug!(epoch, best_loss, "early stopping");
                    break;
                }
            }
        }

        let validation = price_errors(&best, set, if val_x.is_empty() { 0 } else { split });

        Ok(TrainedModel {
            model: Box::new(best),
            validation,
            validation_loss: best_loss,
            epochs,
            train_samples: split,
            validation_samples: n - split,
        })
    }
}

/// MAE and RMSE in USD over windows `from..`, for the horizons that map to
/// a reported [`Horizon`].
fn price_errors(model: &RidgeModel, set: &TrainingSet, from: usize) -> Vec<HorizonError> {
    let count = (set.len() - from) as f64;
    let mut abs = vec![0.0; set.horizons.len()];
    let mut sq = vec![0.0; set.horizons.len()];
    for (w, targets) in set.windows[from..].iter().zip(&set.targets[from..]) {
        let pred = model.forward(&w.flatten());
        for (j, (delta, actual)) in pred.iter().zip(targets).enumerate() {
            let err = w.anchor_price * (1.0 + delta) - actual;
            abs[j] += err.abs();
            sq[j] += err * err;
        }
    }
    set.horizons
        .iter()
        .enumerate()
        .filter_map(|(j, days)| {
            Horizon::from_days(*days).map(|horizon| HorizonError {
                horizon,
                mae: abs[j] / count,
                rmse: (sq[j] / count).sqrt(),
            })
        })
        .collect()
}
