//! Batch training across assets.
//!
//! Histories are read from the store one asset at a time, fitting runs in
//! parallel on the rayon pool, and artifacts plus performance rows are
//! written back sequentially.

use chrono::NaiveDateTime;
use rayon::prelude::*;

use coincast_core::domain::{ModelPerformanceRecord, ModelVersion};
use coincast_core::features::{build_feature_rows, build_training_set, FeatureRow};
use coincast_core::store::MetricStore;

use crate::config::ForecastConfig;
use crate::error::PipelineError;
use crate::model::ForecastTrainer;
use crate::registry::{ModelArtifact, ModelRegistry, SCHEMA_VERSION};

/// Summary of one successfully trained asset.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedAsset {
    pub asset_id: String,
    pub version: String,
    pub windows: usize,
    pub epochs: usize,
    pub validation_loss: f64,
}

#[derive(Debug, Default)]
pub struct TrainReport {
    pub trained: Vec<TrainedAsset>,
    /// Assets with too little history; not an error.
    pub skipped: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
}

impl TrainReport {
    /// Something failed and nothing was trained.
    pub fn all_failed(&self) -> bool {
        !self.failed.is_empty() && self.trained.is_empty()
    }
}

/// BLAKE3 over the days and dense values of a feature history.
pub fn history_hash(rows: &[FeatureRow]) -> String {
    let mut hasher = blake3::Hasher::new();
    for row in rows {
        hasher.update(row.day.to_string().as_bytes());
        for v in row.values() {
            hasher.update(&v.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

struct Fitted {
    artifact: ModelArtifact,
    performance: ModelPerformanceRecord,
    summary: TrainedAsset,
}

fn fit_one(
    asset_id: &str,
    rows: &[FeatureRow],
    config: &ForecastConfig,
    trainer: &dyn ForecastTrainer,
    now: NaiveDateTime,
) -> Result<Fitted, PipelineError> {
    let set = build_training_set(asset_id, rows, config.sequence_length, &config.horizons)?;
    let trained = trainer.train(&set, config.patience)?;
    let version = ModelVersion::new(trainer.family(), now.date()).to_string();

    let artifact = ModelArtifact {
        schema_version: SCHEMA_VERSION,
        asset_id: asset_id.to_string(),
        version: version.clone(),
        family: trained.model.family().to_string(),
        output_kind: trained.model.output_kind(),
        sequence_length: set.sequence_length,
        horizons: set.horizons.clone(),
        scaler: set.scaler.clone(),
        parameters: trained.model.parameters(),
        trained_at: now,
        training_samples: set.len(),
        validation_loss: trained.validation_loss,
        validation: trained.validation.clone(),
        history_hash: history_hash(rows),
    };
    let performance = ModelPerformanceRecord {
        asset_id: asset_id.to_string(),
        model_version: version.clone(),
        trained_at: now,
        errors: trained.validation,
        training_samples: set.len(),
        notes: Some(format!(
            "{} train / {} validation windows, {} epochs",
            trained.train_samples, trained.validation_samples, trained.epochs
        )),
    };
    Ok(Fitted {
        artifact,
        performance,
        summary: TrainedAsset {
            asset_id: asset_id.to_string(),
            version,
            windows: set.len(),
            epochs: trained.epochs,
            validation_loss: trained.validation_loss,
        },
    })
}

/// Train one model per asset and persist the results.
///
/// An empty `asset_ids` trains every asset that has market rows.
pub fn train_assets(
    store: &mut MetricStore,
    registry: &ModelRegistry,
    trainer: &dyn ForecastTrainer,
    config: &ForecastConfig,
    asset_ids: &[String],
    now: NaiveDateTime,
) -> Result<TrainReport, PipelineError> {
    let asset_ids = if asset_ids.is_empty() {
        store.tracked_assets()?
    } else {
        asset_ids.to_vec()
    };

    let mut report = TrainReport::default();
    let mut histories = Vec::with_capacity(asset_ids.len());
    for asset_id in asset_ids {
        match store.history_with_sentiment(&asset_id, None, None) {
            Ok(history) => histories.push((asset_id, build_feature_rows(&history))),
            Err(e) => {
                tracing::warn!(asset = %asset_id, "failed to load history: {e}");
                report.failed.push((asset_id, e.to_string()));
            }
        }
    }

    let fitted: Vec<(String, Result<Fitted, PipelineError>)> = histories
        .par_iter()
        .map(|(asset_id, rows)| (asset_id.clone(), fit_one(asset_id, rows, config, trainer, now)))
        .collect();

    for (asset_id, result) in fitted {
        match result {
            Ok(fitted) => {
                if let Err(e) = persist(store, registry, &fitted) {
                    tracing::warn!(asset = %asset_id, "failed to persist model: {e}");
                    report.failed.push((asset_id, e.to_string()));
                    continue;
                }
                tracing::info!(
                    asset = %asset_id,
                    version = %fitted.summary.version,
                    windows = fitted.summary.windows,
                    "model trained"
                );
                report.trained.push(fitted.summary);
            }
            Err(PipelineError::Data(e)) => {
                tracing::info!(asset = %asset_id, "skipped: {e}");
                report.skipped.push((asset_id, e.to_string()));
            }
            Err(e) => {
                tracing::warn!(asset = %asset_id, "training failed: {e}");
                report.failed.push((asset_id, e.to_string()));
            }
        }
    }

    Ok(report)
}

fn persist(store: &mut MetricStore, registry: &ModelRegistry, fitted: &Fitted) -> Result<(), PipelineError> {
    registry.save(&fitted.artifact)?;
    store.insert_model_performance(&fitted.performance)?;
    Ok(())
}
