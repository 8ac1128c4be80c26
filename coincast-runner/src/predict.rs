//! Inference: latest model per asset → post-processed prediction row.

use chrono::NaiveDateTime;

use coincast_core::domain::Prediction;
use coincast_core::features::{build_feature_rows, inference_window};
use coincast_core::store::MetricStore;

use crate::error::PipelineError;
use crate::postprocess::PostProcessor;
use crate::registry::ModelRegistry;

#[derive(Debug, Default)]
pub struct PredictReport {
    pub predictions: Vec<Prediction>,
    /// Assets without a model or without enough recent rows.
    pub skipped: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
}

impl PredictReport {
    /// Something failed and no prediction was stored.
    pub fn all_failed(&self) -> bool {
        !self.failed.is_empty() && self.predictions.is_empty()
    }
}

/// Predict one asset with its latest model and store the result.
pub fn predict_asset(
    store: &mut MetricStore,
    registry: &ModelRegistry,
    post: &PostProcessor,
    asset_id: &str,
    now: NaiveDateTime,
) -> Result<Prediction, PipelineError> {
    let artifact = registry
        .latest(asset_id)?
        .ok_or_else(|| PipelineError::NoModel(asset_id.to_string()))?;
    let model = artifact.load_model()?;

    let history = store.history_with_sentiment(asset_id, None, None)?;
    if history.is_empty() {
        return Err(PipelineError::NoMarketData(asset_id.to_string()));
    }
    let rows = build_feature_rows(&history);
    let window = inference_window(asset_id, &rows, artifact.sequence_length, &artifact.scaler)?;
    let raw = model.predict(&window)?;

    let performance = store.model_performance(asset_id, &artifact.version)?;
    let mut prediction = post.build_prediction(
        asset_id,
        now,
        &artifact.version,
        window.anchor_price,
        &raw,
        artifact.output_kind,
        performance.as_ref(),
    )?;
    prediction.id = Some(store.insert_prediction(&prediction)?);
    Ok(prediction)
}

/// Predict every listed asset (or every tracked asset when the list is empty).
pub fn predict_assets(
    store: &mut MetricStore,
    registry: &ModelRegistry,
    post: &PostProcessor,
    asset_ids: &[String],
    now: NaiveDateTime,
) -> Result<PredictReport, PipelineError> {
    let asset_ids = if asset_ids.is_empty() {
        store.tracked_assets()?
    } else {
        asset_ids.to_vec()
    };

    let mut report = PredictReport::default();
    for asset_id in asset_ids {
        match predict_asset(store, registry, post, &asset_id, now) {
            Ok(p) => {
                tracing::info!(
                    asset = %asset_id,
                    price_24h = p.price_24h,
                    price_7d = p.price_7d,
                    confidence = p.confidence_score,
                    "prediction stored"
                );
                report.predictions.push(p);
            }
            Err(e @ (PipelineError::NoModel(_) | PipelineError::Data(_) | PipelineError::NoMarketData(_))) => {
                tracing::info!(asset = %asset_id, "skipped: {e}");
                report.skipped.push((asset_id, e.to_string()));
            }
            Err(e) => {
                tracing::warn!(asset = %asset_id, "prediction failed: {e}");
                report.failed.push((asset_id, e.to_string()));
            }
        }
    }
    Ok(report)
}
