//! CSV and JSON renderings of the downstream read model.

use anyhow::{Context, Result};
use serde_json::json;

use coincast_core::domain::{DailyMetric, Prediction};
use coincast_core::store::AssetDetail;

/// Price history as CSV.
///
/// Columns: asset_id, observed_at, price, market_cap, volume_24h,
/// price_change_24h, rank_at_observation, is_trending
pub fn export_history_csv(rows: &[DailyMetric]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "asset_id",
        "observed_at",
        "price",
        "market_cap",
        "volume_24h",
        "price_change_24h",
        "rank_at_observation",
        "is_trending",
    ])?;

    for m in rows {
        wtr.write_record([
            m.asset_id.clone(),
            m.observed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{:.8}", m.price),
            opt(m.market_cap),
            opt(m.volume_24h),
            opt(m.price_change_24h),
            m.rank_at_observation.map(|r| r.to_string()).unwrap_or_default(),
            m.is_trending.to_string(),
        ])?;
    }

    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

/// Predictions as CSV, oldest first.
pub fn export_predictions_csv(rows: &[Prediction]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "asset_id",
        "prediction_made_at",
        "model_version",
        "price_24h",
        "price_48h",
        "price_3d",
        "price_7d",
        "confidence_score",
    ])?;

    for p in rows {
        wtr.write_record([
            p.asset_id.clone(),
            p.prediction_made_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            p.model_version.clone(),
            format!("{:.8}", p.price_24h),
            format!("{:.8}", p.price_48h),
            format!("{:.8}", p.price_3d),
            format!("{:.8}", p.price_7d),
            format!("{:.2}", p.confidence_score),
        ])?;
    }

    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

/// Asset detail as a JSON document.
pub fn asset_detail_json(detail: &AssetDetail) -> Result<String> {
    let doc = json!({
        "asset": detail.asset,
        "latest_metric": detail.latest_metric,
        "latest_sentiment": detail.latest_sentiment,
        "latest_prediction": detail.latest_prediction,
    });
    serde_json::to_string_pretty(&doc).context("failed to serialize asset detail")
}

fn opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v}")).unwrap_or_default()
}
