//! Synthetic sample histories for demos and end-to-end checks.
//!
//! Produces a seeded random walk of daily rows ending on a given day. The
//! asset record is marked by its display name so sample data is easy to
//! tell apart from ingested data.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use coincast_core::domain::{AssetRecord, DailyMetric};
use coincast_core::store::{MetricStore, UpsertOutcome};

use crate::error::PipelineError;

pub fn sample_asset(asset_id: &str) -> AssetRecord {
    AssetRecord {
        asset_id: asset_id.to_string(),
        symbol: asset_id.chars().take(4).collect::<String>().to_ascii_lowercase(),
        display_name: format!("{asset_id} (synthetic)"),
        rank: None,
        image_ref: None,
    }
}

/// `days` consecutive daily rows ending on `last_day`, starting at 100 USD.
pub fn sample_history(asset_id: &str, days: u32, seed: u64, last_day: NaiveDate) -> Vec<DailyMetric> {
    let mut rng = StdRng::seed_from_u64(seed);
    let supply = rng.gen_range(1.0e6..1.0e8_f64);
    let mut price = 100.0_f64;
    let mut prev: Option<f64> = None;

    (0..days)
        .map(|i| {
            let day = last_day - Duration::days(i64::from(days - 1 - i));
            let daily_return: f64 = rng.gen_range(-0.05..0.05);
            price *= 1.0 + daily_return;
            let observed_at: NaiveDateTime = day.and_hms_opt(12, 0, 0).unwrap_or_default();
            let change = prev.map(|p| (price / p - 1.0) * 100.0);
            prev = Some(price);
            DailyMetric {
                asset_id: asset_id.to_string(),
                observed_at,
                price,
                market_cap: Some(price * supply),
                volume_24h: Some(price * supply * rng.gen_range(0.01..0.1)),
                price_change_24h: change,
                rank_at_observation: None,
                is_trending: false,
                created_at: observed_at,
            }
        })
        .collect()
}

/// Write a sample history (and its asset record) into the store.
/// Returns the number of newly inserted days.
pub fn seed_sample(
    store: &mut MetricStore,
    asset_id: &str,
    days: u32,
    seed: u64,
    last_day: NaiveDate,
    now: NaiveDateTime,
) -> Result<usize, PipelineError> {
    store.upsert_asset(&sample_asset(asset_id), now)?;
    let mut inserted = 0;
    for metric in sample_history(asset_id, days, seed, last_day) {
        if store.upsert_daily_metric(&metric)? == UpsertOutcome::Inserted {
            inserted += 1;
        }
    }
    tracing::info!(asset = %asset_id, days, inserted, "sample history written");
    Ok(inserted)
}
