//! Sliding windows over a per-asset daily feature history.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::impute::fill_market_gaps;
use super::scaler::MinMaxScaler;
use super::DataError;
use crate::store::MetricWithSentiment;

pub const FEATURE_COUNT: usize = 7;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "price",
    "market_cap",
    "volume_24h",
    "price_change_24h",
    "sentiment_up",
    "sentiment_down",
    "public_interest_score",
];

/// One day of features. Column 0 is always the price.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub day: NaiveDate,
    pub raw: [Option<f64>; FEATURE_COUNT],
}

impl FeatureRow {
    /// Leading columns that are imputed; the rest are sentiment.
    pub const MARKET_COLUMNS: usize = 4;

    pub fn from_history(entry: &MetricWithSentiment) -> Self {
        let m = &entry.metric;
        let s = entry.sentiment.as_ref();
        Self {
            day: m.observation_day(),
            raw: [
                Some(m.price),
                m.market_cap,
                m.volume_24h,
                m.price_change_24h,
                s.and_then(|s| s.votes_up_pct),
                s.and_then(|s| s.votes_down_pct),
                s.and_then(|s| s.public_interest_score),
            ],
        }
    }

    /// Dense values; anything still missing (sentiment) is 0.
    pub fn values(&self) -> Vec<f64> {
        self.raw
            .iter()
            .map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0))
            .collect()
    }

    pub fn price(&self) -> f64 {
        self.raw[0].unwrap_or(0.0)
    }
}

/// Imputed feature rows for a joined history, one per calendar day.
///
/// Days missing from the store become empty rows before imputation, so row
/// offsets are day offsets.
pub fn build_feature_rows(history: &[MetricWithSentiment]) -> Vec<FeatureRow> {
    let mut rows = align_daily(history.iter().map(FeatureRow::from_history));
    fill_market_gaps(&mut rows);
    rows
}

/// Put rows on a contiguous day grid from the first to the last day.
///
/// Missing days get all-`None` rows; a later row for the same day wins.
pub fn align_daily(rows: impl IntoIterator<Item = FeatureRow>) -> Vec<FeatureRow> {
    let mut by_day: BTreeMap<NaiveDate, FeatureRow> = rows.into_iter().map(|r| (r.day, r)).collect();
    let (Some(&first), Some(&last)) = (by_day.keys().next(), by_day.keys().next_back()) else {
        return Vec::new();
    };

    let mut aligned = Vec::with_capacity(by_day.len());
    for day in first.iter_days().take_while(|d| *d <= last) {
        aligned.push(by_day.remove(&day).unwrap_or(FeatureRow {
            day,
            raw: [None; FEATURE_COUNT],
        }));
    }
    aligned
}

/// A scaled `sequence_length x FEATURE_COUNT` input plus the unscaled price
/// on its last day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub rows: Vec<Vec<f64>>,
    pub anchor_price: f64,
    pub anchor_day: NaiveDate,
}

impl Window {
    pub fn flatten(&self) -> Vec<f64> {
        self.rows.iter().flatten().copied().collect()
    }
}

/// Windows and their multi-horizon price targets for one asset.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub asset_id: String,
    pub sequence_length: usize,
    /// Days ahead, ascending, no duplicates.
    pub horizons: Vec<u32>,
    pub scaler: MinMaxScaler,
    pub windows: Vec<Window>,
    /// Absolute prices, one vector of `horizons.len()` per window.
    pub targets: Vec<Vec<f64>>,
    pub history_days: usize,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Targets as change relative to each window's anchor price.
    pub fn relative_targets(&self) -> Vec<Vec<f64>> {
        self.windows
            .iter()
            .zip(&self.targets)
            .map(|(w, t)| t.iter().map(|p| p / w.anchor_price - 1.0).collect())
            .collect()
    }
}

/// Sort and dedupe horizons; zero or none is invalid.
pub fn normalize_horizons(horizons: &[u32]) -> Result<Vec<u32>, DataError> {
    let mut h = horizons.to_vec();
    h.sort_unstable();
    h.dedup();
    match h.first() {
        None => Err(DataError::InvalidHorizons("no horizons given".into())),
        Some(0) => Err(DataError::InvalidHorizons("horizon of 0 days".into())),
        Some(_) => Ok(h),
    }
}

/// Slide a window of `sequence_length` days over `rows`.
///
/// Produces `N - L - max(H)` windows. Window `i` covers `rows[i..i+L]` and
/// targets the price on day `i + L + h - 1` for each horizon `h`.
pub fn build_training_set(
    asset_id: &str,
    rows: &[FeatureRow],
    sequence_length: usize,
    horizons: &[u32],
) -> Result<TrainingSet, DataError> {
    let horizons = normalize_horizons(horizons)?;
    let max_h = horizons.last().copied().unwrap_or(1) as usize;
    let n = rows.len();
    let required = sequence_length + max_h + 1;
    if sequence_length == 0 || n < required {
        return Err(DataError::InsufficientHistory {
            asset_id: asset_id.to_string(),
            available: n,
            required,
        });
    }

    let dense: Vec<Vec<f64>> = rows.iter().map(FeatureRow::values).collect();
    let scaler = MinMaxScaler::fit(&dense, FEATURE_COUNT)?;
    let scaled = dense
        .iter()
        .map(|r| scaler.transform_row(r))
        .collect::<Result<Vec<_>, _>>()?;

    let count = n - sequence_length - max_h;
    let mut windows = Vec::with_capacity(count);
    let mut targets = Vec::with_capacity(count);
    for i in 0..count {
        let last = i + sequence_length - 1;
        windows.push(Window {
            rows: scaled[i..i + sequence_length].to_vec(),
            anchor_price: rows[last].price(),
            anchor_day: rows[last].day,
        });
        targets.push(
            horizons
                .iter()
                .map(|&h| rows[i + sequence_length + h as usize - 1].price())
                .collect(),
        );
    }

    Ok(TrainingSet {
        asset_id: asset_id.to_string(),
        sequence_length,
        horizons,
        scaler,
        windows,
        targets,
        history_days: n,
    })
}

/// The last `sequence_length` rows, scaled with a previously fitted scaler.
pub fn inference_window(
    asset_id: &str,
    rows: &[FeatureRow],
    sequence_length: usize,
    scaler: &MinMaxScaler,
) -> Result<Window, DataError> {
    if sequence_length == 0 || rows.len() < sequence_length {
        return Err(DataError::InsufficientHistory {
            asset_id: asset_id.to_string(),
            available: rows.len(),
            required: sequence_length.max(1),
        });
    }
    let tail = &rows[rows.len() - sequence_length..];
    let scaled = tail
        .iter()
        .map(|r| scaler.transform_row(&r.values()))
        .collect::<Result<Vec<_>, _>>()?;
    let last = &tail[sequence_length - 1];
    Ok(Window {
        rows: scaled,
        anchor_price: last.price(),
        anchor_day: last.day,
    })
}
