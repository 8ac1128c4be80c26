//! Accuracy of stored predictions against prices observed afterwards.
//!
//! A prediction made on day D is scored at horizon h against the market row
//! of day D + h days. Horizons whose target day has no row yet are left out.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use coincast_core::domain::{DailyMetric, Horizon, Prediction};
use coincast_core::store::MetricStore;

use crate::error::PipelineError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HorizonAccuracy {
    pub horizon: String,
    pub evaluated: usize,
    pub mae: f64,
    /// Mean absolute percentage error, percent.
    pub mape: f64,
    /// Share of evaluations where the predicted direction matched, percent.
    pub direction_hit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestSummary {
    pub asset_id: String,
    pub predictions: usize,
    pub horizons: Vec<HorizonAccuracy>,
}

#[derive(Default)]
struct Acc {
    n: usize,
    abs: f64,
    pct: f64,
    hits: usize,
}

/// Score `predictions` against `history` (one row per day).
pub fn evaluate(asset_id: &str, predictions: &[Prediction], history: &[DailyMetric]) -> BacktestSummary {
    let by_day: BTreeMap<NaiveDate, f64> = history
        .iter()
        .map(|m| (m.observation_day(), m.price))
        .collect();

    let mut acc: BTreeMap<Horizon, Acc> = BTreeMap::new();
    for p in predictions {
        let made_on = p.prediction_made_at.date();
        // Price known when the prediction was made: same day or the last before it.
        let Some((_, &base)) = by_day.range(..=made_on).next_back() else {
            continue;
        };
        for h in Horizon::ALL {
            let target_day = made_on + chrono::Duration::days(i64::from(h.days()));
            let Some(&actual) = by_day.get(&target_day) else {
                continue;
            };
            let predicted = p.price_at(h);
            let a = acc.entry(h).or_default();
            a.n += 1;
            a.abs += (predicted - actual).abs();
            a.pct += ((predicted - actual) / actual).abs() * 100.0;
            if (predicted - base).signum() == (actual - base).signum() {
                a.hits += 1;
            }
        }
    }

    BacktestSummary {
        asset_id: asset_id.to_string(),
        predictions: predictions.len(),
        horizons: acc
            .into_iter()
            .map(|(h, a)| {
                let n = a.n as f64;
                HorizonAccuracy {
                    horizon: h.label().to_string(),
                    evaluated: a.n,
                    mae: a.abs / n,
                    mape: a.pct / n,
                    direction_hit_rate: a.hits as f64 / n * 100.0,
                }
            })
            .collect(),
    }
}

/// Load an asset's predictions and history and score them.
pub fn backtest_asset(store: &MetricStore, asset_id: &str) -> Result<BacktestSummary, PipelineError> {
    let predictions = store.predictions(asset_id)?;
    let history = store.history(asset_id, None, None)?;
    Ok(evaluate(asset_id, &predictions, &history))
}
