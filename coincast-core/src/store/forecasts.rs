use rusqlite::{params, OptionalExtension, Row};

use super::{MetricStore, PersistenceError};
use crate::domain::{Horizon, HorizonError, ModelPerformanceRecord, Prediction};

const PREDICTION_COLUMNS: &str = "id, asset_id, prediction_made_at, model_version, \
     price_24h, price_48h, price_3d, price_7d, confidence_score";

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<Prediction> {
    Ok(Prediction {
        id: row.get(0)?,
        asset_id: row.get(1)?,
        prediction_made_at: row.get(2)?,
        model_version: row.get(3)?,
        price_24h: row.get(4)?,
        price_48h: row.get(5)?,
        price_3d: row.get(6)?,
        price_7d: row.get(7)?,
        confidence_score: row.get(8)?,
    })
}

impl MetricStore {
    /// Append a prediction and return its row id. Predictions are never updated.
    pub fn insert_prediction(&mut self, p: &Prediction) -> Result<i64, PersistenceError> {
        let prices = [p.price_24h, p.price_48h, p.price_3d, p.price_7d];
        if prices.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(PersistenceError::Constraint(format!(
                "{}: predicted prices must be positive, got {prices:?}",
                p.asset_id
            )));
        }
        if !(0.0..=100.0).contains(&p.confidence_score) {
            return Err(PersistenceError::Constraint(format!(
                "{}: confidence {} outside [0, 100]",
                p.asset_id, p.confidence_score
            )));
        }
        self.conn.execute(
            "INSERT INTO prediction (asset_id, prediction_made_at, model_version,
                 price_24h, price_48h, price_3d, price_7d, confidence_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                p.asset_id,
                p.prediction_made_at,
                p.model_version,
                p.price_24h,
                p.price_48h,
                p.price_3d,
                p.price_7d,
                p.confidence_score,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn latest_prediction(&self, asset_id: &str) -> Result<Option<Prediction>, PersistenceError> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM prediction WHERE asset_id = ?1
             ORDER BY prediction_made_at DESC, id DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, [asset_id], prediction_from_row)
            .optional()?)
    }

    /// All predictions for an asset, oldest first.
    pub fn predictions(&self, asset_id: &str) -> Result<Vec<Prediction>, PersistenceError> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM prediction WHERE asset_id = ?1
             ORDER BY prediction_made_at ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([asset_id], prediction_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Record training metrics. Retraining the same version replaces the row.
    pub fn insert_model_performance(&mut self, r: &ModelPerformanceRecord) -> Result<(), PersistenceError> {
        let metric = |h: Horizon| r.errors.iter().find(|e| e.horizon == h);
        let mae = |h| metric(h).map(|e| e.mae);
        let rmse = |h| metric(h).map(|e| e.rmse);
        let samples = i64::try_from(r.training_samples).unwrap_or(i64::MAX);
        self.conn.execute(
            "INSERT INTO model_performance (asset_id, model_version, trained_at,
                 mae_24h, rmse_24h, mae_48h, rmse_48h, mae_3d, rmse_3d, mae_7d, rmse_7d,
                 training_samples, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(asset_id, model_version) DO UPDATE SET
                 trained_at = excluded.trained_at,
                 mae_24h = excluded.mae_24h, rmse_24h = excluded.rmse_24h,
                 mae_48h = excluded.mae_48h, rmse_48h = excluded.rmse_48h,
                 mae_3d = excluded.mae_3d, rmse_3d = excluded.rmse_3d,
                 mae_7d = excluded.mae_7d, rmse_7d = excluded.rmse_7d,
                 training_samples = excluded.training_samples,
                 notes = excluded.notes",
            params![
                r.asset_id,
                r.model_version,
                r.trained_at,
                mae(Horizon::H24),
                rmse(Horizon::H24),
                mae(Horizon::H48),
                rmse(Horizon::H48),
                mae(Horizon::D3),
                rmse(Horizon::D3),
                mae(Horizon::D7),
                rmse(Horizon::D7),
                samples,
                r.notes,
            ],
        )?;
        Ok(())
    }

    pub fn model_performance(
        &self,
        asset_id: &str,
        model_version: &str,
    ) -> Result<Option<ModelPerformanceRecord>, PersistenceError> {
        Ok(self
            .conn
            .query_row(
                "SELECT asset_id, model_version, trained_at,
                        mae_24h, rmse_24h, mae_48h, rmse_48h, mae_3d, rmse_3d, mae_7d, rmse_7d,
                        training_samples, notes
                 FROM model_performance WHERE asset_id = ?1 AND model_version = ?2",
                params![asset_id, model_version],
                |row| {
                    let mut errors = Vec::new();
                    for (i, horizon) in Horizon::ALL.into_iter().enumerate() {
                        let mae: Option<f64> = row.get(3 + 2 * i)?;
                        let rmse: Option<f64> = row.get(4 + 2 * i)?;
                        if let Some(mae) = mae {
                            errors.push(HorizonError {
                                horizon,
                                mae,
                                rmse: rmse.unwrap_or(f64::NAN),
                            });
                        }
                    }
                    let samples: i64 = row.get(11)?;
                    Ok(ModelPerformanceRecord {
                        asset_id: row.get(0)?,
                        model_version: row.get(1)?,
                        trained_at: row.get(2)?,
                        errors,
                        training_samples: usize::try_from(samples).unwrap_or(0),
                        notes: row.get(12)?,
                    })
                },
            )
            .optional()?)
    }
}
