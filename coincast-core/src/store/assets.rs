use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};

use super::{AssetDetail, MetricStore, PersistenceError, UpsertOutcome};
use crate::domain::AssetRecord;

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<AssetRecord> {
    Ok(AssetRecord {
        asset_id: row.get(0)?,
        symbol: row.get(1)?,
        display_name: row.get(2)?,
        rank: row.get(3)?,
        image_ref: row.get(4)?,
    })
}

impl MetricStore {
    /// Create or refresh an asset's master record.
    pub fn upsert_asset(
        &mut self,
        asset: &AssetRecord,
        updated_at: NaiveDateTime,
    ) -> Result<UpsertOutcome, PersistenceError> {
        if asset.asset_id.is_empty() {
            return Err(PersistenceError::Constraint("empty asset_id".into()));
        }
        let (image_id, image_file) = match asset.image_parts() {
            Some((id, file)) => (Some(i64::try_from(id).unwrap_or(i64::MAX)), Some(file)),
            None => (None, None),
        };

        let existed = self.asset(&asset.asset_id)?.is_some();
        self.conn.execute(
            "INSERT INTO asset (asset_id, symbol, display_name, rank, image_ref, image_id, image_file, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(asset_id) DO UPDATE SET
                 symbol = excluded.symbol,
                 display_name = excluded.display_name,
                 rank = excluded.rank,
                 image_ref = excluded.image_ref,
                 image_id = excluded.image_id,
                 image_file = excluded.image_file,
                 updated_at = excluded.updated_at",
            params![
                asset.asset_id,
                asset.symbol,
                asset.display_name,
                asset.rank,
                asset.image_ref,
                image_id,
                image_file,
                updated_at,
            ],
        )?;
        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    pub fn asset(&self, asset_id: &str) -> Result<Option<AssetRecord>, PersistenceError> {
        Ok(self
            .conn
            .query_row(
                "SELECT asset_id, symbol, display_name, rank, image_ref FROM asset WHERE asset_id = ?1",
                [asset_id],
                asset_from_row,
            )
            .optional()?)
    }

    /// Ranked assets, best rank first. Unranked assets are excluded.
    pub fn assets_by_rank(&self, limit: usize) -> Result<Vec<AssetRecord>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT asset_id, symbol, display_name, rank, image_ref FROM asset
             WHERE rank IS NOT NULL ORDER BY rank ASC, asset_id ASC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], asset_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Asset record with its latest metric, sentiment and prediction.
    pub fn asset_detail(&self, asset_id: &str) -> Result<Option<AssetDetail>, PersistenceError> {
        let Some(asset) = self.asset(asset_id)? else {
            return Ok(None);
        };
        Ok(Some(AssetDetail {
            latest_metric: self.latest_daily_metric(asset_id)?,
            latest_sentiment: self.latest_sentiment_metric(asset_id)?,
            latest_prediction: self.latest_prediction(asset_id)?,
            asset,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn asset(id: &str, rank: Option<u32>) -> AssetRecord {
        AssetRecord {
            asset_id: id.into(),
            symbol: id[..3.min(id.len())].into(),
            display_name: id.to_uppercase(),
            rank,
            image_ref: Some(format!("https://assets.test/coins/images/{}/large/{id}.png?1", rank.unwrap_or(0))),
        }
    }

    #[test]
    fn upsert_asset_then_update_rank() {
        let mut store = MetricStore::open_in_memory().unwrap();
        assert_eq!(store.upsert_asset(&asset("bitcoin", Some(2)), now()).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_asset(&asset("bitcoin", Some(1)), now()).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.asset("bitcoin").unwrap().unwrap().rank, Some(1));

        let (image_id, image_file): (Option<i64>, Option<String>) = store
            .connection()
            .query_row(
                "SELECT image_id, image_file FROM asset WHERE asset_id = 'bitcoin'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(image_id, Some(1));
        assert_eq!(image_file.as_deref(), Some("bitcoin.png"));
    }

    #[test]
    fn assets_by_rank_orders_and_limits() {
        let mut store = MetricStore::open_in_memory().unwrap();
        for (id, rank) in [("c", Some(3)), ("a", Some(1)), ("u", None), ("b", Some(2))] {
            store.upsert_asset(&asset(id, rank), now()).unwrap();
        }
        let top: Vec<String> = store
            .assets_by_rank(2)
            .unwrap()
            .into_iter()
            .map(|a| a.asset_id)
            .collect();
        assert_eq!(top, vec!["a", "b"]);
        assert_eq!(store.assets_by_rank(10).unwrap().len(), 3);
    }

    #[test]
    fn asset_detail_unknown_is_none() {
        let store = MetricStore::open_in_memory().unwrap();
        assert!(store.asset_detail("nope").unwrap().is_none());
    }
}
