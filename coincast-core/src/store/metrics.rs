use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use super::{opt_u64_from_sql, opt_u64_to_sql, MetricStore, PersistenceError, UpsertOutcome};
use crate::domain::{DailyMetric, SentimentMetric};

const DAILY_COLUMNS: &str = "asset_id, observed_at, price, market_cap, volume_24h, \
     price_change_24h, rank_at_observation, is_trending, created_at";

const SENTIMENT_COLUMNS: &str = "asset_id, observed_at, votes_up_pct, votes_down_pct, \
     public_interest_score, social_sentiment, news_sentiment, twitter_followers, \
     reddit_subscribers, reddit_active_users_48h, created_at";

/// Outcome of the "is an ingestion run needed" probe.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessReport {
    pub today: NaiveDate,
    pub expected_floor: usize,
    pub latest_price_day: Option<NaiveDate>,
    pub latest_sentiment_day: Option<NaiveDate>,
    pub todays_price_rows: usize,
    pub todays_sentiment_rows: usize,
    pub needs_price_update: bool,
    pub needs_sentiment_update: bool,
    /// The probe itself failed and both flags were forced on.
    pub failed_open: bool,
}

impl FreshnessReport {
    pub fn is_fresh(&self) -> bool {
        !self.needs_price_update && !self.needs_sentiment_update
    }

    fn fail_open(today: NaiveDate, expected_floor: usize) -> Self {
        Self {
            today,
            expected_floor,
            latest_price_day: None,
            latest_sentiment_day: None,
            todays_price_rows: 0,
            todays_sentiment_rows: 0,
            needs_price_update: true,
            needs_sentiment_update: true,
            failed_open: true,
        }
    }
}

/// One day of market data with the sentiment row of the same day, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricWithSentiment {
    pub metric: DailyMetric,
    pub sentiment: Option<SentimentMetric>,
}

fn daily_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<DailyMetric> {
    Ok(DailyMetric {
        asset_id: row.get(offset)?,
        observed_at: row.get(offset + 1)?,
        price: row.get(offset + 2)?,
        market_cap: row.get(offset + 3)?,
        volume_24h: row.get(offset + 4)?,
        price_change_24h: row.get(offset + 5)?,
        rank_at_observation: row.get(offset + 6)?,
        is_trending: row.get(offset + 7)?,
        created_at: row.get(offset + 8)?,
    })
}

fn sentiment_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<SentimentMetric> {
    Ok(SentimentMetric {
        asset_id: row.get(offset)?,
        observed_at: row.get(offset + 1)?,
        votes_up_pct: row.get(offset + 2)?,
        votes_down_pct: row.get(offset + 3)?,
        public_interest_score: row.get(offset + 4)?,
        social_sentiment: row.get(offset + 5)?,
        news_sentiment: row.get(offset + 6)?,
        twitter_followers: opt_u64_from_sql(row.get(offset + 7)?),
        reddit_subscribers: opt_u64_from_sql(row.get(offset + 8)?),
        reddit_active_users_48h: opt_u64_from_sql(row.get(offset + 9)?),
        created_at: row.get(offset + 10)?,
    })
}

fn validate_daily(m: &DailyMetric) -> Result<(), PersistenceError> {
    if m.asset_id.is_empty() {
        return Err(PersistenceError::Constraint("empty asset_id".into()));
    }
    if !m.price.is_finite() || m.price <= 0.0 {
        return Err(PersistenceError::Constraint(format!(
            "{}: price must be positive, got {}",
            m.asset_id, m.price
        )));
    }
    Ok(())
}

impl MetricStore {
    /// Insert or replace the row for `(asset_id, observation_day)`.
    ///
    /// The first write's `created_at` survives later updates.
    pub fn upsert_daily_metric(&mut self, m: &DailyMetric) -> Result<UpsertOutcome, PersistenceError> {
        validate_daily(m)?;
        let day = m.observation_day();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existed: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM daily_metric WHERE asset_id = ?1 AND observation_day = ?2)",
            params![m.asset_id, day],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO daily_metric (asset_id, observed_at, observation_day, price, market_cap,
                 volume_24h, price_change_24h, rank_at_observation, is_trending, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(asset_id, observation_day) DO UPDATE SET
                 observed_at = excluded.observed_at,
                 price = excluded.price,
                 market_cap = excluded.market_cap,
                 volume_24h = excluded.volume_24h,
                 price_change_24h = excluded.price_change_24h,
                 rank_at_observation = excluded.rank_at_observation,
                 is_trending = excluded.is_trending",
            params![
                m.asset_id,
                m.observed_at,
                day,
                m.price,
                m.market_cap,
                m.volume_24h,
                m.price_change_24h,
                m.rank_at_observation,
                m.is_trending,
                m.created_at,
            ],
        )?;
        tx.commit()?;
        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Insert only when no row exists for that day. Returns whether a row was written.
    pub fn insert_daily_metric_if_absent(&mut self, m: &DailyMetric) -> Result<bool, PersistenceError> {
        validate_daily(m)?;
        let changed = self.conn.execute(
            "INSERT INTO daily_metric (asset_id, observed_at, observation_day, price, market_cap,
                 volume_24h, price_change_24h, rank_at_observation, is_trending, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(asset_id, observation_day) DO NOTHING",
            params![
                m.asset_id,
                m.observed_at,
                m.observation_day(),
                m.price,
                m.market_cap,
                m.volume_24h,
                m.price_change_24h,
                m.rank_at_observation,
                m.is_trending,
                m.created_at,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn upsert_sentiment_metric(&mut self, s: &SentimentMetric) -> Result<UpsertOutcome, PersistenceError> {
        if s.asset_id.is_empty() {
            return Err(PersistenceError::Constraint("empty asset_id".into()));
        }
        let day = s.observation_day();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existed: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM sentiment_metric WHERE asset_id = ?1 AND observation_day = ?2)",
            params![s.asset_id, day],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO sentiment_metric (asset_id, observed_at, observation_day, votes_up_pct,
                 votes_down_pct, public_interest_score, social_sentiment, news_sentiment,
                 twitter_followers, reddit_subscribers, reddit_active_users_48h, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(asset_id, observation_day) DO UPDATE SET
                 observed_at = excluded.observed_at,
                 votes_up_pct = excluded.votes_up_pct,
                 votes_down_pct = excluded.votes_down_pct,
                 public_interest_score = excluded.public_interest_score,
                 social_sentiment = excluded.social_sentiment,
                 news_sentiment = excluded.news_sentiment,
                 twitter_followers = excluded.twitter_followers,
                 reddit_subscribers = excluded.reddit_subscribers,
                 reddit_active_users_48h = excluded.reddit_active_users_48h",
            params![
                s.asset_id,
                s.observed_at,
                day,
                s.votes_up_pct,
                s.votes_down_pct,
                s.public_interest_score,
                s.social_sentiment,
                s.news_sentiment,
                opt_u64_to_sql(s.twitter_followers),
                opt_u64_to_sql(s.reddit_subscribers),
                opt_u64_to_sql(s.reddit_active_users_48h),
                s.created_at,
            ],
        )?;
        tx.commit()?;
        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Most recent row per asset.
    pub fn latest_snapshot(&self) -> Result<BTreeMap<String, DailyMetric>, PersistenceError> {
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_metric d
             WHERE d.observed_at = (SELECT MAX(observed_at) FROM daily_metric WHERE asset_id = d.asset_id)"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| daily_from_row(row, 0))?;
        let mut out = BTreeMap::new();
        for row in rows {
            let m = row?;
            out.insert(m.asset_id.clone(), m);
        }
        Ok(out)
    }

    pub fn latest_daily_metric(&self, asset_id: &str) -> Result<Option<DailyMetric>, PersistenceError> {
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_metric WHERE asset_id = ?1
             ORDER BY observed_at DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, [asset_id], |row| daily_from_row(row, 0))
            .optional()?)
    }

    pub fn latest_sentiment_metric(&self, asset_id: &str) -> Result<Option<SentimentMetric>, PersistenceError> {
        let sql = format!(
            "SELECT {SENTIMENT_COLUMNS} FROM sentiment_metric WHERE asset_id = ?1
             ORDER BY observed_at DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, [asset_id], |row| sentiment_from_row(row, 0))
            .optional()?)
    }

    /// Decide whether price and sentiment data need refreshing for `today`.
    ///
    /// A table is stale when its latest day is not `today` or fewer than
    /// `expected_floor` rows were observed today. Read errors fail open.
    pub fn freshness_check(&self, today: NaiveDate, expected_floor: usize) -> FreshnessReport {
        match self.try_freshness(today, expected_floor) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("freshness check failed, assuming an update is needed: {e}");
                FreshnessReport::fail_open(today, expected_floor)
            }
        }
    }

    fn try_freshness(&self, today: NaiveDate, expected_floor: usize) -> Result<FreshnessReport, PersistenceError> {
        let probe = |table: &str| -> Result<(Option<NaiveDate>, usize), PersistenceError> {
            let latest: Option<NaiveDate> = self.conn.query_row(
                &format!("SELECT MAX(observation_day) FROM {table}"),
                [],
                |row| row.get(0),
            )?;
            let count: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE observation_day = ?1"),
                [today],
                |row| row.get(0),
            )?;
            Ok((latest, usize::try_from(count).unwrap_or(0)))
        };

        let (latest_price_day, todays_price_rows) = probe("daily_metric")?;
        let (latest_sentiment_day, todays_sentiment_rows) = probe("sentiment_metric")?;

        Ok(FreshnessReport {
            today,
            expected_floor,
            latest_price_day,
            latest_sentiment_day,
            todays_price_rows,
            todays_sentiment_rows,
            needs_price_update: latest_price_day != Some(today) || todays_price_rows < expected_floor,
            needs_sentiment_update: latest_sentiment_day != Some(today)
                || todays_sentiment_rows < expected_floor,
            failed_open: false,
        })
    }

    /// Rows of one asset ascending by `observed_at`, bounds inclusive.
    pub fn history(
        &self,
        asset_id: &str,
        from_day: Option<NaiveDate>,
        to_day: Option<NaiveDate>,
    ) -> Result<Vec<DailyMetric>, PersistenceError> {
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_metric
             WHERE asset_id = ?1
               AND (?2 IS NULL OR observation_day >= ?2)
               AND (?3 IS NULL OR observation_day <= ?3)
             ORDER BY observed_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![asset_id, from_day, to_day], |row| daily_from_row(row, 0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Like [`history`](Self::history), joined day-by-day with sentiment rows.
    pub fn history_with_sentiment(
        &self,
        asset_id: &str,
        from_day: Option<NaiveDate>,
        to_day: Option<NaiveDate>,
    ) -> Result<Vec<MetricWithSentiment>, PersistenceError> {
        let sql = "SELECT d.asset_id, d.observed_at, d.price, d.market_cap, d.volume_24h,
                    d.price_change_24h, d.rank_at_observation, d.is_trending, d.created_at,
                    s.asset_id, s.observed_at, s.votes_up_pct, s.votes_down_pct,
                    s.public_interest_score, s.social_sentiment, s.news_sentiment,
                    s.twitter_followers, s.reddit_subscribers, s.reddit_active_users_48h,
                    s.created_at
             FROM daily_metric d
             LEFT JOIN sentiment_metric s
               ON s.asset_id = d.asset_id AND s.observation_day = d.observation_day
             WHERE d.asset_id = ?1
               AND (?2 IS NULL OR d.observation_day >= ?2)
               AND (?3 IS NULL OR d.observation_day <= ?3)
             ORDER BY d.observed_at ASC";
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![asset_id, from_day, to_day], |row| {
            let metric = daily_from_row(row, 0)?;
            let joined: Option<String> = row.get(9)?;
            let sentiment = match joined {
                Some(_) => Some(sentiment_from_row(row, 9)?),
                None => None,
            };
            Ok(MetricWithSentiment { metric, sentiment })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Earliest and latest stored day for an asset.
    pub fn gap_range(&self, asset_id: &str) -> Result<Option<(NaiveDate, NaiveDate)>, PersistenceError> {
        let (earliest, latest): (Option<NaiveDate>, Option<NaiveDate>) = self.conn.query_row(
            "SELECT MIN(observation_day), MAX(observation_day) FROM daily_metric WHERE asset_id = ?1",
            [asset_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(earliest.zip(latest))
    }

    /// Assets with at least one market row, alphabetical.
    pub fn tracked_assets(&self) -> Result<Vec<String>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT asset_id FROM daily_metric ORDER BY asset_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
