use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::AssetId;

/// One market observation of an asset.
///
/// At most one row per `(asset_id, observation_day)` exists in the store; a
/// later write for the same day replaces the fields of the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub asset_id: AssetId,
    /// Full-precision, timezone-naive local timestamp of the sample.
    pub observed_at: NaiveDateTime,
    /// USD price.
    pub price: f64,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    /// Percentage change over the previous 24h.
    pub price_change_24h: Option<f64>,
    pub rank_at_observation: Option<u32>,
    pub is_trending: bool,
    pub created_at: NaiveDateTime,
}

impl DailyMetric {
    /// Calendar day used for uniqueness and for joins with sentiment rows.
    pub fn observation_day(&self) -> NaiveDate {
        self.observed_at.date()
    }
}

/// Optional per-day community/sentiment snapshot of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentMetric {
    pub asset_id: AssetId,
    pub observed_at: NaiveDateTime,
    /// Share of up-votes, percent.
    pub votes_up_pct: Option<f64>,
    /// Share of down-votes, percent.
    pub votes_down_pct: Option<f64>,
    pub public_interest_score: Option<f64>,
    /// Scalar in [-1, 1] from an external text scorer over social content.
    pub social_sentiment: Option<f64>,
    /// Scalar in [-1, 1] from an external text scorer over news content.
    pub news_sentiment: Option<f64>,
    pub twitter_followers: Option<u64>,
    pub reddit_subscribers: Option<u64>,
    /// Reddit accounts active over the trailing 48 hours.
    #[serde(default)]
    pub reddit_active_users_48h: Option<u64>,
    pub created_at: NaiveDateTime,
}

impl SentimentMetric {
    pub fn observation_day(&self) -> NaiveDate {
        self.observed_at.date()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_day_truncates_time() {
        let observed_at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(23, 59, 58)
            .unwrap();
        let m = DailyMetric {
            asset_id: "bitcoin".into(),
            observed_at,
            price: 1.0,
            market_cap: None,
            volume_24h: None,
            price_change_24h: None,
            rank_at_observation: None,
            is_trending: false,
            created_at: observed_at,
        };
        assert_eq!(m.observation_day(), NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
    }
}
