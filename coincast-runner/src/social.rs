//! How community size lines up with recent price moves.
//!
//! Per asset, market rows are joined with the sentiment row of the same day
//! over a trailing window and averaged. Days without a sentiment row are
//! left out. Correlations are taken across assets, pairing each asset's
//! average community figure with its average 24h price change.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use coincast_core::store::{MetricStore, MetricWithSentiment};

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocialImpactRow {
    pub asset_id: String,
    /// Days in the window that had both a market and a sentiment row.
    pub days: usize,
    pub avg_price_change: Option<f64>,
    pub avg_twitter_followers: Option<f64>,
    pub avg_reddit_subscribers: Option<f64>,
    pub avg_reddit_active_users: Option<f64>,
}

/// Pearson correlation of each community average with the average price change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SocialCorrelations {
    pub twitter_followers: Option<f64>,
    pub reddit_subscribers: Option<f64>,
    pub reddit_active_users: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocialImpactReport {
    pub from_day: NaiveDate,
    pub to_day: NaiveDate,
    /// Sorted by average price change, highest first; assets without one last.
    pub rows: Vec<SocialImpactRow>,
    pub correlations: SocialCorrelations,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Averages over the joined days of one asset, or `None` if no day had sentiment.
pub fn summarize(asset_id: &str, history: &[MetricWithSentiment]) -> Option<SocialImpactRow> {
    let joined: Vec<_> = history
        .iter()
        .filter_map(|h| h.sentiment.as_ref().map(|s| (&h.metric, s)))
        .collect();
    if joined.is_empty() {
        return None;
    }
    Some(SocialImpactRow {
        asset_id: asset_id.to_string(),
        days: joined.len(),
        avg_price_change: mean(joined.iter().filter_map(|(m, _)| m.price_change_24h)),
        avg_twitter_followers: mean(joined.iter().filter_map(|(_, s)| s.twitter_followers.map(|v| v as f64))),
        avg_reddit_subscribers: mean(joined.iter().filter_map(|(_, s)| s.reddit_subscribers.map(|v| v as f64))),
        avg_reddit_active_users: mean(
            joined
                .iter()
                .filter_map(|(_, s)| s.reddit_active_users_48h.map(|v| v as f64)),
        ),
    })
}

/// Pearson correlation over the complete pairs.
///
/// `None` with fewer than two pairs or when either side is constant.
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx) * (x - mx);
        syy += (y - my) * (y - my);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

fn correlate(rows: &[SocialImpactRow], column: impl Fn(&SocialImpactRow) -> Option<f64>) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = rows
        .iter()
        .filter_map(|r| Some((column(r)?, r.avg_price_change?)))
        .collect();
    pearson(&pairs)
}

/// Build the report from per-asset summaries.
pub fn rank(from_day: NaiveDate, to_day: NaiveDate, mut rows: Vec<SocialImpactRow>) -> SocialImpactReport {
    rows.sort_by(|a, b| match (a.avg_price_change, b.avg_price_change) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.asset_id.cmp(&b.asset_id),
    });
    let correlations = SocialCorrelations {
        twitter_followers: correlate(&rows, |r| r.avg_twitter_followers),
        reddit_subscribers: correlate(&rows, |r| r.avg_reddit_subscribers),
        reddit_active_users: correlate(&rows, |r| r.avg_reddit_active_users),
    };
    SocialImpactReport {
        from_day,
        to_day,
        rows,
        correlations,
    }
}

/// Social-impact report over the `days` days up to and including `today`.
pub fn social_impact(store: &MetricStore, today: NaiveDate, days: u32) -> Result<SocialImpactReport, PipelineError> {
    let from_day = today - Duration::days(i64::from(days));
    let mut rows = Vec::new();
    for asset_id in store.tracked_assets()? {
        let history = store.history_with_sentiment(&asset_id, Some(from_day), Some(today))?;
        if let Some(row) = summarize(&asset_id, &history) {
            rows.push(row);
        }
    }
    tracing::debug!(assets = rows.len(), %from_day, %today, "social impact summarised");
    Ok(rank(from_day, today, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use coincast_core::domain::{DailyMetric, SentimentMetric};

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn seed(store: &mut MetricStore, asset: &str, day: u32, change: f64, followers: Option<u64>) {
        store
            .upsert_daily_metric(&DailyMetric {
                asset_id: asset.into(),
                observed_at: at(day),
                price: 10.0,
                market_cap: None,
                volume_24h: None,
                price_change_24h: Some(change),
                rank_at_observation: None,
                is_trending: false,
                created_at: at(day),
            })
            .unwrap();
        if let Some(f) = followers {
            store
                .upsert_sentiment_metric(&SentimentMetric {
                    asset_id: asset.into(),
                    observed_at: at(day),
                    votes_up_pct: None,
                    votes_down_pct: None,
                    public_interest_score: None,
                    social_sentiment: None,
                    news_sentiment: None,
                    twitter_followers: Some(f),
                    reddit_subscribers: Some(500),
                    reddit_active_users_48h: Some(f / 10),
                    created_at: at(day),
                })
                .unwrap();
        }
    }

    #[test]
    fn averages_and_correlations_over_joined_days() {
        let mut store = MetricStore::open_in_memory().unwrap();
        // Inside the 30-day window only.
        seed(&mut store, "alpha", 1, -50.0, Some(1));
        seed(&mut store, "alpha", 20, 4.0, Some(3000));
        seed(&mut store, "alpha", 21, 6.0, Some(5000));
        // No sentiment on this day, so its change is not averaged.
        seed(&mut store, "alpha", 22, 100.0, None);
        seed(&mut store, "beta", 21, 2.0, Some(2000));
        seed(&mut store, "gamma", 21, -1.0, Some(500));
        seed(&mut store, "delta", 21, 9.0, None);

        let today = NaiveDate::from_ymd_opt(2024, 5, 25).unwrap();
        let report = social_impact(&store, today, 30).unwrap();
        assert_eq!(report.from_day, NaiveDate::from_ymd_opt(2024, 4, 25).unwrap());

        let order: Vec<_> = report.rows.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(order, ["beta", "gamma", "alpha"]);

        let alpha = &report.rows[2];
        assert_eq!(alpha.days, 3);
        assert!((alpha.avg_price_change.unwrap() + 40.0 / 3.0).abs() < 1e-9);

        let report = social_impact(&store, today, 10).unwrap();
        let order: Vec<_> = report.rows.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(order, ["alpha", "beta", "gamma"]);
        let alpha = &report.rows[0];
        assert_eq!(alpha.days, 2);
        assert_eq!(alpha.avg_price_change, Some(5.0));
        assert_eq!(alpha.avg_twitter_followers, Some(4000.0));
        assert_eq!(alpha.avg_reddit_active_users, Some(400.0));

        // Followers rise with price change across the three assets.
        let r = report.correlations.twitter_followers.unwrap();
        assert!(r > 0.9 && r <= 1.0, "{r}");
        // Reddit subscribers are constant, so no correlation is defined.
        assert_eq!(report.correlations.reddit_subscribers, None);
        assert!(report.correlations.reddit_active_users.unwrap() > 0.9);
    }

    #[test]
    fn pearson_needs_two_varying_pairs() {
        assert_eq!(pearson(&[(1.0, 2.0)]), None);
        assert_eq!(pearson(&[(1.0, 2.0), (1.0, 3.0)]), None);
        let r = pearson(&[(1.0, 3.0), (2.0, 2.0), (3.0, 1.0)]).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn assets_without_price_change_rank_last() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let row = |id: &str, change: Option<f64>| SocialImpactRow {
            asset_id: id.into(),
            days: 1,
            avg_price_change: change,
            avg_twitter_followers: None,
            avg_reddit_subscribers: None,
            avg_reddit_active_users: None,
        };
        let report = rank(day, day, vec![row("a", None), row("b", Some(-3.0)), row("c", Some(1.0))]);
        let order: Vec<_> = report.rows.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(order, ["c", "b", "a"]);
    }
}
