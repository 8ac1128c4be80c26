//! Historical gap filling from `coins/{id}/market_chart/range`.
//!
//! Segments are chosen from what the store already holds, so a re-run only
//! asks upstream for days outside the stored range. Backfilled rows never
//! overwrite existing days.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use coincast_core::data::ChartPoint;
use coincast_core::domain::DailyMetric;

/// Inclusive day range to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Ranges of `[today - days, today]` not covered by `stored`.
///
/// With nothing stored the whole range is requested. Otherwise a segment is
/// added before the earliest stored day and one after the latest; interior
/// holes are left alone.
pub fn plan_segments(stored: Option<(NaiveDate, NaiveDate)>, today: NaiveDate, days: u32) -> Vec<Segment> {
    let start = today - Duration::days(i64::from(days));
    let Some((earliest, latest)) = stored else {
        return vec![Segment { from: start, to: today }];
    };

    let mut segments = Vec::new();
    if earliest > start {
        segments.push(Segment {
            from: start,
            to: earliest - Duration::days(1),
        });
    }
    if latest < today {
        segments.push(Segment {
            from: (latest + Duration::days(1)).max(start),
            to: today,
        });
    }
    segments
}

/// One row per day from chart samples, with the day-over-day change in percent.
pub fn chart_to_metrics(asset_id: &str, points: Vec<ChartPoint>, created_at: NaiveDateTime) -> Vec<DailyMetric> {
    let mut prev: Option<f64> = None;
    ChartPoint::collapse_daily(points)
        .into_iter()
        .map(|p| {
            let change = prev.map(|before| (p.price / before - 1.0) * 100.0);
            prev = Some(p.price);
            DailyMetric {
                asset_id: asset_id.to_string(),
                observed_at: p.observed_at,
                price: p.price,
                market_cap: p.market_cap,
                volume_24h: p.volume,
                price_change_24h: change,
                rank_at_observation: None,
                is_trending: false,
                created_at,
            }
        })
        .collect()
}
