//! CoinGecko v3 endpoint adapters.
//!
//! Each method issues one rate-limited call and validates the payload into
//! typed records. Page-level failures come back as the outer `Err`; a single
//! bad entry inside a good page comes back as an inner `Malformed` so the
//! caller can skip it and keep going.

use std::collections::{BTreeMap, HashSet};

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;

use super::fetcher::{RateLimitedFetcher, UpstreamError};
use crate::domain::{AssetRecord, DailyMetric, SentimentMetric};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

const MARKETS: &str = "coins/markets";
const TRENDING: &str = "search/trending";

/// One entry of `coins/markets`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketEntry {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub total_volume: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub price_change_percentage_24h: Option<f64>,
    pub image: Option<String>,
}

impl MarketEntry {
    pub fn to_asset(&self) -> AssetRecord {
        AssetRecord {
            asset_id: self.id.clone(),
            symbol: self.symbol.clone(),
            display_name: self.name.clone(),
            rank: self.market_cap_rank,
            image_ref: self.image.clone(),
        }
    }

    /// Daily observation for this entry. A missing or non-positive price is
    /// a malformed record.
    pub fn to_daily_metric(
        &self,
        observed_at: NaiveDateTime,
        is_trending: bool,
    ) -> Result<DailyMetric, UpstreamError> {
        let price = self
            .current_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| {
                UpstreamError::malformed(MARKETS, format!("{}: missing current_price", self.id))
            })?;
        Ok(DailyMetric {
            asset_id: self.id.clone(),
            observed_at,
            price,
            market_cap: self.market_cap,
            volume_24h: self.total_volume,
            price_change_24h: self.price_change_percentage_24h,
            rank_at_observation: self.market_cap_rank,
            is_trending,
            created_at: observed_at,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommunityData {
    pub twitter_followers: Option<u64>,
    pub reddit_subscribers: Option<u64>,
    #[serde(rename = "reddit_accounts_active_48h")]
    pub reddit_active_users_48h: Option<u64>,
}

/// The community/sentiment part of `coins/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinDetail {
    pub id: String,
    pub sentiment_votes_up_percentage: Option<f64>,
    pub sentiment_votes_down_percentage: Option<f64>,
    pub public_interest_score: Option<f64>,
    #[serde(default)]
    pub community_data: Option<CommunityData>,
}

impl CoinDetail {
    pub fn to_sentiment_metric(&self, observed_at: NaiveDateTime) -> SentimentMetric {
        let community = self.community_data.clone().unwrap_or_default();
        SentimentMetric {
            asset_id: self.id.clone(),
            observed_at,
            votes_up_pct: self.sentiment_votes_up_percentage,
            votes_down_pct: self.sentiment_votes_down_percentage,
            public_interest_score: self.public_interest_score,
            social_sentiment: None,
            news_sentiment: None,
            twitter_followers: community.twitter_followers,
            reddit_subscribers: community.reddit_subscribers,
            reddit_active_users_48h: community.reddit_active_users_48h,
            created_at: observed_at,
        }
    }
}

/// One sample of `coins/{id}/market_chart/range`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub observed_at: NaiveDateTime,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub volume: Option<f64>,
}

impl ChartPoint {
    /// Keep the last sample of each calendar day, ascending by day.
    ///
    /// Short ranges come back hourly; the store holds one row per day.
    pub fn collapse_daily(points: Vec<ChartPoint>) -> Vec<ChartPoint> {
        let mut by_day: BTreeMap<NaiveDate, ChartPoint> = BTreeMap::new();
        for p in points {
            let day = p.observed_at.date();
            match by_day.get(&day) {
                Some(existing) if existing.observed_at > p.observed_at => {}
                _ => {
                    by_day.insert(day, p);
                }
            }
        }
        by_day.into_values().collect()
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    prices: Vec<[f64; 2]>,
    #[serde(default)]
    market_caps: Vec<[f64; 2]>,
    #[serde(default)]
    total_volumes: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct TrendingResponse {
    coins: Vec<TrendingCoin>,
}

#[derive(Debug, Deserialize)]
struct TrendingCoin {
    item: TrendingItem,
}

#[derive(Debug, Deserialize)]
struct TrendingItem {
    id: String,
}

/// Typed access to the CoinGecko endpoints the pipeline consumes.
pub struct CoinGeckoClient {
    fetcher: RateLimitedFetcher,
}

impl CoinGeckoClient {
    pub fn new(fetcher: RateLimitedFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &RateLimitedFetcher {
        &self.fetcher
    }

    /// One page of assets ordered by market cap, USD quoted.
    pub fn markets_page(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Result<MarketEntry, UpstreamError>>, UpstreamError> {
        let body = self.fetcher.fetch(
            MARKETS,
            &[
                ("vs_currency", "usd".to_string()),
                ("order", "market_cap_desc".to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
                ("sparkline", "false".to_string()),
            ],
        )?;

        let entries = match body {
            Value::Array(entries) => entries,
            other => {
                return Err(UpstreamError::malformed(
                    MARKETS,
                    format!("expected an array, got {}", json_type(&other)),
                ))
            }
        };

        Ok(entries
            .into_iter()
            .map(|entry| {
                serde_json::from_value::<MarketEntry>(entry)
                    .map_err(|e| UpstreamError::malformed(MARKETS, e.to_string()))
            })
            .collect())
    }

    /// Ids currently listed as trending.
    pub fn trending_ids(&self) -> Result<HashSet<String>, UpstreamError> {
        let body = self.fetcher.fetch(TRENDING, &[])?;
        let parsed: TrendingResponse = serde_json::from_value(body)
            .map_err(|e| UpstreamError::malformed(TRENDING, e.to_string()))?;
        Ok(parsed.coins.into_iter().map(|c| c.item.id).collect())
    }

    /// Community and sentiment counters of one asset.
    pub fn coin_detail(&self, asset_id: &str) -> Result<CoinDetail, UpstreamError> {
        let endpoint = format!("coins/{asset_id}");
        let body = self.fetcher.fetch(
            &endpoint,
            &[
                ("localization", "false".to_string()),
                ("tickers", "false".to_string()),
                ("market_data", "false".to_string()),
                ("community_data", "true".to_string()),
                ("developer_data", "false".to_string()),
                ("sparkline", "false".to_string()),
            ],
        )?;
        serde_json::from_value(body).map_err(|e| UpstreamError::malformed(&endpoint, e.to_string()))
    }

    /// Price/market-cap/volume samples between two days (inclusive).
    pub fn market_chart_range(
        &self,
        asset_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ChartPoint>, UpstreamError> {
        let endpoint = format!("coins/{asset_id}/market_chart/range");
        let from_ts = local_timestamp(from, 0, 0, 0);
        let to_ts = local_timestamp(to, 23, 59, 59);
        let body = self.fetcher.fetch(
            &endpoint,
            &[
                ("vs_currency", "usd".to_string()),
                ("from", from_ts.to_string()),
                ("to", to_ts.to_string()),
            ],
        )?;
        let chart: ChartResponse = serde_json::from_value(body)
            .map_err(|e| UpstreamError::malformed(&endpoint, e.to_string()))?;
        parse_chart(&endpoint, chart)
    }
}

fn parse_chart(endpoint: &str, chart: ChartResponse) -> Result<Vec<ChartPoint>, UpstreamError> {
    let mut points = Vec::with_capacity(chart.prices.len());
    for (i, [ts_ms, price]) in chart.prices.iter().copied().enumerate() {
        if !price.is_finite() || price <= 0.0 {
            continue;
        }
        let observed_at = chrono::DateTime::from_timestamp_millis(ts_ms as i64)
            .map(|dt| dt.with_timezone(&Local).naive_local())
            .ok_or_else(|| UpstreamError::malformed(endpoint, format!("invalid timestamp {ts_ms}")))?;
        points.push(ChartPoint {
            observed_at,
            price,
            market_cap: chart.market_caps.get(i).map(|p| p[1]),
            volume: chart.total_volumes.get(i).map(|p| p[1]),
        });
    }
    Ok(points)
}

fn local_timestamp(day: NaiveDate, h: u32, m: u32, s: u32) -> i64 {
    let naive = day.and_hms_opt(h, m, s).unwrap_or_default();
    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| naive.and_utc().timestamp())
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fetcher::testing::fetcher;
    use crate::data::fetcher::UpstreamErrorKind;
    use crate::data::transport::HttpResponse;

    fn client(responses: Vec<Result<HttpResponse, String>>) -> CoinGeckoClient {
        let (f, _, _) = fetcher(responses);
        CoinGeckoClient::new(f)
    }

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[test]
    fn markets_page_skips_only_bad_entries() {
        let body = r#"[
            {"id":"bitcoin","symbol":"btc","name":"Bitcoin","current_price":64000.5,
             "market_cap":1.2e12,"total_volume":3.1e10,"market_cap_rank":1,
             "price_change_percentage_24h":-1.25,"image":"https://x/coins/images/1/large/bitcoin.png?1"},
            {"symbol":"eth","name":"Ethereum"},
            {"id":"tether","symbol":"usdt","name":"Tether","current_price":1.0,
             "market_cap":null,"total_volume":null,"market_cap_rank":3,
             "price_change_percentage_24h":null,"image":null}
        ]"#;
        let c = client(vec![Ok(HttpResponse::ok(body))]);
        let entries = c.markets_page(1, 100).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_ok());
        assert_eq!(entries[1].as_ref().unwrap_err().kind(), UpstreamErrorKind::Malformed);

        let btc = entries[0].as_ref().unwrap();
        let m = btc.to_daily_metric(ts(), true).unwrap();
        assert_eq!(m.price, 64000.5);
        assert_eq!(m.rank_at_observation, Some(1));
        assert!(m.is_trending);
        assert_eq!(btc.to_asset().rank, Some(1));

        let usdt = entries[2].as_ref().unwrap();
        assert_eq!(usdt.to_daily_metric(ts(), false).unwrap().market_cap, None);
    }

    #[test]
    fn entry_without_price_is_malformed() {
        let entry: MarketEntry = serde_json::from_str(
            r#"{"id":"x","symbol":"x","name":"X","current_price":null,"market_cap":null,
                "total_volume":null,"market_cap_rank":null,"price_change_percentage_24h":null,"image":null}"#,
        )
        .unwrap();
        let err = entry.to_daily_metric(ts(), false).unwrap_err();
        assert_eq!(err.kind(), UpstreamErrorKind::Malformed);
    }

    #[test]
    fn markets_page_rejects_non_array() {
        let c = client(vec![Ok(HttpResponse::ok(r#"{"error":"nope"}"#))]);
        let err = c.markets_page(1, 100).unwrap_err();
        assert_eq!(err.kind(), UpstreamErrorKind::Malformed);
    }

    #[test]
    fn trending_ids_parsed() {
        let body = r#"{"coins":[{"item":{"id":"pepe","name":"Pepe"}},{"item":{"id":"sui"}}]}"#;
        let c = client(vec![Ok(HttpResponse::ok(body))]);
        let ids = c.trending_ids().unwrap();
        assert!(ids.contains("pepe") && ids.contains("sui"));
    }

    #[test]
    fn coin_detail_to_sentiment() {
        let body = r#"{"id":"bitcoin","sentiment_votes_up_percentage":81.5,
            "sentiment_votes_down_percentage":18.5,"public_interest_score":0.0,
            "community_data":{"twitter_followers":6800000,"reddit_subscribers":null,
            "reddit_accounts_active_48h":4200}}"#;
        let c = client(vec![Ok(HttpResponse::ok(body))]);
        let s = c.coin_detail("bitcoin").unwrap().to_sentiment_metric(ts());
        assert_eq!(s.votes_up_pct, Some(81.5));
        assert_eq!(s.twitter_followers, Some(6_800_000));
        assert_eq!(s.reddit_subscribers, None);
        assert_eq!(s.reddit_active_users_48h, Some(4200));
        assert_eq!(s.observation_day(), ts().date());
    }

    #[test]
    fn chart_points_collapse_to_last_sample_per_day() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let at = |d: i64, h: u32| (day + chrono::Duration::days(d)).and_hms_opt(h, 0, 0).unwrap();
        let p = |d, h, price| ChartPoint {
            observed_at: at(d, h),
            price,
            market_cap: None,
            volume: None,
        };
        let collapsed = ChartPoint::collapse_daily(vec![p(0, 1, 1.0), p(0, 23, 2.0), p(1, 5, 3.0), p(0, 12, 9.0)]);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].price, 2.0);
        assert_eq!(collapsed[1].price, 3.0);
    }

    #[test]
    fn chart_skips_nonpositive_prices_and_aligns_caps() {
        let body = r#"{"prices":[[1704067200000,100.0],[1704153600000,0.0],[1704240000000,102.0]],
                       "market_caps":[[1704067200000,1000.0],[1704153600000,1.0],[1704240000000,1020.0]],
                       "total_volumes":[[1704067200000,5.0]]}"#;
        let c = client(vec![Ok(HttpResponse::ok(body))]);
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let pts = c.market_chart_range("bitcoin", from, from + chrono::Duration::days(3)).unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[1].market_cap, Some(1020.0));
        assert_eq!(pts[0].volume, Some(5.0));
        assert_eq!(pts[1].volume, None);
    }
}
