//! Shared fixtures: a URL-routed scripted transport and a no-op sleeper.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use coincast_core::data::{
    CoinGeckoClient, HttpResponse, HttpTransport, RateLimitPolicy, RateLimitedFetcher, Sleeper,
};

/// Answers each GET from the first route whose pattern the URL ends with.
///
/// A route's last response repeats once the earlier ones are used up.
/// Unrouted URLs get a 404.
#[derive(Default)]
pub struct RoutedTransport {
    routes: Mutex<Vec<(String, VecDeque<HttpResponse>)>>,
    pub calls: Mutex<Vec<String>>,
}

impl RoutedTransport {
    pub fn route(self, suffix: &str, responses: Vec<HttpResponse>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((suffix.to_string(), responses.into()));
        self
    }

    pub fn calls_to(&self, suffix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.ends_with(suffix))
            .count()
    }
}

impl HttpTransport for RoutedTransport {
    fn get(&self, url: &str, _query: &[(String, String)]) -> Result<HttpResponse, String> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut routes = self.routes.lock().unwrap();
        let Some((_, queue)) = routes.iter_mut().find(|(suffix, _)| url.ends_with(suffix.as_str())) else {
            return Ok(HttpResponse::status(404));
        };
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(response.unwrap_or_else(|| HttpResponse::status(404)))
    }
}

#[derive(Default)]
pub struct NoSleep {
    pub sleeps: Mutex<Vec<Duration>>,
}

impl Sleeper for NoSleep {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            self.sleeps.lock().unwrap().push(duration);
        }
    }
}

pub fn client(transport: RoutedTransport) -> (CoinGeckoClient, Arc<RoutedTransport>, Arc<NoSleep>) {
    let transport = Arc::new(transport);
    let sleeper = Arc::new(NoSleep::default());
    let fetcher = RateLimitedFetcher::new(
        transport.clone(),
        sleeper.clone(),
        "https://api.test/v3",
        RateLimitPolicy::default(),
    );
    (CoinGeckoClient::new(fetcher), transport, sleeper)
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

pub fn at(d: u32, hour: u32) -> NaiveDateTime {
    day(d).and_hms_opt(hour, 0, 0).unwrap()
}

pub fn market_entry(id: &str, rank: u32, price: f64) -> String {
    format!(
        r#"{{"id":"{id}","symbol":"{id}","name":"{id}","current_price":{price},
            "market_cap":{cap},"total_volume":1000.0,"market_cap_rank":{rank},
            "price_change_percentage_24h":1.5,"image":null}}"#,
        cap = price * 1e6
    )
}

pub fn markets_body(entries: &[String]) -> HttpResponse {
    HttpResponse::ok(format!("[{}]", entries.join(",")))
}

pub fn detail_body(id: &str, up: f64) -> HttpResponse {
    HttpResponse::ok(format!(
        r#"{{"id":"{id}","sentiment_votes_up_percentage":{up},
            "sentiment_votes_down_percentage":{down},"public_interest_score":0.0,
            "community_data":{{"twitter_followers":1200,"reddit_subscribers":300}}}}"#,
        down = 100.0 - up
    ))
}
