//! Integration tests for freshness-gated ingestion runs against a scripted upstream.

mod common;

use chrono::Local;
use coincast_core::data::HttpResponse;
use coincast_core::domain::{DailyMetric, SentimentMetric};
use coincast_core::store::MetricStore;
use coincast_runner::{CancelToken, IngestionConfig, IngestionOrchestrator, RunPlan, Stage};

use common::*;

fn config() -> IngestionConfig {
    IngestionConfig {
        per_page: 2,
        pages: 1,
        top_n: 10,
        expected_floor: 2,
        backfill_days: 3,
    }
}

fn upstream() -> RoutedTransport {
    RoutedTransport::default()
        .route(
            "coins/markets",
            vec![markets_body(&[
                market_entry("bitcoin", 1, 64000.0),
                market_entry("ethereum", 2, 3100.0),
            ])],
        )
        .route(
            "search/trending",
            vec![HttpResponse::ok(r#"{"coins":[{"item":{"id":"ethereum"}}]}"#)],
        )
        .route("coins/bitcoin", vec![detail_body("bitcoin", 80.0)])
        .route("coins/ethereum", vec![detail_body("ethereum", 60.0)])
}

fn seed_today(store: &mut MetricStore, asset: &str) {
    let now = at(10, 8);
    store
        .upsert_daily_metric(&DailyMetric {
            asset_id: asset.into(),
            observed_at: now,
            price: 10.0,
            market_cap: None,
            volume_24h: None,
            price_change_24h: None,
            rank_at_observation: None,
            is_trending: false,
            created_at: now,
        })
        .unwrap();
    store
        .upsert_sentiment_metric(&SentimentMetric {
            asset_id: asset.into(),
            observed_at: now,
            votes_up_pct: Some(50.0),
            votes_down_pct: Some(50.0),
            public_interest_score: None,
            social_sentiment: None,
            news_sentiment: None,
            twitter_followers: None,
            reddit_subscribers: None,
            reddit_active_users_48h: None,
            created_at: now,
        })
        .unwrap();
}

#[test]
fn fresh_store_makes_no_upstream_calls() {
    let mut store = MetricStore::open_in_memory().unwrap();
    seed_today(&mut store, "bitcoin");
    seed_today(&mut store, "ethereum");
    let (client, transport, _) = client(upstream());
    let config = config();

    let report = IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new())
        .run(&RunPlan::standard(), at(10, 12));

    assert!(report.freshness.as_ref().unwrap().is_fresh());
    assert_eq!(report.upstream_calls, 0);
    assert!(transport.calls.lock().unwrap().is_empty());
    assert!(report.stages.iter().all(|s| !s.ran));
    assert!(!report.aborted());
}

#[test]
fn force_bypasses_the_freshness_gate() {
    let mut store = MetricStore::open_in_memory().unwrap();
    seed_today(&mut store, "bitcoin");
    seed_today(&mut store, "ethereum");
    let (client, _, _) = client(upstream());
    let config = config();
    let plan = RunPlan {
        force: true,
        ..RunPlan::standard()
    };

    let report = IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new())
        .run(&plan, at(10, 12));

    assert!(report.freshness.is_none());
    assert!(report.stages.iter().all(|s| s.ran));
    assert!(report.upstream_calls > 0);
}

#[test]
fn empty_store_runs_every_stage_in_order() {
    let mut store = MetricStore::open_in_memory().unwrap();
    let (client, transport, _) = client(upstream());
    let config = config();

    let report = IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new())
        .run(&RunPlan::standard(), at(10, 12));

    let stages: Vec<Stage> = report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(stages, vec![Stage::Master, Stage::Daily, Stage::Sentiment]);
    assert!(!report.aborted());
    for stage in &report.stages {
        assert!(stage.ran);
        assert_eq!(stage.updated, 2, "{:?}", stage.stage);
        assert_eq!(stage.errors, 0);
    }
    // markets twice, trending once, two coin details
    assert_eq!(report.upstream_calls, 5);
    assert_eq!(transport.calls_to("coins/markets"), 2);

    let ranked = store.assets_by_rank(10).unwrap();
    assert_eq!(ranked[0].asset_id, "bitcoin");
    assert_eq!(ranked[1].asset_id, "ethereum");

    let btc = store.latest_daily_metric("bitcoin").unwrap().unwrap();
    let eth = store.latest_daily_metric("ethereum").unwrap().unwrap();
    assert_eq!(btc.price, 64000.0);
    assert!(!btc.is_trending);
    assert!(eth.is_trending);
    assert_eq!(btc.observed_at, eth.observed_at);

    let sentiment = store.latest_sentiment_metric("ethereum").unwrap().unwrap();
    assert_eq!(sentiment.votes_up_pct, Some(60.0));

    let after = store.freshness_check(at(10, 12).date(), config.expected_floor);
    assert!(after.is_fresh());
}

#[test]
fn rerun_on_the_same_day_updates_instead_of_duplicating() {
    let mut store = MetricStore::open_in_memory().unwrap();
    let (client, _, _) = client(upstream());
    let config = config();
    let plan = RunPlan {
        force: true,
        ..RunPlan::standard()
    };

    IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new()).run(&plan, at(10, 9));
    IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new()).run(&plan, at(10, 15));

    let history = store.history("bitcoin", None, None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].observed_at, at(10, 15));
}

#[test]
fn trending_failure_is_not_fatal() {
    let transport = RoutedTransport::default()
        .route(
            "coins/markets",
            vec![markets_body(&[market_entry("bitcoin", 1, 64000.0)])],
        )
        .route("search/trending", vec![HttpResponse::status(404)]);
    let (client, _, _) = client(transport);
    let mut store = MetricStore::open_in_memory().unwrap();
    let config = config();
    let plan = RunPlan {
        daily: true,
        ..RunPlan::default()
    };

    let report = IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new())
        .run(&plan, at(10, 12));

    let daily = report.stage(Stage::Daily).unwrap();
    assert_eq!(daily.updated, 1);
    assert!(daily.aborted.is_none());
    assert!(!store.latest_daily_metric("bitcoin").unwrap().unwrap().is_trending);
}

#[test]
fn malformed_entries_are_counted_and_skipped() {
    let transport = RoutedTransport::default().route(
        "coins/markets",
        vec![markets_body(&[
            market_entry("bitcoin", 1, 64000.0),
            r#"{"id":"ghost","symbol":"g","name":"Ghost","current_price":null,"market_cap":null,
                "total_volume":null,"market_cap_rank":5,"price_change_percentage_24h":null,"image":null}"#
                .to_string(),
        ])],
    );
    let (client, _, _) = client(transport);
    let mut store = MetricStore::open_in_memory().unwrap();
    let config = config();
    let plan = RunPlan {
        daily: true,
        ..RunPlan::default()
    };

    let report = IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new())
        .run(&plan, at(10, 12));

    let daily = report.stage(Stage::Daily).unwrap();
    assert_eq!(daily.updated, 1);
    assert_eq!(daily.errors, 1);
    assert!(store.latest_daily_metric("ghost").unwrap().is_none());
}

#[test]
fn rate_limit_exhaustion_aborts_the_run() {
    let transport = RoutedTransport::default().route("coins/markets", vec![HttpResponse::status(429)]);
    let (client, transport, sleeper) = client(transport);
    let mut store = MetricStore::open_in_memory().unwrap();
    let config = config();

    let report = IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new())
        .run(&RunPlan::standard(), at(10, 12));

    assert!(report.aborted());
    let master = report.stage(Stage::Master).unwrap();
    assert!(master.aborted.as_deref().unwrap().contains("coins/markets"));
    for stage in [Stage::Daily, Stage::Sentiment] {
        let s = report.stage(stage).unwrap();
        assert!(!s.ran);
        assert!(s.note.is_some());
    }
    // first attempt plus five retries
    assert_eq!(transport.calls_to("coins/markets"), 6);
    assert_eq!(sleeper.sleeps.lock().unwrap().len(), 5);
    assert!(store.assets_by_rank(10).unwrap().is_empty());
}

#[test]
fn per_asset_sentiment_failure_does_not_stop_the_stage() {
    // No route for coins/bitcoin: it answers 404.
    let transport = RoutedTransport::default()
        .route(
            "coins/markets",
            vec![markets_body(&[
                market_entry("bitcoin", 1, 64000.0),
                market_entry("ethereum", 2, 3100.0),
            ])],
        )
        .route("coins/ethereum", vec![detail_body("ethereum", 60.0)]);
    let (client, _, _) = client(transport);
    let mut store = MetricStore::open_in_memory().unwrap();
    let config = config();
    let plan = RunPlan {
        master: true,
        sentiment: true,
        ..RunPlan::default()
    };

    let report = IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new())
        .run(&plan, at(10, 12));

    let sentiment = report.stage(Stage::Sentiment).unwrap();
    assert_eq!(sentiment.errors, 1);
    assert_eq!(sentiment.updated, 1);
    assert!(!report.aborted());
    assert!(store.latest_sentiment_metric("bitcoin").unwrap().is_none());
}

#[test]
fn cancelled_run_skips_remaining_stages() {
    let (client, _, _) = client(upstream());
    let mut store = MetricStore::open_in_memory().unwrap();
    let config = config();
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = IngestionOrchestrator::new(&client, &mut store, &config, cancel)
        .run(&RunPlan::standard(), at(10, 12));

    assert!(report.cancelled);
    assert_eq!(report.stage(Stage::Master).unwrap().updated, 0);
    assert_eq!(report.stage(Stage::Daily).unwrap().note.as_deref(), Some("cancelled"));
}

fn chart_body(days: &[(u32, f64)]) -> HttpResponse {
    let prices: Vec<String> = days
        .iter()
        .map(|(d, price)| {
            let ms = at(*d, 12)
                .and_local_timezone(Local)
                .earliest()
                .unwrap()
                .timestamp_millis();
            format!("[{ms},{price}]")
        })
        .collect();
    HttpResponse::ok(format!(
        r#"{{"prices":[{}],"market_caps":[],"total_volumes":[]}}"#,
        prices.join(",")
    ))
}

#[test]
fn backfill_fills_history_without_overwriting() {
    let transport = RoutedTransport::default()
        .route(
            "coins/markets",
            vec![markets_body(&[market_entry("bitcoin", 1, 64000.0)])],
        )
        .route(
            "coins/bitcoin/market_chart/range",
            vec![chart_body(&[(7, 100.0), (8, 110.0), (9, 99.0)])],
        );
    let (client, _, _) = client(transport);
    let mut store = MetricStore::open_in_memory().unwrap();
    let config = config();

    let master = RunPlan {
        master: true,
        force: true,
        ..RunPlan::default()
    };
    IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new()).run(&master, at(10, 12));

    let backfill = RunPlan {
        backfill_days: Some(3),
        ..RunPlan::default()
    };
    let report = IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new())
        .run(&backfill, at(10, 12));
    let stage = report.stage(Stage::Backfill).unwrap();
    assert!(stage.ran);
    assert_eq!(stage.updated, 3);

    let history = store.history("bitcoin", None, None).unwrap();
    let prices: Vec<f64> = history.iter().map(|m| m.price).collect();
    assert_eq!(prices, vec![100.0, 110.0, 99.0]);
    assert_eq!(history[0].price_change_24h, None);
    assert!((history[1].price_change_24h.unwrap() - 10.0).abs() < 1e-9);

    // A second pass only asks for days after the stored range and keeps stored rows.
    let again = IngestionOrchestrator::new(&client, &mut store, &config, CancelToken::new())
        .run(&backfill, at(10, 12));
    let stage = again.stage(Stage::Backfill).unwrap();
    assert_eq!(stage.updated, 0);
    assert_eq!(stage.skipped, 3);
    assert_eq!(store.history("bitcoin", None, None).unwrap().len(), 3);
}
