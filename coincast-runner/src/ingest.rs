//! Ingestion run: freshness gate, then master → daily → sentiment (→ backfill).
//!
//! Per-asset failures are counted and the loop moves on. An upstream error
//! that survived all of the fetcher's retries aborts the current stage and
//! every stage after it; the run report then says the run aborted.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;

use coincast_core::data::{CoinGeckoClient, UpstreamError};
use coincast_core::store::{FreshnessReport, MetricStore, PersistenceError};

use crate::backfill::{chart_to_metrics, plan_segments};
use crate::config::IngestionConfig;

/// Shared stop flag, checked between assets.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Master,
    Daily,
    Sentiment,
    Backfill,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Master => "master",
            Stage::Daily => "daily",
            Stage::Sentiment => "sentiment",
            Stage::Backfill => "backfill",
        };
        f.write_str(name)
    }
}

/// Which stages a run should attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPlan {
    pub master: bool,
    pub daily: bool,
    pub sentiment: bool,
    /// Days of history to backfill, if any.
    pub backfill_days: Option<u32>,
    /// Skip the freshness gate.
    pub force: bool,
}

impl RunPlan {
    /// Master, daily and sentiment; no backfill.
    pub fn standard() -> Self {
        Self {
            master: true,
            daily: true,
            sentiment: true,
            backfill_days: None,
            force: false,
        }
    }

    /// Plan from command-line stage flags.
    ///
    /// No stage flag means [`standard`](Self::standard). `backfill` is
    /// `Some(None)` when backfill was asked for without a day count, which
    /// falls back to `default_backfill_days`.
    pub fn from_flags(
        master: bool,
        daily: bool,
        sentiment: bool,
        backfill: Option<Option<u32>>,
        force: bool,
        default_backfill_days: u32,
    ) -> Self {
        if !master && !daily && !sentiment && backfill.is_none() {
            return Self {
                force,
                ..Self::standard()
            };
        }
        Self {
            master,
            daily,
            sentiment,
            backfill_days: backfill.map(|days| days.unwrap_or(default_backfill_days)),
            force,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub ran: bool,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Set when upstream retries were exhausted.
    pub aborted: Option<String>,
    /// Why the stage did not run.
    pub note: Option<String>,
}

impl StageReport {
    fn started(stage: Stage) -> Self {
        Self {
            stage,
            ran: true,
            updated: 0,
            skipped: 0,
            errors: 0,
            aborted: None,
            note: None,
        }
    }

    fn not_run(stage: Stage, note: &str) -> Self {
        Self {
            ran: false,
            note: Some(note.to_string()),
            ..Self::started(stage)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// `None` when the gate was bypassed.
    pub freshness: Option<FreshnessReport>,
    pub stages: Vec<StageReport>,
    pub cancelled: bool,
    pub upstream_calls: u64,
}

impl RunReport {
    pub fn aborted(&self) -> bool {
        self.stages.iter().any(|s| s.aborted.is_some())
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Sequences fetch → convert → upsert across the asset universe.
pub struct IngestionOrchestrator<'a> {
    client: &'a CoinGeckoClient,
    store: &'a mut MetricStore,
    config: &'a IngestionConfig,
    cancel: CancelToken,
}

/// Run a store write, retrying once if the database was busy.
fn write_with_retry<T>(
    store: &mut MetricStore,
    mut op: impl FnMut(&mut MetricStore) -> Result<T, PersistenceError>,
) -> Result<T, PersistenceError> {
    match op(store) {
        Err(e) if e.is_retryable() => {
            tracing::warn!("store write failed, retrying once: {e}");
            op(store)
        }
        other => other,
    }
}

impl<'a> IngestionOrchestrator<'a> {
    pub fn new(
        client: &'a CoinGeckoClient,
        store: &'a mut MetricStore,
        config: &'a IngestionConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            store,
            config,
            cancel,
        }
    }

    pub fn run(&mut self, plan: &RunPlan, now: NaiveDateTime) -> RunReport {
        let calls_before = self.client.fetcher().call_count();

        let freshness = if plan.force {
            None
        } else {
            Some(self.store.freshness_check(now.date(), self.config.expected_floor))
        };
        let (price_needed, sentiment_needed) = match &freshness {
            Some(f) => (f.needs_price_update, f.needs_sentiment_update),
            None => (true, true),
        };
        if let Some(f) = &freshness {
            tracing::info!(
                latest_price_day = ?f.latest_price_day,
                todays_price_rows = f.todays_price_rows,
                latest_sentiment_day = ?f.latest_sentiment_day,
                todays_sentiment_rows = f.todays_sentiment_rows,
                needs_price_update = f.needs_price_update,
                needs_sentiment_update = f.needs_sentiment_update,
                "freshness check"
            );
        }

        let requested = [
            (Stage::Master, plan.master, price_needed || sentiment_needed),
            (Stage::Daily, plan.daily, price_needed),
            (Stage::Sentiment, plan.sentiment, sentiment_needed),
            (Stage::Backfill, plan.backfill_days.is_some(), true),
        ];

        let mut report = RunReport {
            freshness,
            stages: Vec::new(),
            cancelled: false,
            upstream_calls: 0,
        };

        for (stage, wanted, needed) in requested {
            if !wanted {
                continue;
            }
            if report.aborted() {
                report.stages.push(StageReport::not_run(stage, "skipped after an aborted stage"));
                continue;
            }
            if report.cancelled {
                report.stages.push(StageReport::not_run(stage, "cancelled"));
                continue;
            }
            if !needed {
                tracing::info!(%stage, "data is fresh, skipping");
                report.stages.push(StageReport::not_run(stage, "up to date"));
                continue;
            }

            tracing::info!(%stage, "stage started");
            let stage_report = match stage {
                Stage::Master => self.fetch_master(now),
                Stage::Daily => self.fetch_daily(now),
                Stage::Sentiment => self.fetch_sentiment(now),
                Stage::Backfill => self.backfill(plan.backfill_days.unwrap_or(0), now),
            };
            match &stage_report.aborted {
                Some(reason) => tracing::error!(%stage, "stage aborted: {reason}"),
                None => tracing::info!(
                    %stage,
                    updated = stage_report.updated,
                    skipped = stage_report.skipped,
                    errors = stage_report.errors,
                    "stage finished"
                ),
            }
            report.cancelled = self.cancel.is_cancelled();
            report.stages.push(stage_report);
        }

        report.upstream_calls = self.client.fetcher().call_count() - calls_before;
        report
    }

    /// Count a failed upstream call; abort the stage if retries were exhausted.
    fn upstream_failure(report: &mut StageReport, what: &str, e: UpstreamError) -> bool {
        if e.is_retry_exhaustion() {
            report.aborted = Some(format!("{what}: {e}"));
            return true;
        }
        tracing::warn!(stage = %report.stage, "{what}: {e}");
        report.errors += 1;
        false
    }

    fn fetch_master(&mut self, now: NaiveDateTime) -> StageReport {
        let mut report = StageReport::started(Stage::Master);
        for page in 1..=self.config.pages {
            let entries = match self.client.markets_page(page, self.config.per_page) {
                Ok(entries) => entries,
                Err(e) => {
                    if Self::upstream_failure(&mut report, &format!("markets page {page}"), e) {
                        return report;
                    }
                    continue;
                }
            };
            for entry in entries {
                if self.cancel.is_cancelled() {
                    return report;
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("skipping malformed market entry: {e}");
                        report.errors += 1;
                        continue;
                    }
                };
                let asset = entry.to_asset();
                match write_with_retry(self.store, |s| s.upsert_asset(&asset, now)) {
                    Ok(_) => report.updated += 1,
                    Err(e) => {
                        tracing::warn!(asset = %asset.asset_id, "failed to store asset: {e}");
                        report.errors += 1;
                    }
                }
            }
        }
        report
    }

    fn fetch_daily(&mut self, now: NaiveDateTime) -> StageReport {
        let mut report = StageReport::started(Stage::Daily);

        let trending: HashSet<String> = match self.client.trending_ids() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("trending lookup failed, marking nothing as trending: {e}");
                HashSet::new()
            }
        };

        for page in 1..=self.config.pages {
            let entries = match self.client.markets_page(page, self.config.per_page) {
                Ok(entries) => entries,
                Err(e) => {
                    if Self::upstream_failure(&mut report, &format!("markets page {page}"), e) {
                        return report;
                    }
                    continue;
                }
            };
            for entry in entries {
                if self.cancel.is_cancelled() {
                    return report;
                }
                let metric = match entry.and_then(|e| {
                    let trending = trending.contains(&e.id);
                    e.to_daily_metric(now, trending)
                }) {
                    Ok(metric) => metric,
                    Err(e) => {
                        tracing::warn!("skipping malformed market entry: {e}");
                        report.errors += 1;
                        continue;
                    }
                };
                match write_with_retry(self.store, |s| s.upsert_daily_metric(&metric)) {
                    Ok(_) => report.updated += 1,
                    Err(e) => {
                        tracing::warn!(asset = %metric.asset_id, "failed to store daily metric: {e}");
                        report.errors += 1;
                    }
                }
            }
        }
        report
    }

    fn fetch_sentiment(&mut self, now: NaiveDateTime) -> StageReport {
        let mut report = StageReport::started(Stage::Sentiment);
        let universe = match self.store.assets_by_rank(self.config.top_n) {
            Ok(assets) => assets,
            Err(e) => {
                tracing::warn!("failed to load asset universe: {e}");
                report.errors += 1;
                return report;
            }
        };
        if universe.is_empty() {
            tracing::warn!("no ranked assets in the store; run the master stage first");
        }

        for asset in universe {
            if self.cancel.is_cancelled() {
                return report;
            }
            let detail = match self.client.coin_detail(&asset.asset_id) {
                Ok(detail) => detail,
                Err(e) => {
                    if Self::upstream_failure(&mut report, &asset.asset_id, e) {
                        return report;
                    }
                    continue;
                }
            };
            let metric = detail.to_sentiment_metric(now);
            match write_with_retry(self.store, |s| s.upsert_sentiment_metric(&metric)) {
                Ok(_) => report.updated += 1,
                Err(e) => {
                    tracing::warn!(asset = %asset.asset_id, "failed to store sentiment: {e}");
                    report.errors += 1;
                }
            }
        }
        report
    }

    fn backfill(&mut self, days: u32, now: NaiveDateTime) -> StageReport {
        let mut report = StageReport::started(Stage::Backfill);
        let today = now.date();
        let universe = match self.store.assets_by_rank(self.config.top_n) {
            Ok(assets) => assets,
            Err(e) => {
                tracing::warn!("failed to load asset universe: {e}");
                report.errors += 1;
                return report;
            }
        };

        for asset in universe {
            if self.cancel.is_cancelled() {
                return report;
            }
            let stored = match self.store.gap_range(&asset.asset_id) {
                Ok(range) => range,
                Err(e) => {
                    tracing::warn!(asset = %asset.asset_id, "failed to read stored range: {e}");
                    report.errors += 1;
                    continue;
                }
            };
            let segments = plan_segments(stored, today, days);
            if segments.is_empty() {
                report.skipped += 1;
                continue;
            }

            for segment in segments {
                let points = match self.client.market_chart_range(&asset.asset_id, segment.from, segment.to) {
                    Ok(points) => points,
                    Err(e) => {
                        let what = format!("{} {}..{}", asset.asset_id, segment.from, segment.to);
                        if Self::upstream_failure(&mut report, &what, e) {
                            return report;
                        }
                        continue;
                    }
                };
                for metric in chart_to_metrics(&asset.asset_id, points, now) {
                    match write_with_retry(self.store, |s| s.insert_daily_metric_if_absent(&metric)) {
                        Ok(true) => report.updated += 1,
                        Ok(false) => report.skipped += 1,
                        Err(e) => {
                            tracing::warn!(asset = %asset.asset_id, "failed to store backfilled day: {e}");
                            report.errors += 1;
                        }
                    }
                }
            }
        }
        report
    }
}
