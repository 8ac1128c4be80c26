//! CoinCast CLI: ingestion, training, prediction and inspection commands.
//!
//! Commands:
//! - `ingest`: freshness-gated master/daily/sentiment sync, optional backfill
//! - `train`: fit one model per asset and write versioned artifacts
//! - `predict`: run the latest model per asset and store predictions
//! - `backtest`: score stored predictions against realised prices
//! - `analyze`: community size against recent price change, across assets
//! - `show`: latest snapshot, asset detail, history and predictions
//! - `seed-sample`: write a deterministic synthetic history for demos

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use coincast_core::data::{CoinGeckoClient, RateLimitedFetcher, ReqwestTransport, ThreadSleeper};
use coincast_core::store::MetricStore;
use coincast_runner::{
    asset_detail_json, backtest_asset, export_history_csv, export_predictions_csv, predict_assets,
    seed_sample, social_impact, train_assets, BacktestSummary, CancelToken, IngestionOrchestrator,
    ModelRegistry, PipelineConfig, PostProcessor, RidgeTrainer, RunPlan, RunReport, SocialImpactReport,
};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "coincast.toml";

#[derive(Parser)]
#[command(
    name = "coincast",
    about = "CoinCast: crypto market ingestion and short-horizon price forecasts"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./coincast.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch market and sentiment data. Without stage flags runs master, daily and sentiment.
    Ingest {
        /// Refresh asset master records.
        #[arg(long, default_value_t = false)]
        master: bool,

        /// Fetch today's market snapshot.
        #[arg(long, default_value_t = false)]
        daily: bool,

        /// Fetch community/sentiment data for the top assets.
        #[arg(long, default_value_t = false)]
        sentiment: bool,

        /// Backfill price history; without a value uses `ingestion.backfill_days`.
        #[arg(long, value_name = "DAYS")]
        backfill: Option<Option<u32>>,

        /// Ignore the freshness check.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Train a model per asset (all tracked assets when none are given).
    Train {
        #[arg(long = "asset")]
        assets: Vec<String>,
    },
    /// Predict with the latest model per asset (all tracked assets when none are given).
    Predict {
        #[arg(long = "asset")]
        assets: Vec<String>,
    },
    /// Score stored predictions against prices observed since.
    Backtest {
        #[arg(long = "asset")]
        assets: Vec<String>,
    },
    /// Average community size and price change per asset, with correlations.
    Analyze {
        /// Trailing window in days.
        #[arg(long, default_value_t = 30)]
        days: u32,

        /// Assets to list.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Inspect stored data.
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },
    /// Write a seeded synthetic price history.
    SeedSample {
        #[arg(long, default_value = "sample-coin")]
        asset: String,

        #[arg(long, default_value_t = 60)]
        days: u32,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Subcommand)]
enum ShowCommand {
    /// Latest market row per asset.
    Latest {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Asset record with its latest metric, sentiment and prediction, as JSON.
    Asset { asset: String },
    /// Daily price history.
    History {
        asset: String,

        /// First day (YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,

        /// Last day (YYYY-MM-DD).
        #[arg(long)]
        to: Option<String>,

        /// Print CSV instead of a table.
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
    /// Stored predictions, oldest first.
    Predictions {
        asset: String,

        #[arg(long, default_value_t = false)]
        csv: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.db)?;
    let now = Local::now().naive_local();

    match cli.command {
        Commands::Ingest {
            master,
            daily,
            sentiment,
            backfill,
            force,
        } => {
            let plan = RunPlan::from_flags(
                master,
                daily,
                sentiment,
                backfill,
                force,
                config.ingestion.backfill_days,
            );
            let cancel = CancelToken::new();
            cancel_on_interrupt(cancel.clone())?;
            let report = run_ingest(&config, &plan, cancel, now)?;
            print_run_report(&report);
            if report.aborted() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Train { assets } => run_train(&config, &assets, now),
        Commands::Predict { assets } => run_predict(&config, &assets, now),
        Commands::Backtest { assets } => run_backtest(&config, &assets),
        Commands::Analyze { days, limit } => {
            let store = open_store(&config)?;
            let report = social_impact(&store, now.date(), days)?;
            print_social_impact(&report, limit);
            Ok(())
        }
        Commands::Show { what } => run_show(&config, what),
        Commands::SeedSample { asset, days, seed } => {
            let mut store = open_store(&config)?;
            let inserted = seed_sample(&mut store, &asset, days, seed, now.date(), now)?;
            println!("Seeded {asset}: {days} days ({inserted} new)");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, db: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            PipelineConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => PipelineConfig::from_env()?,
    };
    if let Some(db) = db {
        config.database.path = db;
    }
    tracing::debug!(
        db = %config.database.path.display(),
        models = %config.forecast.model_dir.display(),
        api_key = config.upstream.api_key.is_some(),
        "configuration loaded"
    );
    Ok(config)
}

fn open_store(config: &PipelineConfig) -> Result<MetricStore> {
    MetricStore::open(&config.database.path)
        .with_context(|| format!("opening {}", config.database.path.display()))
}

#[cfg(unix)]
fn interrupts() -> std::io::Result<tokio::signal::unix::Signal> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
}

#[cfg(windows)]
fn interrupts() -> std::io::Result<tokio::signal::windows::CtrlC> {
    tokio::signal::windows::ctrl_c()
}

/// Cancel `token` on the first Ctrl-C; a second one exits at once.
///
/// The handler is registered before this returns.
fn cancel_on_interrupt(token: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    let mut signals = {
        let _guard = runtime.enter();
        interrupts().context("installing Ctrl-C handler")?
    };
    std::thread::Builder::new()
        .name("interrupt".into())
        .spawn(move || {
            runtime.block_on(async move {
                if signals.recv().await.is_some() {
                    tracing::warn!("interrupted, stopping after the current asset");
                    token.cancel();
                }
                if signals.recv().await.is_some() {
                    std::process::exit(130);
                }
            })
        })
        .context("spawning interrupt thread")?;
    Ok(())
}

fn run_ingest(
    config: &PipelineConfig,
    plan: &RunPlan,
    cancel: CancelToken,
    now: NaiveDateTime,
) -> Result<RunReport> {
    let transport = ReqwestTransport::new(config.upstream.timeout(), config.upstream.api_key.clone())
        .map_err(|e| anyhow::anyhow!("building HTTP client: {e}"))?;
    let fetcher = RateLimitedFetcher::new(
        Arc::new(transport),
        Arc::new(ThreadSleeper),
        config.upstream.base_url.clone(),
        config.upstream.rate_limit_policy(),
    );
    let client = CoinGeckoClient::new(fetcher);
    let mut store = open_store(config)?;

    let report = IngestionOrchestrator::new(&client, &mut store, &config.ingestion, cancel)
        .run(plan, now);
    Ok(report)
}

fn run_train(config: &PipelineConfig, assets: &[String], now: NaiveDateTime) -> Result<()> {
    let trainer = RidgeTrainer::from(&config.forecast);
    if config.forecast.family != coincast_runner::ridge::FAMILY {
        bail!(
            "unsupported model family '{}'; available: {}",
            config.forecast.family,
            coincast_runner::ridge::FAMILY
        );
    }
    let mut store = open_store(config)?;
    let registry = ModelRegistry::new(&config.forecast.model_dir);

    let report = train_assets(&mut store, &registry, &trainer, &config.forecast, assets, now)?;

    println!("{:<20} {:<18} {:>8} {:>7} {:>14}", "Asset", "Version", "Windows", "Epochs", "Val loss");
    println!("{}", "-".repeat(71));
    for t in &report.trained {
        println!(
            "{:<20} {:<18} {:>8} {:>7} {:>14.6}",
            t.asset_id, t.version, t.windows, t.epochs, t.validation_loss
        );
    }
    for (asset, reason) in &report.skipped {
        println!("SKIPPED {asset}: {reason}");
    }
    for (asset, reason) in &report.failed {
        eprintln!("FAILED {asset}: {reason}");
    }
    println!(
        "Trained {}, skipped {}, failed {}",
        report.trained.len(),
        report.skipped.len(),
        report.failed.len()
    );
    if report.all_failed() {
        bail!("training failed for every asset");
    }
    Ok(())
}

fn run_predict(config: &PipelineConfig, assets: &[String], now: NaiveDateTime) -> Result<()> {
    let mut store = open_store(config)?;
    let registry = ModelRegistry::new(&config.forecast.model_dir);
    let post = PostProcessor::from(&config.forecast);

    let report = predict_assets(&mut store, &registry, &post, assets, now)?;

    println!(
        "{:<20} {:>14} {:>14} {:>14} {:>14} {:>6}",
        "Asset", "24h", "48h", "3d", "7d", "Conf"
    );
    println!("{}", "-".repeat(87));
    for p in &report.predictions {
        println!(
            "{:<20} {:>14.6} {:>14.6} {:>14.6} {:>14.6} {:>6.1}",
            p.asset_id, p.price_24h, p.price_48h, p.price_3d, p.price_7d, p.confidence_score
        );
    }
    for (asset, reason) in &report.skipped {
        println!("SKIPPED {asset}: {reason}");
    }
    for (asset, reason) in &report.failed {
        eprintln!("FAILED {asset}: {reason}");
    }
    if report.all_failed() {
        bail!("prediction failed for every asset");
    }
    Ok(())
}

fn run_backtest(config: &PipelineConfig, assets: &[String]) -> Result<()> {
    let store = open_store(config)?;
    let assets = if assets.is_empty() {
        store.tracked_assets()?
    } else {
        assets.to_vec()
    };

    for asset in &assets {
        let summary = backtest_asset(&store, asset)?;
        print_backtest(&summary);
    }
    Ok(())
}

fn run_show(config: &PipelineConfig, what: ShowCommand) -> Result<()> {
    let store = open_store(config)?;
    match what {
        ShowCommand::Latest { limit } => {
            let mut rows: Vec<_> = store.latest_snapshot()?.into_values().collect();
            rows.sort_by_key(|m| (m.rank_at_observation.is_none(), m.rank_at_observation));
            println!(
                "{:<5} {:<20} {:>14} {:>9} {:<10} {}",
                "Rank", "Asset", "Price", "24h %", "Day", "Trending"
            );
            println!("{}", "-".repeat(70));
            for m in rows.iter().take(limit) {
                println!(
                    "{:<5} {:<20} {:>14.6} {:>9} {:<10} {}",
                    m.rank_at_observation.map_or_else(|| "-".into(), |r| r.to_string()),
                    m.asset_id,
                    m.price,
                    m.price_change_24h.map_or_else(|| "-".into(), |c| format!("{c:.2}")),
                    m.observation_day(),
                    if m.is_trending { "yes" } else { "" }
                );
            }
        }
        ShowCommand::Asset { asset } => {
            let Some(detail) = store.asset_detail(&asset)? else {
                bail!("unknown asset '{asset}'");
            };
            println!("{}", asset_detail_json(&detail)?);
        }
        ShowCommand::History { asset, from, to, csv } => {
            let from = parse_day(from.as_deref())?;
            let to = parse_day(to.as_deref())?;
            let rows = store.history(&asset, from, to)?;
            if csv {
                print!("{}", export_history_csv(&rows)?);
            } else {
                println!("{:<10} {:>14} {:>18} {:>18}", "Day", "Price", "Market cap", "Volume 24h");
                for m in &rows {
                    println!(
                        "{:<10} {:>14.6} {:>18} {:>18}",
                        m.observation_day(),
                        m.price,
                        m.market_cap.map_or_else(|| "-".into(), |v| format!("{v:.0}")),
                        m.volume_24h.map_or_else(|| "-".into(), |v| format!("{v:.0}")),
                    );
                }
                println!("{} rows", rows.len());
            }
        }
        ShowCommand::Predictions { asset, csv } => {
            let rows = store.predictions(&asset)?;
            if csv {
                print!("{}", export_predictions_csv(&rows)?);
            } else {
                for p in &rows {
                    println!(
                        "{} {:<16} 24h {:.6}  48h {:.6}  3d {:.6}  7d {:.6}  conf {:.1}",
                        p.prediction_made_at.format("%Y-%m-%d %H:%M"),
                        p.model_version,
                        p.price_24h,
                        p.price_48h,
                        p.price_3d,
                        p.price_7d,
                        p.confidence_score
                    );
                }
            }
        }
    }
    Ok(())
}

fn parse_day(s: Option<&str>) -> Result<Option<NaiveDate>> {
    s.map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'")))
        .transpose()
}

fn print_run_report(report: &RunReport) {
    println!();
    println!("=== Ingestion Run ===");
    if let Some(f) = &report.freshness {
        println!(
            "Freshness:      price {} ({} rows today), sentiment {} ({} rows today)",
            f.latest_price_day.map_or_else(|| "none".into(), |d| d.to_string()),
            f.todays_price_rows,
            f.latest_sentiment_day.map_or_else(|| "none".into(), |d| d.to_string()),
            f.todays_sentiment_rows,
        );
    } else {
        println!("Freshness:      bypassed (--force)");
    }
    for s in &report.stages {
        if !s.ran {
            println!("{:<15} not run ({})", format!("{}:", s.stage), s.note.as_deref().unwrap_or("-"));
            continue;
        }
        println!(
            "{:<15} updated {}, skipped {}, errors {}",
            format!("{}:", s.stage),
            s.updated,
            s.skipped,
            s.errors
        );
        if let Some(reason) = &s.aborted {
            println!("  ABORTED: {reason}");
        }
    }
    println!("Upstream calls: {}", report.upstream_calls);
    if report.cancelled {
        println!("WARNING: run was cancelled");
    }
    println!();
}

fn print_backtest(summary: &BacktestSummary) {
    println!();
    println!("=== Backtest: {} ({} predictions) ===", summary.asset_id, summary.predictions);
    if summary.horizons.is_empty() {
        println!("No predictions with realised prices yet.");
        return;
    }
    println!("{:<8} {:>9} {:>14} {:>9} {:>10}", "Horizon", "Evaluated", "MAE", "MAPE %", "Direction");
    for h in &summary.horizons {
        println!(
            "{:<8} {:>9} {:>14.6} {:>9.2} {:>9.1}%",
            h.horizon, h.evaluated, h.mae, h.mape, h.direction_hit_rate
        );
    }
}

fn print_social_impact(report: &SocialImpactReport, limit: usize) {
    let opt = |v: Option<f64>, prec: usize| v.map_or_else(|| "-".into(), |v| format!("{v:.prec$}"));
    println!();
    println!("=== Social Impact {} to {} ===", report.from_day, report.to_day);
    println!(
        "{:<20} {:>5} {:>10} {:>14} {:>14} {:>14}",
        "Asset", "Days", "Avg 24h %", "Twitter", "Reddit subs", "Reddit 48h"
    );
    println!("{}", "-".repeat(82));
    for r in report.rows.iter().take(limit) {
        println!(
            "{:<20} {:>5} {:>10} {:>14} {:>14} {:>14}",
            r.asset_id,
            r.days,
            opt(r.avg_price_change, 2),
            opt(r.avg_twitter_followers, 0),
            opt(r.avg_reddit_subscribers, 0),
            opt(r.avg_reddit_active_users, 0),
        );
    }
    println!();
    println!("Correlation with avg 24h price change ({} assets):", report.rows.len());
    let c = &report.correlations;
    println!("  twitter followers    {}", opt(c.twitter_followers, 3));
    println!("  reddit subscribers   {}", opt(c.reddit_subscribers, 3));
    println!("  reddit active (48h)  {}", opt(c.reddit_active_users, 3));
}
