//! CoinCast Runner: ingestion runs, model training, prediction and backtests.
//!
//! This crate builds on `coincast-core` to provide:
//! - Freshness-gated ingestion (master, daily, sentiment, historical backfill)
//! - Layered TOML/env configuration
//! - The forecast model contract, a ridge baseline and versioned artifacts
//! - Prediction post-processing (horizon prices, upside cap, confidence)
//! - Backtests of stored predictions against realised prices
//! - Social-impact averages and correlations across assets
//! - CSV/JSON export and a deterministic sample-coin seeder

pub mod backfill;
pub mod backtest;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod model;
pub mod postprocess;
pub mod predict;
pub mod registry;
pub mod ridge;
pub mod sample;
pub mod social;
pub mod train;

pub use backfill::{chart_to_metrics, plan_segments, Segment};
pub use backtest::{backtest_asset, evaluate, BacktestSummary, HorizonAccuracy};
pub use config::{
    ConfigError, DatabaseConfig, ForecastConfig, IngestionConfig, PipelineConfig, UpstreamConfig,
    API_KEY_ENV,
};
pub use error::PipelineError;
pub use export::{asset_detail_json, export_history_csv, export_predictions_csv};
pub use ingest::{CancelToken, IngestionOrchestrator, RunPlan, RunReport, Stage, StageReport};
pub use model::{ForecastModel, ForecastTrainer, ModelError, OutputKind, TrainedModel};
pub use postprocess::{PostProcessError, PostProcessor};
pub use predict::{predict_asset, predict_assets, PredictReport};
pub use registry::{ArtifactError, ModelArtifact, ModelRegistry, SCHEMA_VERSION};
pub use ridge::{RidgeModel, RidgeTrainer};
pub use sample::{sample_asset, sample_history, seed_sample};
pub use social::{social_impact, SocialCorrelations, SocialImpactReport, SocialImpactRow};
pub use train::{history_hash, train_assets, TrainReport, TrainedAsset};
