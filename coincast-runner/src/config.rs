//! Pipeline configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. `COINGECKO_API_KEY` overrides `upstream.api_key`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use coincast_core::data::{RateLimitPolicy, DEFAULT_BASE_URL};
use coincast_core::features::normalize_horizons;

pub const API_KEY_ENV: &str = "COINGECKO_API_KEY";

/// Errors loading or validating configuration. Fatal for a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    pub ingestion: IngestionConfig,
    pub forecast: ForecastConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("coincast.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub max_rate_limit_retries: u32,
    pub server_retry_delay_secs: u64,
    pub max_server_retries: u32,
    pub min_call_interval_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
            initial_backoff_secs: 60,
            max_backoff_secs: 300,
            max_rate_limit_retries: 5,
            server_retry_delay_secs: 2,
            max_server_retries: 3,
            min_call_interval_ms: 0,
        }
    }
}

impl UpstreamConfig {
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            initial_backoff: Duration::from_secs(self.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            max_rate_limit_retries: self.max_rate_limit_retries,
            server_retry_delay: Duration::from_secs(self.server_retry_delay_secs),
            max_server_retries: self.max_server_retries,
            min_call_interval: Duration::from_millis(self.min_call_interval_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Assets per `coins/markets` page.
    pub per_page: u32,
    /// Pages fetched by the master and daily stages.
    pub pages: u32,
    /// Size of the sentiment and backfill universe.
    pub top_n: usize,
    /// Rows expected per day before the data counts as fresh.
    pub expected_floor: usize,
    pub backfill_days: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            per_page: 100,
            pages: 1,
            top_n: 100,
            expected_floor: 100,
            backfill_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub model_dir: PathBuf,
    pub family: String,
    pub sequence_length: usize,
    /// Days ahead.
    pub horizons: Vec<u32>,
    pub max_epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
    pub patience: usize,
    pub validation_fraction: f64,
    /// 7d price may not exceed this multiple of the current price.
    pub max_upside_ratio: f64,
    /// No horizon may fall below this fraction of the current price.
    pub min_price_ratio: f64,
    pub default_confidence: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            family: "RIDGE".to_string(),
            sequence_length: 5,
            horizons: vec![1, 2, 3, 7],
            max_epochs: 500,
            learning_rate: 0.05,
            l2: 1e-3,
            patience: 20,
            validation_fraction: 0.2,
            max_upside_ratio: 2.0,
            min_price_ratio: 0.01,
            default_confidence: 50.0,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file, apply the env override and validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: PipelineConfig = toml::from_str(content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus the env override, for runs without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            let key = key.trim();
            if !key.is_empty() {
                self.upstream.api_key = Some(key.to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.upstream.base_url.trim().is_empty() {
            return invalid("upstream.base_url is empty".into());
        }
        if self.upstream.initial_backoff_secs > self.upstream.max_backoff_secs {
            return invalid(format!(
                "upstream.initial_backoff_secs ({}) exceeds max_backoff_secs ({})",
                self.upstream.initial_backoff_secs, self.upstream.max_backoff_secs
            ));
        }
        if self.ingestion.per_page == 0 || self.ingestion.per_page > 250 {
            return invalid(format!(
                "ingestion.per_page must be in 1..=250, got {}",
                self.ingestion.per_page
            ));
        }
        if self.ingestion.pages == 0 {
            return invalid("ingestion.pages must be at least 1".into());
        }
        // The daily stage writes at most per_page * pages rows and the
        // sentiment stage at most top_n; a higher floor never reads as fresh.
        let i = &self.ingestion;
        let daily_capacity = u64::from(i.per_page) * u64::from(i.pages);
        if (i.expected_floor as u64) > daily_capacity {
            return invalid(format!(
                "ingestion.expected_floor ({}) exceeds per_page * pages ({daily_capacity})",
                i.expected_floor
            ));
        }
        if i.expected_floor > i.top_n {
            return invalid(format!(
                "ingestion.expected_floor ({}) exceeds top_n ({})",
                i.expected_floor, i.top_n
            ));
        }
        if i.backfill_days == 0 {
            return invalid("ingestion.backfill_days must be at least 1".into());
        }

        let f = &self.forecast;
        if f.sequence_length == 0 {
            return invalid("forecast.sequence_length must be at least 1".into());
        }
        normalize_horizons(&f.horizons).map_err(|e| ConfigError::Invalid(format!("forecast.horizons: {e}")))?;
        if f.family.is_empty() || f.family.contains('_') {
            return invalid(format!("forecast.family '{}' must be non-empty without '_'", f.family));
        }
        if !(f.learning_rate > 0.0 && f.learning_rate.is_finite()) {
            return invalid(format!("forecast.learning_rate must be positive, got {}", f.learning_rate));
        }
        if !(f.l2 >= 0.0 && f.l2.is_finite()) {
            return invalid(format!("forecast.l2 must be non-negative, got {}", f.l2));
        }
        if !(0.0..1.0).contains(&f.validation_fraction) {
            return invalid(format!(
                "forecast.validation_fraction must be in [0, 1), got {}",
                f.validation_fraction
            ));
        }
        if !(f.max_upside_ratio > 1.0) {
            return invalid(format!("forecast.max_upside_ratio must exceed 1, got {}", f.max_upside_ratio));
        }
        if !(f.min_price_ratio > 0.0 && f.min_price_ratio < 1.0) {
            return invalid(format!("forecast.min_price_ratio must be in (0, 1), got {}", f.min_price_ratio));
        }
        if !(0.0..=100.0).contains(&f.default_confidence) {
            return invalid(format!(
                "forecast.default_confidence must be in [0, 100], got {}",
                f.default_confidence
            ));
        }
        Ok(())
    }
}
