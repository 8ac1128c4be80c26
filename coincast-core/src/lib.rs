//! CoinCast Core: upstream access, the metric store and sequence building.
//!
//! - Domain records (assets, daily and sentiment metrics, predictions, horizons)
//! - Rate-limited CoinGecko client with explicit backoff state
//! - SQLite time-series store with idempotent per-day upserts
//! - Imputation, min-max scaling and multi-horizon windowing

pub mod data;
pub mod domain;
pub mod features;
pub mod store;
