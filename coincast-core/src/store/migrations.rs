//! Named, idempotent schema migrations.

use rusqlite::Connection;

use super::PersistenceError;

/// Tables the pipeline cannot run without.
pub const REQUIRED_TABLES: &[&str] = &[
    "asset",
    "daily_metric",
    "sentiment_metric",
    "prediction",
    "model_performance",
];

/// Apply every migration that has not been recorded yet.
pub fn run_migrations(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        )",
        [],
    )?;

    run_migration(conn, "001_asset", CREATE_ASSET_TABLE)?;
    run_migration(conn, "002_daily_metric", CREATE_DAILY_METRIC_TABLE)?;
    run_migration(conn, "003_sentiment_metric", CREATE_SENTIMENT_METRIC_TABLE)?;
    run_migration(conn, "004_prediction", CREATE_PREDICTION_TABLE)?;
    run_migration(conn, "005_model_performance", CREATE_MODEL_PERFORMANCE_TABLE)?;
    run_migration(conn, "006_sentiment_reddit_active", ADD_SENTIMENT_REDDIT_ACTIVE)?;

    tracing::debug!("database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<(), PersistenceError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?1)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("running migration: {name}");
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?1)", [name])?;
    }

    Ok(())
}

const CREATE_ASSET_TABLE: &str = r#"
CREATE TABLE asset (
    asset_id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    display_name TEXT NOT NULL,
    rank INTEGER,
    image_ref TEXT,
    image_id INTEGER,
    image_file TEXT,
    updated_at TEXT NOT NULL
);
CREATE INDEX idx_asset_rank ON asset(rank);
"#;

const CREATE_DAILY_METRIC_TABLE: &str = r#"
CREATE TABLE daily_metric (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    observation_day TEXT NOT NULL,
    price REAL NOT NULL,
    market_cap REAL,
    volume_24h REAL,
    price_change_24h REAL,
    rank_at_observation INTEGER,
    is_trending INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(asset_id, observation_day)
);
CREATE INDEX idx_daily_metric_day ON daily_metric(observation_day);
"#;

const CREATE_SENTIMENT_METRIC_TABLE: &str = r#"
CREATE TABLE sentiment_metric (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    observation_day TEXT NOT NULL,
    votes_up_pct REAL,
    votes_down_pct REAL,
    public_interest_score REAL,
    social_sentiment REAL,
    news_sentiment REAL,
    twitter_followers INTEGER,
    reddit_subscribers INTEGER,
    created_at TEXT NOT NULL,
    UNIQUE(asset_id, observation_day)
);
CREATE INDEX idx_sentiment_metric_day ON sentiment_metric(observation_day);
"#;

const CREATE_PREDICTION_TABLE: &str = r#"
CREATE TABLE prediction (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id TEXT NOT NULL,
    prediction_made_at TEXT NOT NULL,
    model_version TEXT NOT NULL,
    price_24h REAL NOT NULL,
    price_48h REAL NOT NULL,
    price_3d REAL NOT NULL,
    price_7d REAL NOT NULL,
    confidence_score REAL NOT NULL CHECK (confidence_score >= 0 AND confidence_score <= 100)
);
CREATE INDEX idx_prediction_asset ON prediction(asset_id, prediction_made_at);
"#;

const CREATE_MODEL_PERFORMANCE_TABLE: &str = r#"
CREATE TABLE model_performance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id TEXT NOT NULL,
    model_version TEXT NOT NULL,
    trained_at TEXT NOT NULL,
    mae_24h REAL,
    rmse_24h REAL,
    mae_48h REAL,
    rmse_48h REAL,
    mae_3d REAL,
    rmse_3d REAL,
    mae_7d REAL,
    rmse_7d REAL,
    training_samples INTEGER NOT NULL,
    notes TEXT,
    UNIQUE(asset_id, model_version)
);
"#;

const ADD_SENTIMENT_REDDIT_ACTIVE: &str = r#"
ALTER TABLE sentiment_metric ADD COLUMN reddit_active_users_48h INTEGER;
"#;
