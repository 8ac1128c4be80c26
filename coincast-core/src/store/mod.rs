//! SQLite-backed time-series store.
//!
//! Owns the `asset`, `daily_metric`, `sentiment_metric`, `prediction` and
//! `model_performance` tables. Every write runs in its own short transaction;
//! nothing holds a transaction across an upstream call.

mod assets;
mod forecasts;
mod metrics;
pub mod migrations;

use std::path::Path;

use rusqlite::{Connection, ErrorCode, OptionalExtension};
use thiserror::Error;

pub use metrics::{FreshnessReport, MetricWithSentiment};

use crate::domain::{AssetRecord, DailyMetric, Prediction, SentimentMetric};

/// Failures of the store layer.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("database unavailable: {0}")]
    Connection(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("required table '{0}' is missing; the database was not migrated")]
    MissingSchema(String),

    #[error("database error: {0}")]
    Other(String),
}

impl PersistenceError {
    /// Busy/locked databases may succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::Connection(_))
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                ErrorCode::ConstraintViolation => PersistenceError::Constraint(e.to_string()),
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure => PersistenceError::Connection(e.to_string()),
                _ => PersistenceError::Other(e.to_string()),
            },
            rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::InvalidColumnName(_)
            | rusqlite::Error::FromSqlConversionFailure(..) => {
                PersistenceError::SchemaMismatch(e.to_string())
            }
            _ => PersistenceError::Other(e.to_string()),
        }
    }
}

/// Whether a write created a new row or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Read model for a single-asset view.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetDetail {
    pub asset: AssetRecord,
    pub latest_metric: Option<DailyMetric>,
    pub latest_sentiment: Option<SentimentMetric>,
    pub latest_prediction: Option<Prediction>,
}

/// Handle over one SQLite connection.
pub struct MetricStore {
    conn: Connection,
}

impl MetricStore {
    /// Open (creating if needed) and migrate the database at `path`.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PersistenceError::Connection(format!("{}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        migrations::run_migrations(&conn)?;
        let store = Self { conn };
        store.verify_schema()?;
        Ok(store)
    }

    /// Fail if any required table is absent.
    pub fn verify_schema(&self) -> Result<(), PersistenceError> {
        for table in migrations::REQUIRED_TABLES {
            let found: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                return Err(PersistenceError::MissingSchema((*table).to_string()));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Nullable u64 column helpers; SQLite integers are signed.
fn opt_u64_to_sql(v: Option<u64>) -> Option<i64> {
    v.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

fn opt_u64_from_sql(v: Option<i64>) -> Option<u64> {
    v.and_then(|v| u64::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_passes_schema_check() {
        let store = MetricStore::open_in_memory().unwrap();
        store.verify_schema().unwrap();
    }

    #[test]
    fn missing_table_is_reported() {
        let store = MetricStore::open_in_memory().unwrap();
        store
            .connection()
            .execute_batch("DROP TABLE prediction;")
            .unwrap();
        match store.verify_schema() {
            Err(PersistenceError::MissingSchema(t)) => assert_eq!(t, "prediction"),
            other => panic!("expected MissingSchema, got {other:?}"),
        }
    }

    #[test]
    fn open_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("coincast.db");
        MetricStore::open(&path).unwrap();
        assert!(path.exists());
        // Reopening an already-migrated file is a no-op.
        MetricStore::open(&path).unwrap();
    }

    #[test]
    fn busy_is_retryable_constraint_is_not() {
        assert!(PersistenceError::Connection("busy".into()).is_retryable());
        assert!(!PersistenceError::Constraint("unique".into()).is_retryable());
    }
}
