//! SQLite-backed store.
//!
//! The connection lives behind an async mutex (one session per cycle);
//! repositories borrow a `&Connection` so they work equally inside and
//! outside explicit transactions. Commits happen at cycle checkpoints via
//! `Connection::transaction`, driven by the orchestrator and the metrics
//! engine, never inside a repository.

pub mod council_repo;
pub mod debate_repo;
pub mod run_repo;
pub mod schema;
pub mod trade_repo;

pub use council_repo::{CouncilRepo, WalletRepo};
pub use debate_repo::{ConsensusRepo, DebateRepo, SnapshotRepo};
pub use run_repo::{CycleRepo, RunRepo};
pub use trade_repo::{FuturesPositionRepo, OrderRepo, SpotHoldingRepo};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::DatabaseConfig;

/// Store failure, with constraint violations broken out so callers can
/// tell data bugs from contention.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Unique(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKey(String),

    #[error("check constraint violated: {0}")]
    Check(String),

    #[error("database busy: {0}")]
    Busy(String),

    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),
}

impl StoreError {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ffi, ref msg) = e {
            let detail = msg.clone().unwrap_or_else(|| ffi.to_string());
            match ffi.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return StoreError::Unique(detail);
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return StoreError::ForeignKey(detail);
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_CHECK => {
                    return StoreError::Check(detail);
                }
                _ => {}
            }
            if ffi.code == rusqlite::ErrorCode::DatabaseBusy
                || ffi.code == rusqlite::ErrorCode::DatabaseLocked
            {
                return StoreError::Busy(detail);
            }
        }
        StoreError::Sqlite(e)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
#[error("bad column value: {0}")]
pub(crate) struct ColumnError(pub String);

/// Shared database handle; cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(cfg: &DatabaseConfig) -> StoreResult<Self> {
        let conn = Connection::open(&cfg.path)?;
        Self::init(conn, cfg.busy_timeout_ms)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, 5_000)
    }

    fn init(conn: Connection, busy_timeout_ms: u32) -> StoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::create_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the cycle session. Hold the guard across a checkpoint's DB
    /// work and drop it before network I/O.
    pub async fn session(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

// --- column helpers -------------------------------------------------------

pub(crate) fn col_err(idx: usize, detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(ColumnError(detail)))
}

pub(crate) fn dec(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| col_err(idx, format!("decimal '{raw}': {e}")))
}

pub(crate) fn dec_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| col_err(idx, format!("decimal '{s}': {e}"))),
    }
}

pub(crate) fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| col_err(idx, format!("timestamp '{raw}': {e}")))
}

pub(crate) fn ts_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| col_err(idx, format!("timestamp '{s}': {e}"))),
    }
}

pub(crate) fn json_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| col_err(idx, format!("json: {e}"))),
    }
}

pub(crate) fn parse_col<T>(
    idx: usize,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| col_err(idx, format!("unrecognized value '{raw}'")))
}

pub(crate) fn dec_sql(d: Decimal) -> String {
    d.to_string()
}

pub(crate) fn dec_sql_opt(d: Option<Decimal>) -> Option<String> {
    d.map(|v| v.to_string())
}

pub(crate) fn ts_sql(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub(crate) fn ts_sql_opt(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(ts_sql)
}
