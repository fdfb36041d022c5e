//! Council run and run-cycle repositories.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{json_opt, parse_col, ts, ts_opt, ts_sql, StoreResult};
use crate::models::{CouncilRun, CouncilRunCycle, RunStatus, TradingMode};

const RUN_COLUMNS: &str = "id, council_id, user_id, trading_mode, symbols, status, started_at, \
     completed_at, run_number, request_data, results, error_message";

pub struct RunRepo<'c> {
    conn: &'c Connection,
}

impl<'c> RunRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<CouncilRun> {
        let mode_raw: String = row.get(3)?;
        let symbols_raw: String = row.get(4)?;
        let symbols: Vec<String> = serde_json::from_str(&symbols_raw)
            .map_err(|e| crate::db::col_err(4, format!("symbols json: {e}")))?;
        let status_raw: String = row.get(5)?;
        Ok(CouncilRun {
            id: row.get(0)?,
            council_id: row.get(1)?,
            user_id: row.get(2)?,
            trading_mode: parse_col(3, &mode_raw, TradingMode::parse)?,
            symbols,
            status: parse_col(5, &status_raw, RunStatus::parse)?,
            started_at: ts_opt(row, 6)?,
            completed_at: ts_opt(row, 7)?,
            run_number: row.get(8)?,
            request_data: json_opt(row, 9)?,
            results: json_opt(row, 10)?,
            error_message: row.get(11)?,
        })
    }

    /// Open a new run in IN_PROGRESS with the next run_number for the
    /// council.
    pub fn start(
        &self,
        council_id: i64,
        user_id: Option<i64>,
        trading_mode: TradingMode,
        symbols: &[String],
        started_at: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let next_number: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(run_number), 0) + 1 FROM council_runs WHERE council_id = ?1",
            params![council_id],
            |r| r.get(0),
        )?;
        let symbols_json = serde_json::to_string(symbols).unwrap_or_else(|_| "[]".to_string());
        self.conn.execute(
            "INSERT INTO council_runs \
             (council_id, user_id, trading_mode, symbols, status, started_at, run_number) \
             VALUES (?1, ?2, ?3, ?4, 'IN_PROGRESS', ?5, ?6)",
            params![
                council_id,
                user_id,
                trading_mode.as_str(),
                symbols_json,
                ts_sql(started_at),
                next_number,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn complete(&self, run_id: i64, results: &serde_json::Value) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE council_runs SET status = 'COMPLETED', completed_at = ?2, results = ?3 \
             WHERE id = ?1",
            params![run_id, ts_sql(Utc::now()), results.to_string()],
        )?;
        Ok(())
    }

    pub fn fail(&self, run_id: i64, error: &str) -> StoreResult<()> {
        let truncated: String = error.chars().take(2_000).collect();
        self.conn.execute(
            "UPDATE council_runs SET status = 'FAILED', completed_at = ?2, error_message = ?3 \
             WHERE id = ?1",
            params![run_id, ts_sql(Utc::now()), truncated],
        )?;
        Ok(())
    }

    pub fn get(&self, council_id: i64, run_id: i64) -> StoreResult<Option<CouncilRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM council_runs WHERE council_id = ?1 AND id = ?2");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt
            .query_row(params![council_id, run_id], Self::from_row)
            .optional()?)
    }

    pub fn in_progress_count(&self, council_id: i64) -> StoreResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM council_runs WHERE council_id = ?1 AND status = 'IN_PROGRESS'",
            params![council_id],
            |r| r.get(0),
        )?)
    }

    pub fn list_recent(&self, council_id: i64, limit: usize) -> StoreResult<Vec<CouncilRun>> {
        let limit = limit.clamp(1, 1_000) as i64;
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM council_runs \
             WHERE council_id = ?1 ORDER BY run_number DESC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![council_id, limit], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

const CYCLE_COLUMNS: &str = "id, council_run_id, cycle_number, status, started_at, completed_at, \
     analyst_signals, trading_decisions, executed_trades, portfolio_snapshot, \
     performance_metrics, trigger_reason, llm_calls_count, api_calls_count, \
     estimated_cost, error_message";

pub struct CycleRepo<'c> {
    conn: &'c Connection,
}

/// Mutable cycle payload flushed when the cycle finishes.
#[derive(Debug, Default)]
pub struct CycleArtifacts {
    pub analyst_signals: Option<serde_json::Value>,
    pub trading_decisions: Option<serde_json::Value>,
    pub executed_trades: Option<serde_json::Value>,
    pub portfolio_snapshot: Option<serde_json::Value>,
    pub performance_metrics: Option<serde_json::Value>,
    pub llm_calls_count: i64,
    pub api_calls_count: i64,
    pub estimated_cost: Option<String>,
}

impl<'c> CycleRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<CouncilRunCycle> {
        let status_raw: String = row.get(3)?;
        Ok(CouncilRunCycle {
            id: row.get(0)?,
            council_run_id: row.get(1)?,
            cycle_number: row.get(2)?,
            status: parse_col(3, &status_raw, RunStatus::parse)?,
            started_at: ts(row, 4)?,
            completed_at: ts_opt(row, 5)?,
            analyst_signals: json_opt(row, 6)?,
            trading_decisions: json_opt(row, 7)?,
            executed_trades: json_opt(row, 8)?,
            portfolio_snapshot: json_opt(row, 9)?,
            performance_metrics: json_opt(row, 10)?,
            trigger_reason: row.get(11)?,
            llm_calls_count: row.get(12)?,
            api_calls_count: row.get(13)?,
            estimated_cost: row.get(14)?,
            error_message: row.get(15)?,
        })
    }

    pub fn start(
        &self,
        council_run_id: i64,
        cycle_number: i64,
        trigger_reason: &str,
        started_at: DateTime<Utc>,
    ) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO council_run_cycles \
             (council_run_id, cycle_number, status, started_at, trigger_reason) \
             VALUES (?1, ?2, 'IN_PROGRESS', ?3, ?4)",
            params![council_run_id, cycle_number, ts_sql(started_at), trigger_reason],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn complete(&self, cycle_id: i64, artifacts: &CycleArtifacts) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE council_run_cycles SET \
                status = 'COMPLETED', completed_at = ?2, analyst_signals = ?3, \
                trading_decisions = ?4, executed_trades = ?5, portfolio_snapshot = ?6, \
                performance_metrics = ?7, llm_calls_count = ?8, api_calls_count = ?9, \
                estimated_cost = ?10 \
             WHERE id = ?1",
            params![
                cycle_id,
                ts_sql(Utc::now()),
                artifacts.analyst_signals.as_ref().map(|v| v.to_string()),
                artifacts.trading_decisions.as_ref().map(|v| v.to_string()),
                artifacts.executed_trades.as_ref().map(|v| v.to_string()),
                artifacts.portfolio_snapshot.as_ref().map(|v| v.to_string()),
                artifacts
                    .performance_metrics
                    .as_ref()
                    .map(|v| v.to_string()),
                artifacts.llm_calls_count,
                artifacts.api_calls_count,
                artifacts.estimated_cost,
            ],
        )?;
        Ok(())
    }

    pub fn fail(&self, cycle_id: i64, error: &str) -> StoreResult<()> {
        let truncated: String = error.chars().take(2_000).collect();
        self.conn.execute(
            "UPDATE council_run_cycles SET status = 'FAILED', completed_at = ?2, \
             error_message = ?3 WHERE id = ?1",
            params![cycle_id, ts_sql(Utc::now()), truncated],
        )?;
        Ok(())
    }

    pub fn list_for_run(&self, council_run_id: i64) -> StoreResult<Vec<CouncilRunCycle>> {
        let sql = format!(
            "SELECT {CYCLE_COLUMNS} FROM council_run_cycles \
             WHERE council_run_id = ?1 ORDER BY cycle_number ASC"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![council_run_id], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CouncilRepo, Database};
    use crate::models::{AgentsConfig, ConnectionsConfig, NewCouncil, TradingType};
    use rust_decimal::Decimal;

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let cid = {
            let conn = db.session().await;
            CouncilRepo::new(&conn)
                .insert(&NewCouncil {
                    user_id: None,
                    name: "runs".to_string(),
                    is_system: true,
                    is_public: false,
                    is_template: false,
                    agents: AgentsConfig::default(),
                    connections: ConnectionsConfig::default(),
                    trading_mode: TradingMode::Paper,
                    trading_type: TradingType::Futures,
                    initial_capital: Decimal::from(10_000),
                    forked_from_id: None,
                })
                .unwrap()
        };
        (db, cid)
    }

    #[tokio::test]
    async fn run_numbers_increase_and_status_transitions() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        let runs = RunRepo::new(&conn);

        let symbols = vec!["BTCUSDT".to_string()];
        let r1 = runs
            .start(cid, None, TradingMode::Paper, &symbols, Utc::now())
            .unwrap();
        assert_eq!(runs.in_progress_count(cid).unwrap(), 1);

        runs.complete(r1, &serde_json::json!({"trades_executed": 0}))
            .unwrap();
        assert_eq!(runs.in_progress_count(cid).unwrap(), 0);

        let r2 = runs
            .start(cid, None, TradingMode::Paper, &symbols, Utc::now())
            .unwrap();
        runs.fail(r2, "boom").unwrap();

        let listed = runs.list_recent(cid, 10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].run_number, 2);
        assert_eq!(listed[0].status, RunStatus::Failed);
        assert_eq!(listed[0].error_message.as_deref(), Some("boom"));
        assert_eq!(listed[1].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn cycle_lifecycle_persists_artifacts() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        let runs = RunRepo::new(&conn);
        let cycles = CycleRepo::new(&conn);

        let run_id = runs
            .start(cid, None, TradingMode::Paper, &["BTCUSDT".to_string()], Utc::now())
            .unwrap();
        let cycle_id = cycles.start(run_id, 1, "scheduled", Utc::now()).unwrap();
        cycles
            .complete(
                cycle_id,
                &CycleArtifacts {
                    executed_trades: Some(serde_json::json!([{"symbol": "BTCUSDT"}])),
                    llm_calls_count: 6,
                    ..Default::default()
                },
            )
            .unwrap();

        let listed = cycles.list_for_run(run_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, RunStatus::Completed);
        assert_eq!(listed[0].llm_calls_count, 6);
        assert!(listed[0].executed_trades.is_some());
    }
}
