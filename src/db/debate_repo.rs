//! Consensus decision, debate message and snapshot repositories.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::db::{
    dec, dec_opt, dec_sql, dec_sql_opt, json_opt, parse_col, ts, ts_sql, StoreResult,
};
use crate::models::{
    ConsensusDecision, DebateMessage, Decision, MessageType, PerformanceSnapshot, PnlSnapshot,
    Sentiment,
};

const DECISION_COLUMNS: &str = "id, council_id, council_run_id, council_run_cycle_id, symbol, decision, \
     confidence, votes_buy, votes_sell, votes_hold, total_votes, agent_votes, threshold, \
     reasoning, market_price, market_conditions, was_executed, executed_order_id, \
     execution_reason, created_at";

pub struct ConsensusRepo<'c> {
    conn: &'c Connection,
}

/// Insert payload for a freshly derived consensus decision.
#[derive(Debug, Clone)]
pub struct NewConsensusDecision {
    pub council_id: i64,
    pub council_run_id: Option<i64>,
    pub council_run_cycle_id: Option<i64>,
    pub symbol: String,
    pub decision: Decision,
    pub confidence: Decimal,
    pub votes_buy: i64,
    pub votes_sell: i64,
    pub votes_hold: i64,
    pub agent_votes: serde_json::Value,
    pub threshold: Decimal,
    pub reasoning: String,
    pub market_price: Option<Decimal>,
    pub market_conditions: Option<serde_json::Value>,
    pub execution_reason: String,
}

impl<'c> ConsensusRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<ConsensusDecision> {
        let decision_raw: String = row.get(5)?;
        let agent_votes_raw: String = row.get(11)?;
        let agent_votes = serde_json::from_str(&agent_votes_raw)
            .map_err(|e| crate::db::col_err(11, format!("agent_votes json: {e}")))?;
        Ok(ConsensusDecision {
            id: row.get(0)?,
            council_id: row.get(1)?,
            council_run_id: row.get(2)?,
            council_run_cycle_id: row.get(3)?,
            symbol: row.get(4)?,
            decision: parse_col(5, &decision_raw, Decision::parse)?,
            confidence: dec(row, 6)?,
            votes_buy: row.get(7)?,
            votes_sell: row.get(8)?,
            votes_hold: row.get(9)?,
            total_votes: row.get(10)?,
            agent_votes,
            threshold: dec(row, 12)?,
            reasoning: row.get(13)?,
            market_price: dec_opt(row, 14)?,
            market_conditions: json_opt(row, 15)?,
            was_executed: row.get(16)?,
            executed_order_id: row.get(17)?,
            execution_reason: row.get(18)?,
            created_at: ts(row, 19)?,
        })
    }

    pub fn insert(&self, new: &NewConsensusDecision) -> StoreResult<i64> {
        let total = new.votes_buy + new.votes_sell + new.votes_hold;
        self.conn.execute(
            "INSERT INTO consensus_decisions \
             (council_id, council_run_id, council_run_cycle_id, symbol, decision, confidence, \
              votes_buy, votes_sell, votes_hold, total_votes, agent_votes, threshold, reasoning, \
              market_price, market_conditions, was_executed, execution_reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0, ?16, ?17)",
            params![
                new.council_id,
                new.council_run_id,
                new.council_run_cycle_id,
                new.symbol,
                new.decision.as_str(),
                dec_sql(new.confidence),
                new.votes_buy,
                new.votes_sell,
                new.votes_hold,
                total,
                new.agent_votes.to_string(),
                dec_sql(new.threshold),
                new.reasoning,
                dec_sql_opt(new.market_price),
                new.market_conditions.as_ref().map(|v| v.to_string()),
                new.execution_reason,
                ts_sql(Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record the execution outcome once the trading stage has run.
    pub fn mark_executed(
        &self,
        decision_id: i64,
        was_executed: bool,
        executed_order_id: Option<i64>,
        execution_reason: &str,
    ) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE consensus_decisions SET \
                was_executed = ?2, executed_order_id = ?3, execution_reason = ?4 \
             WHERE id = ?1",
            params![decision_id, was_executed, executed_order_id, execution_reason],
        )?;
        Ok(())
    }

    pub fn get(&self, council_id: i64, decision_id: i64) -> StoreResult<Option<ConsensusDecision>> {
        let sql = format!(
            "SELECT {DECISION_COLUMNS} FROM consensus_decisions \
             WHERE council_id = ?1 AND id = ?2"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt
            .query_row(params![council_id, decision_id], Self::from_row)
            .optional()?)
    }

    pub fn list_recent(
        &self,
        council_id: i64,
        decision_filter: Option<Decision>,
        limit: usize,
    ) -> StoreResult<Vec<ConsensusDecision>> {
        let limit = limit.clamp(1, 1_000) as i64;
        let rows = match decision_filter {
            Some(d) => {
                let sql = format!(
                    "SELECT {DECISION_COLUMNS} FROM consensus_decisions \
                     WHERE council_id = ?1 AND decision = ?2 \
                     ORDER BY created_at DESC LIMIT ?3"
                );
                let mut stmt = self.conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![council_id, d.as_str(), limit], Self::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {DECISION_COLUMNS} FROM consensus_decisions \
                     WHERE council_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                );
                let mut stmt = self.conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![council_id, limit], Self::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }
}

pub struct DebateRepo<'c> {
    conn: &'c Connection,
}

impl<'c> DebateRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &self,
        council_id: i64,
        agent_name: &str,
        message: &str,
        message_type: MessageType,
        sentiment: Sentiment,
        market_symbol: Option<&str>,
        confidence: Option<Decimal>,
        debate_round: i64,
    ) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO agent_debate_messages \
             (council_id, agent_name, message, message_type, sentiment, market_symbol, \
              confidence, debate_round, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                council_id,
                agent_name,
                message,
                message_type.as_str(),
                sentiment.as_str(),
                market_symbol,
                dec_sql_opt(confidence),
                debate_round,
                ts_sql(Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_recent(&self, council_id: i64, limit: usize) -> StoreResult<Vec<DebateMessage>> {
        let limit = limit.clamp(1, 1_000) as i64;
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, council_id, agent_name, message, message_type, sentiment, market_symbol, \
                    confidence, debate_round, created_at \
             FROM agent_debate_messages WHERE council_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![council_id, limit], |row| {
            let type_raw: String = row.get(4)?;
            let sentiment_raw: String = row.get(5)?;
            Ok(DebateMessage {
                id: row.get(0)?,
                council_id: row.get(1)?,
                agent_name: row.get(2)?,
                message: row.get(3)?,
                message_type: parse_col(4, &type_raw, MessageType::parse)?,
                sentiment: parse_col(5, &sentiment_raw, Sentiment::parse)?,
                market_symbol: row.get(6)?,
                confidence: dec_opt(row, 7)?,
                debate_round: row.get(8)?,
                created_at: ts(row, 9)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

pub struct SnapshotRepo<'c> {
    conn: &'c Connection,
}

/// One hour of aggregated performance across councils.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyPerformance {
    pub hour: String,
    pub council_count: i64,
    pub avg_total_value: Decimal,
    pub avg_pnl: Decimal,
}

impl<'c> SnapshotRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn insert_pnl(&self, s: &PnlSnapshot) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO pnl_snapshots \
             (council_id, futures_position_id, spot_holding_id, snapshot_time, mark_price, \
              notional_value, unrealized_pnl, pnl_percentage, liquidation_distance_pct, margin_ratio) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                s.council_id,
                s.futures_position_id,
                s.spot_holding_id,
                ts_sql(s.snapshot_time),
                dec_sql(s.mark_price),
                dec_sql(s.notional_value),
                dec_sql(s.unrealized_pnl),
                dec_sql(s.pnl_percentage),
                dec_sql_opt(s.liquidation_distance_pct),
                dec_sql_opt(s.margin_ratio),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_performance(&self, s: &PerformanceSnapshot) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO council_performance_snapshots \
             (council_id, snapshot_time, total_value, pnl, pnl_percentage, win_rate, \
              total_trades, open_positions) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                s.council_id,
                ts_sql(s.snapshot_time),
                dec_sql(s.total_value),
                dec_sql(s.pnl),
                dec_sql(s.pnl_percentage),
                dec_sql(s.win_rate),
                s.total_trades,
                s.open_positions,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn performance_history(
        &self,
        council_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<PerformanceSnapshot>> {
        let limit = limit.clamp(1, 20_000) as i64;
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, council_id, snapshot_time, total_value, pnl, pnl_percentage, win_rate, \
                    total_trades, open_positions \
             FROM council_performance_snapshots WHERE council_id = ?1 \
             ORDER BY snapshot_time ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![council_id, limit], |row| {
            Ok(PerformanceSnapshot {
                id: row.get(0)?,
                council_id: row.get(1)?,
                snapshot_time: ts(row, 2)?,
                total_value: dec(row, 3)?,
                pnl: dec(row, 4)?,
                pnl_percentage: dec(row, 5)?,
                win_rate: dec(row, 6)?,
                total_trades: row.get(7)?,
                open_positions: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Per-hour averages across all councils inside the window. Averaging
    /// happens on the parsed decimals, not in SQL, so the TEXT storage stays
    /// lossless.
    pub fn performance_hourly(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<HourlyPerformance>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT strftime('%Y-%m-%dT%H:00:00Z', snapshot_time) AS hour, council_id, \
                    total_value, pnl \
             FROM council_performance_snapshots \
             WHERE snapshot_time >= ?1 AND snapshot_time < ?2 \
             ORDER BY hour ASC",
        )?;
        let rows = stmt.query_map(params![ts_sql(start), ts_sql(end)], |row| {
            let hour: String = row.get(0)?;
            let council_id: i64 = row.get(1)?;
            let total_value = dec(row, 2)?;
            let pnl = dec(row, 3)?;
            Ok((hour, council_id, total_value, pnl))
        })?;

        let mut out: Vec<HourlyPerformance> = Vec::new();
        let mut acc: Option<(String, std::collections::BTreeSet<i64>, Vec<Decimal>, Vec<Decimal>)> =
            None;
        for row in rows {
            let (hour, council_id, total_value, pnl) = row?;
            let same_hour = acc.as_ref().map(|(h, ..)| *h == hour).unwrap_or(false);
            if !same_hour {
                if let Some(done) = acc.take() {
                    out.push(Self::finish_hour(done));
                }
                acc = Some((
                    hour,
                    std::collections::BTreeSet::new(),
                    Vec::new(),
                    Vec::new(),
                ));
            }
            if let Some((_, councils, values, pnls)) = acc.as_mut() {
                councils.insert(council_id);
                values.push(total_value);
                pnls.push(pnl);
            }
        }
        if let Some(done) = acc.take() {
            out.push(Self::finish_hour(done));
        }
        Ok(out)
    }

    fn finish_hour(
        (hour, councils, values, pnls): (
            String,
            std::collections::BTreeSet<i64>,
            Vec<Decimal>,
            Vec<Decimal>,
        ),
    ) -> HourlyPerformance {
        HourlyPerformance {
            hour,
            council_count: councils.len() as i64,
            avg_total_value: crate::money::mean(&values, crate::money::USD_SCALE),
            avg_pnl: crate::money::mean(&pnls, crate::money::USD_SCALE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CouncilRepo, Database};
    use crate::models::{AgentsConfig, ConnectionsConfig, NewCouncil, TradingMode, TradingType};
    use chrono::TimeZone;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let cid = {
            let conn = db.session().await;
            CouncilRepo::new(&conn)
                .insert(&NewCouncil {
                    user_id: None,
                    name: "debate".to_string(),
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

    fn decision(cid: i64, symbol: &str, decision: Decision) -> NewConsensusDecision {
        NewConsensusDecision {
            council_id: cid,
            council_run_id: None,
            council_run_cycle_id: None,
            symbol: symbol.to_string(),
            decision,
            confidence: d("0.7500"),
            votes_buy: 3,
            votes_sell: 1,
            votes_hold: 1,
            agent_votes: serde_json::json!({"satoshi_nakamoto": "LONG"}),
            threshold: d("0.6"),
            reasoning: "test".to_string(),
            market_price: Some(d("50000")),
            market_conditions: None,
            execution_reason: "pending".to_string(),
        }
    }

    #[tokio::test]
    async fn vote_total_is_derived_and_stored() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        let repo = ConsensusRepo::new(&conn);
        let id = repo.insert(&decision(cid, "BTCUSDT", Decision::Buy)).unwrap();
        let got = repo.get(cid, id).unwrap().unwrap();
        assert_eq!(got.total_votes, got.votes_buy + got.votes_sell + got.votes_hold);
        assert!(!got.was_executed);
        assert_eq!(got.execution_reason.as_deref(), Some("pending"));
    }

    #[tokio::test]
    async fn decision_filter_and_mark_executed() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        let repo = ConsensusRepo::new(&conn);
        let id = repo.insert(&decision(cid, "BTCUSDT", Decision::Buy)).unwrap();
        repo.insert(&decision(cid, "ETHUSDT", Decision::Hold)).unwrap();

        repo.mark_executed(id, true, None, "trade_executed").unwrap();
        let buys = repo.list_recent(cid, Some(Decision::Buy), 10).unwrap();
        assert_eq!(buys.len(), 1);
        assert!(buys[0].was_executed);
        assert_eq!(repo.list_recent(cid, None, 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn debate_messages_are_bounded_and_newest_first() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        let repo = DebateRepo::new(&conn);
        for i in 0..5 {
            repo.append(
                cid,
                "Satoshi Nakamoto",
                &format!("analysis {i}"),
                MessageType::PersonaAnalysis,
                Sentiment::Bullish,
                Some("BTCUSDT"),
                Some(d("0.8")),
                1,
            )
            .unwrap();
        }
        let recent = repo.list_recent(cid, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "analysis 4");
    }

    #[tokio::test]
    async fn hourly_aggregation_groups_across_councils() {
        let (db, cid) = setup().await;
        let cid2 = {
            let conn = db.session().await;
            CouncilRepo::new(&conn)
                .insert(&NewCouncil {
                    user_id: None,
                    name: "debate2".to_string(),
                    is_system: true,
                    is_public: false,
                    is_template: false,
                    agents: AgentsConfig::default(),
                    connections: ConnectionsConfig::default(),
                    trading_mode: TradingMode::Paper,
                    trading_type: TradingType::Spot,
                    initial_capital: Decimal::from(5_000),
                    forked_from_id: None,
                })
                .unwrap()
        };
        let conn = db.session().await;
        let repo = SnapshotRepo::new(&conn);
        let t0 = Utc.with_ymd_and_hms(2026, 7, 1, 10, 15, 0).unwrap();
        for (council, value) in [(cid, "10000.00"), (cid2, "5000.00")] {
            repo.insert_performance(&PerformanceSnapshot {
                id: 0,
                council_id: council,
                snapshot_time: t0,
                total_value: d(value),
                pnl: d("0"),
                pnl_percentage: d("0"),
                win_rate: d("0"),
                total_trades: 0,
                open_positions: 0,
            })
            .unwrap();
        }

        let hours = repo
            .performance_hourly(
                Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 7, 2, 0, 0, 0).unwrap(),
            )
            .unwrap();
        assert_eq!(hours.len(), 1);
        assert_eq!(hours[0].council_count, 2);
        assert_eq!(hours[0].avg_total_value, d("7500.00"));
    }
}
