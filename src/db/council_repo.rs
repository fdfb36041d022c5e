//! Council and wallet repositories.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{dec, dec_opt, dec_sql, parse_col, ts, ts_opt, ts_sql, StoreResult};
use crate::models::{
    AgentsConfig, ConnectionsConfig, Council, NewCouncil, TradingMode, TradingType, Wallet,
};

const COUNCIL_COLUMNS: &str = "id, user_id, name, is_system, is_public, is_template, is_active, \
     agents, connections, trading_mode, trading_type, \
     initial_capital, available_balance, used_balance, total_account_value, total_margin_used, \
     total_unrealized_profit, total_realized_pnl, net_pnl, total_fees, total_funding_fees, \
     open_futures_count, closed_futures_count, active_spot_holdings, \
     average_leverage, average_confidence, biggest_win, biggest_loss, \
     long_hold_pct, short_hold_pct, flat_hold_pct, \
     current_capital, total_pnl, total_pnl_percentage, win_rate, total_trades, \
     forked_from_id, created_at, updated_at, last_executed_at";

pub struct CouncilRepo<'c> {
    conn: &'c Connection,
}

impl<'c> CouncilRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Council> {
        let agents_raw: String = row.get(7)?;
        let agents: AgentsConfig = serde_json::from_str(&agents_raw)
            .map_err(|e| crate::db::col_err(7, format!("agents json: {e}")))?;
        let connections_raw: String = row.get(8)?;
        let connections: ConnectionsConfig = serde_json::from_str(&connections_raw)
            .map_err(|e| crate::db::col_err(8, format!("connections json: {e}")))?;
        let mode_raw: String = row.get(9)?;
        let type_raw: String = row.get(10)?;

        Ok(Council {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            is_system: row.get(3)?,
            is_public: row.get(4)?,
            is_template: row.get(5)?,
            is_active: row.get(6)?,
            agents,
            connections,
            trading_mode: parse_col(9, &mode_raw, TradingMode::parse)?,
            trading_type: parse_col(10, &type_raw, TradingType::parse)?,
            initial_capital: dec(row, 11)?,
            available_balance: dec(row, 12)?,
            used_balance: dec(row, 13)?,
            total_account_value: dec(row, 14)?,
            total_margin_used: dec(row, 15)?,
            total_unrealized_profit: dec(row, 16)?,
            total_realized_pnl: dec(row, 17)?,
            net_pnl: dec(row, 18)?,
            total_fees: dec(row, 19)?,
            total_funding_fees: dec(row, 20)?,
            open_futures_count: row.get(21)?,
            closed_futures_count: row.get(22)?,
            active_spot_holdings: row.get(23)?,
            average_leverage: dec(row, 24)?,
            average_confidence: dec(row, 25)?,
            biggest_win: dec(row, 26)?,
            biggest_loss: dec(row, 27)?,
            long_hold_pct: dec(row, 28)?,
            short_hold_pct: dec(row, 29)?,
            flat_hold_pct: dec(row, 30)?,
            current_capital: dec_opt(row, 31)?,
            total_pnl: dec_opt(row, 32)?,
            total_pnl_percentage: dec_opt(row, 33)?,
            win_rate: dec_opt(row, 34)?,
            total_trades: row.get(35)?,
            forked_from_id: row.get(36)?,
            created_at: ts(row, 37)?,
            updated_at: ts(row, 38)?,
            last_executed_at: ts_opt(row, 39)?,
        })
    }

    pub fn get(&self, council_id: i64) -> StoreResult<Option<Council>> {
        let sql = format!("SELECT {COUNCIL_COLUMNS} FROM councils WHERE id = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt
            .query_row(params![council_id], Self::from_row)
            .optional()?)
    }

    pub fn list_system_active(&self) -> StoreResult<Vec<Council>> {
        let sql = format!(
            "SELECT {COUNCIL_COLUMNS} FROM councils \
             WHERE is_system = 1 AND is_active = 1 ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_by_name(&self, name: &str) -> StoreResult<Option<Council>> {
        let sql = format!("SELECT {COUNCIL_COLUMNS} FROM councils WHERE name = ?1 LIMIT 1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![name], Self::from_row).optional()?)
    }

    pub fn insert(&self, new: &NewCouncil) -> StoreResult<i64> {
        let now = ts_sql(Utc::now());
        let agents = serde_json::to_string(&new.agents).unwrap_or_else(|_| "{}".to_string());
        let connections =
            serde_json::to_string(&new.connections).unwrap_or_else(|_| "{}".to_string());
        self.conn.execute(
            "INSERT INTO councils \
             (user_id, name, is_system, is_public, is_template, agents, connections, \
              trading_mode, trading_type, initial_capital, available_balance, \
              total_account_value, current_capital, forked_from_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?10, ?10, ?11, ?12, ?12)",
            params![
                new.user_id,
                new.name,
                new.is_system,
                new.is_public,
                new.is_template,
                agents,
                connections,
                new.trading_mode.as_str(),
                new.trading_type.as_str(),
                dec_sql(new.initial_capital),
                new.forked_from_id,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Flush the recomputed metric fields back onto the council row.
    pub fn update_metrics(&self, council: &Council) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE councils SET \
                total_account_value = ?2, available_balance = ?3, used_balance = ?4, \
                total_margin_used = ?5, total_unrealized_profit = ?6, total_realized_pnl = ?7, \
                net_pnl = ?8, total_fees = ?9, total_funding_fees = ?10, \
                open_futures_count = ?11, closed_futures_count = ?12, active_spot_holdings = ?13, \
                average_leverage = ?14, average_confidence = ?15, \
                biggest_win = ?16, biggest_loss = ?17, \
                long_hold_pct = ?18, short_hold_pct = ?19, flat_hold_pct = ?20, \
                current_capital = ?21, total_pnl = ?22, total_pnl_percentage = ?23, \
                win_rate = ?24, total_trades = ?25, updated_at = ?26 \
             WHERE id = ?1",
            params![
                council.id,
                dec_sql(council.total_account_value),
                dec_sql(council.available_balance),
                dec_sql(council.used_balance),
                dec_sql(council.total_margin_used),
                dec_sql(council.total_unrealized_profit),
                dec_sql(council.total_realized_pnl),
                dec_sql(council.net_pnl),
                dec_sql(council.total_fees),
                dec_sql(council.total_funding_fees),
                council.open_futures_count,
                council.closed_futures_count,
                council.active_spot_holdings,
                dec_sql(council.average_leverage),
                dec_sql(council.average_confidence),
                dec_sql(council.biggest_win),
                dec_sql(council.biggest_loss),
                dec_sql(council.long_hold_pct),
                dec_sql(council.short_hold_pct),
                dec_sql(council.flat_hold_pct),
                crate::db::dec_sql_opt(council.current_capital),
                crate::db::dec_sql_opt(council.total_pnl),
                crate::db::dec_sql_opt(council.total_pnl_percentage),
                crate::db::dec_sql_opt(council.win_rate),
                council.total_trades,
                ts_sql(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn touch_last_executed(&self, council_id: i64) -> StoreResult<()> {
        let now = ts_sql(Utc::now());
        self.conn.execute(
            "UPDATE councils SET last_executed_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![council_id, now],
        )?;
        Ok(())
    }

    pub fn delete(&self, council_id: i64) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM councils WHERE id = ?1", params![council_id])?;
        Ok(())
    }
}

pub struct WalletRepo<'c> {
    conn: &'c Connection,
}

impl<'c> WalletRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Wallet> {
        Ok(Wallet {
            id: row.get(0)?,
            council_id: row.get(1)?,
            exchange: row.get(2)?,
            api_key: row.get(3)?,
            secret_key: row.get(4)?,
            contract_address: row.get(5)?,
            created_at: ts(row, 6)?,
        })
    }

    pub fn find_for_council(&self, council_id: i64) -> StoreResult<Option<Wallet>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, council_id, exchange, api_key, secret_key, contract_address, created_at \
             FROM council_wallets WHERE council_id = ?1",
        )?;
        Ok(stmt
            .query_row(params![council_id], Self::from_row)
            .optional()?)
    }

    /// At most one wallet per council; replacing credentials overwrites in
    /// place.
    pub fn upsert(
        &self,
        council_id: i64,
        exchange: &str,
        api_key: &str,
        secret_key: &str,
        contract_address: Option<&str>,
    ) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO council_wallets \
             (council_id, exchange, api_key, secret_key, contract_address, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(council_id) DO UPDATE SET \
                exchange = excluded.exchange, \
                api_key = excluded.api_key, \
                secret_key = excluded.secret_key, \
                contract_address = excluded.contract_address",
            params![
                council_id,
                exchange,
                api_key,
                secret_key,
                contract_address,
                ts_sql(Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn delete_for_council(&self, council_id: i64) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM council_wallets WHERE council_id = ?1",
            params![council_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, StoreError};
    use rust_decimal::Decimal;

    fn new_council(name: &str) -> NewCouncil {
        NewCouncil {
            user_id: None,
            name: name.to_string(),
            is_system: true,
            is_public: true,
            is_template: false,
            agents: AgentsConfig {
                agents: vec![crate::models::AgentEntry {
                    agent_key: "satoshi_nakamoto".to_string(),
                    role: None,
                }],
            },
            connections: ConnectionsConfig::default(),
            trading_mode: TradingMode::Paper,
            trading_type: TradingType::Futures,
            initial_capital: Decimal::from(10_000),
            forked_from_id: None,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.session().await;
        let repo = CouncilRepo::new(&conn);

        let id = repo.insert(&new_council("Olympus")).unwrap();
        let council = repo.get(id).unwrap().unwrap();
        assert_eq!(council.name, "Olympus");
        assert_eq!(council.initial_capital, Decimal::from(10_000));
        assert_eq!(council.available_balance, Decimal::from(10_000));
        assert_eq!(council.flat_hold_pct, Decimal::from(100));
        assert!(council.is_system);

        assert!(repo.get(id + 1).unwrap().is_none());
        assert_eq!(repo.list_system_active().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_wallet_for_council_is_rejected_then_upserted() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.session().await;
        let councils = CouncilRepo::new(&conn);
        let wallets = WalletRepo::new(&conn);

        let id = councils.insert(&new_council("Olympus")).unwrap();
        wallets.upsert(id, "binance", "k1", "s1", None).unwrap();
        wallets.upsert(id, "aster", "k2", "s2", None).unwrap();

        let w = wallets.find_for_council(id).unwrap().unwrap();
        assert_eq!(w.exchange, "aster");
        assert_eq!(w.api_key, "k2");

        // direct insert (not upsert) must trip the unique index
        let dup = conn
            .execute(
                "INSERT INTO council_wallets \
                 (council_id, exchange, api_key, secret_key, created_at) \
                 VALUES (?1, 'binance', 'k', 's', ?2)",
                params![id, ts_sql(Utc::now())],
            )
            .map_err(StoreError::from);
        assert!(matches!(dup, Err(StoreError::Unique(_))));
    }

    #[tokio::test]
    async fn council_delete_cascades_to_wallet() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.session().await;
        let councils = CouncilRepo::new(&conn);
        let wallets = WalletRepo::new(&conn);

        let id = councils.insert(&new_council("Olympus")).unwrap();
        wallets.upsert(id, "binance", "k", "s", None).unwrap();
        councils.delete(id).unwrap();
        assert!(wallets.find_for_council(id).unwrap().is_none());
    }
}
