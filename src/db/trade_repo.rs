//! Futures position, spot holding and order repositories.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    dec, dec_opt, dec_sql, dec_sql_opt, parse_col, ts, ts_opt, ts_sql, ts_sql_opt, StoreResult,
};
use crate::models::{
    ExitPlan, FuturesPosition, HoldingStatus, MarginType, Order, OrderSide, OrderStatus, OrderType,
    PositionSide, PositionStatus, SpotHolding, TradingMode, TradingType,
};

const POSITION_COLUMNS: &str = "id, council_id, symbol, position_side, position_amt, entry_price, \
     mark_price, liquidation_price, leverage, margin_type, isolated_margin, notional, \
     unrealized_profit, realized_pnl, fees_paid, funding_fees, confidence, agent_reasoning, \
     platform, trading_mode, status, opened_at, closed_at, \
     stop_loss_price, stop_loss_order_id, take_profit_short, take_profit_short_order_id, \
     take_profit_mid, take_profit_mid_order_id, take_profit_long, take_profit_long_order_id";

pub struct FuturesPositionRepo<'c> {
    conn: &'c Connection,
}

impl<'c> FuturesPositionRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<FuturesPosition> {
        let side_raw: String = row.get(3)?;
        let margin_raw: String = row.get(9)?;
        let mode_raw: String = row.get(19)?;
        let status_raw: String = row.get(20)?;
        Ok(FuturesPosition {
            id: row.get(0)?,
            council_id: row.get(1)?,
            symbol: row.get(2)?,
            position_side: parse_col(3, &side_raw, PositionSide::parse)?,
            position_amt: dec(row, 4)?,
            entry_price: dec(row, 5)?,
            mark_price: dec_opt(row, 6)?,
            liquidation_price: dec_opt(row, 7)?,
            leverage: row.get(8)?,
            margin_type: parse_col(9, &margin_raw, MarginType::parse)?,
            isolated_margin: dec_opt(row, 10)?,
            notional: dec_opt(row, 11)?,
            unrealized_profit: dec_opt(row, 12)?,
            realized_pnl: dec_opt(row, 13)?,
            fees_paid: dec(row, 14)?,
            funding_fees: dec(row, 15)?,
            confidence: dec_opt(row, 16)?,
            agent_reasoning: row.get(17)?,
            platform: row.get(18)?,
            trading_mode: parse_col(19, &mode_raw, TradingMode::parse)?,
            status: parse_col(20, &status_raw, PositionStatus::parse)?,
            opened_at: ts(row, 21)?,
            closed_at: ts_opt(row, 22)?,
            exit_plan: ExitPlan {
                stop_loss_price: dec_opt(row, 23)?,
                stop_loss_order_id: row.get(24)?,
                take_profit_short: dec_opt(row, 25)?,
                take_profit_short_order_id: row.get(26)?,
                take_profit_mid: dec_opt(row, 27)?,
                take_profit_mid_order_id: row.get(28)?,
                take_profit_long: dec_opt(row, 29)?,
                take_profit_long_order_id: row.get(30)?,
            },
        })
    }

    pub fn find_open(
        &self,
        council_id: i64,
        symbol: Option<&str>,
    ) -> StoreResult<Vec<FuturesPosition>> {
        let rows = match symbol {
            Some(sym) => {
                let sql = format!(
                    "SELECT {POSITION_COLUMNS} FROM futures_positions \
                     WHERE council_id = ?1 AND status = 'OPEN' AND symbol = ?2 \
                     ORDER BY opened_at DESC"
                );
                let mut stmt = self.conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![council_id, sym], Self::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {POSITION_COLUMNS} FROM futures_positions \
                     WHERE council_id = ?1 AND status = 'OPEN' ORDER BY opened_at DESC"
                );
                let mut stmt = self.conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![council_id], Self::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    pub fn find_closed(&self, council_id: i64, limit: usize) -> StoreResult<Vec<FuturesPosition>> {
        let limit = limit.clamp(1, 10_000) as i64;
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM futures_positions \
             WHERE council_id = ?1 AND status IN ('CLOSED', 'LIQUIDATED') \
             ORDER BY closed_at DESC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![council_id, limit], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_all(&self, council_id: i64) -> StoreResult<Vec<FuturesPosition>> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM futures_positions \
             WHERE council_id = ?1 ORDER BY opened_at ASC"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![council_id], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_by_key(
        &self,
        council_id: i64,
        symbol: &str,
        position_side: PositionSide,
        status: PositionStatus,
    ) -> StoreResult<Option<FuturesPosition>> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM futures_positions \
             WHERE council_id = ?1 AND symbol = ?2 AND position_side = ?3 AND status = ?4 \
             ORDER BY opened_at DESC LIMIT 1"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt
            .query_row(
                params![council_id, symbol, position_side.as_str(), status.as_str()],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn insert(&self, p: &FuturesPosition) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO futures_positions \
             (council_id, symbol, position_side, position_amt, entry_price, mark_price, \
              liquidation_price, leverage, margin_type, isolated_margin, notional, \
              unrealized_profit, realized_pnl, fees_paid, funding_fees, confidence, \
              agent_reasoning, platform, trading_mode, status, opened_at, closed_at, \
              stop_loss_price, stop_loss_order_id, take_profit_short, take_profit_short_order_id, \
              take_profit_mid, take_profit_mid_order_id, take_profit_long, take_profit_long_order_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)",
            params![
                p.council_id,
                p.symbol,
                p.position_side.as_str(),
                dec_sql(p.position_amt),
                dec_sql(p.entry_price),
                dec_sql_opt(p.mark_price),
                dec_sql_opt(p.liquidation_price),
                p.leverage,
                p.margin_type.as_str(),
                dec_sql_opt(p.isolated_margin),
                dec_sql_opt(p.notional),
                dec_sql_opt(p.unrealized_profit),
                dec_sql_opt(p.realized_pnl),
                dec_sql(p.fees_paid),
                dec_sql(p.funding_fees),
                dec_sql_opt(p.confidence),
                p.agent_reasoning,
                p.platform,
                p.trading_mode.as_str(),
                p.status.as_str(),
                ts_sql(p.opened_at),
                ts_sql_opt(p.closed_at),
                dec_sql_opt(p.exit_plan.stop_loss_price),
                p.exit_plan.stop_loss_order_id,
                dec_sql_opt(p.exit_plan.take_profit_short),
                p.exit_plan.take_profit_short_order_id,
                dec_sql_opt(p.exit_plan.take_profit_mid),
                p.exit_plan.take_profit_mid_order_id,
                dec_sql_opt(p.exit_plan.take_profit_long),
                p.exit_plan.take_profit_long_order_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update(&self, p: &FuturesPosition) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE futures_positions SET \
                position_amt = ?2, entry_price = ?3, mark_price = ?4, liquidation_price = ?5, \
                leverage = ?6, margin_type = ?7, isolated_margin = ?8, notional = ?9, \
                unrealized_profit = ?10, realized_pnl = ?11, fees_paid = ?12, funding_fees = ?13, \
                confidence = ?14, agent_reasoning = ?15, status = ?16, closed_at = ?17, \
                stop_loss_price = ?18, stop_loss_order_id = ?19, \
                take_profit_short = ?20, take_profit_short_order_id = ?21, \
                take_profit_mid = ?22, take_profit_mid_order_id = ?23, \
                take_profit_long = ?24, take_profit_long_order_id = ?25 \
             WHERE id = ?1",
            params![
                p.id,
                dec_sql(p.position_amt),
                dec_sql(p.entry_price),
                dec_sql_opt(p.mark_price),
                dec_sql_opt(p.liquidation_price),
                p.leverage,
                p.margin_type.as_str(),
                dec_sql_opt(p.isolated_margin),
                dec_sql_opt(p.notional),
                dec_sql_opt(p.unrealized_profit),
                dec_sql_opt(p.realized_pnl),
                dec_sql(p.fees_paid),
                dec_sql(p.funding_fees),
                dec_sql_opt(p.confidence),
                p.agent_reasoning,
                p.status.as_str(),
                ts_sql_opt(p.closed_at),
                dec_sql_opt(p.exit_plan.stop_loss_price),
                p.exit_plan.stop_loss_order_id,
                dec_sql_opt(p.exit_plan.take_profit_short),
                p.exit_plan.take_profit_short_order_id,
                dec_sql_opt(p.exit_plan.take_profit_mid),
                p.exit_plan.take_profit_mid_order_id,
                dec_sql_opt(p.exit_plan.take_profit_long),
                p.exit_plan.take_profit_long_order_id,
            ],
        )?;
        Ok(())
    }
}

const HOLDING_COLUMNS: &str = "id, council_id, symbol, base_asset, quote_asset, free, locked, total, \
     average_cost, total_cost, current_price, current_value, unrealized_pnl, \
     platform, trading_mode, status, first_acquired_at, closed_at";

pub struct SpotHoldingRepo<'c> {
    conn: &'c Connection,
}

impl<'c> SpotHoldingRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<SpotHolding> {
        let mode_raw: String = row.get(14)?;
        let status_raw: String = row.get(15)?;
        Ok(SpotHolding {
            id: row.get(0)?,
            council_id: row.get(1)?,
            symbol: row.get(2)?,
            base_asset: row.get(3)?,
            quote_asset: row.get(4)?,
            free: dec(row, 5)?,
            locked: dec(row, 6)?,
            total: dec(row, 7)?,
            average_cost: dec(row, 8)?,
            total_cost: dec(row, 9)?,
            current_price: dec_opt(row, 10)?,
            current_value: dec_opt(row, 11)?,
            unrealized_pnl: dec_opt(row, 12)?,
            platform: row.get(13)?,
            trading_mode: parse_col(14, &mode_raw, TradingMode::parse)?,
            status: parse_col(15, &status_raw, HoldingStatus::parse)?,
            first_acquired_at: ts(row, 16)?,
            closed_at: ts_opt(row, 17)?,
        })
    }

    pub fn find_active(&self, council_id: i64) -> StoreResult<Vec<SpotHolding>> {
        let sql = format!(
            "SELECT {HOLDING_COLUMNS} FROM spot_holdings \
             WHERE council_id = ?1 AND status = 'ACTIVE' ORDER BY symbol ASC"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![council_id], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_all(&self, council_id: i64) -> StoreResult<Vec<SpotHolding>> {
        let sql = format!(
            "SELECT {HOLDING_COLUMNS} FROM spot_holdings \
             WHERE council_id = ?1 ORDER BY symbol ASC"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![council_id], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_by_key(
        &self,
        council_id: i64,
        symbol: &str,
        platform: &str,
        trading_mode: TradingMode,
    ) -> StoreResult<Option<SpotHolding>> {
        let sql = format!(
            "SELECT {HOLDING_COLUMNS} FROM spot_holdings \
             WHERE council_id = ?1 AND symbol = ?2 AND platform = ?3 AND trading_mode = ?4 \
             ORDER BY first_acquired_at DESC LIMIT 1"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt
            .query_row(
                params![council_id, symbol, platform, trading_mode.as_str()],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn insert(&self, h: &SpotHolding) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO spot_holdings \
             (council_id, symbol, base_asset, quote_asset, free, locked, total, average_cost, \
              total_cost, current_price, current_value, unrealized_pnl, platform, trading_mode, \
              status, first_acquired_at, closed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                h.council_id,
                h.symbol,
                h.base_asset,
                h.quote_asset,
                dec_sql(h.free),
                dec_sql(h.locked),
                dec_sql(h.total),
                dec_sql(h.average_cost),
                dec_sql(h.total_cost),
                dec_sql_opt(h.current_price),
                dec_sql_opt(h.current_value),
                dec_sql_opt(h.unrealized_pnl),
                h.platform,
                h.trading_mode.as_str(),
                h.status.as_str(),
                ts_sql(h.first_acquired_at),
                ts_sql_opt(h.closed_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update(&self, h: &SpotHolding) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE spot_holdings SET \
                free = ?2, locked = ?3, total = ?4, average_cost = ?5, total_cost = ?6, \
                current_price = ?7, current_value = ?8, unrealized_pnl = ?9, \
                status = ?10, closed_at = ?11 \
             WHERE id = ?1",
            params![
                h.id,
                dec_sql(h.free),
                dec_sql(h.locked),
                dec_sql(h.total),
                dec_sql(h.average_cost),
                dec_sql(h.total_cost),
                dec_sql_opt(h.current_price),
                dec_sql_opt(h.current_value),
                dec_sql_opt(h.unrealized_pnl),
                h.status.as_str(),
                ts_sql_opt(h.closed_at),
            ],
        )?;
        Ok(())
    }
}

const ORDER_COLUMNS: &str = "id, council_id, symbol, side, order_type, position_side, orig_qty, \
     executed_qty, price, stop_price, avg_price, status, commission, commission_asset, \
     futures_position_id, spot_holding_id, external_order_id, platform, trading_mode, \
     trading_type, created_at";

pub struct OrderRepo<'c> {
    conn: &'c Connection,
}

impl<'c> OrderRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
        let side_raw: String = row.get(3)?;
        let type_raw: String = row.get(4)?;
        let pos_side_raw: Option<String> = row.get(5)?;
        let status_raw: String = row.get(11)?;
        let mode_raw: String = row.get(18)?;
        let ttype_raw: String = row.get(19)?;
        let position_side = match pos_side_raw {
            None => None,
            Some(s) => Some(parse_col(5, &s, PositionSide::parse)?),
        };
        Ok(Order {
            id: row.get(0)?,
            council_id: row.get(1)?,
            symbol: row.get(2)?,
            side: parse_col(3, &side_raw, OrderSide::parse)?,
            order_type: parse_col(4, &type_raw, OrderType::parse)?,
            position_side,
            orig_qty: dec(row, 6)?,
            executed_qty: dec(row, 7)?,
            price: dec_opt(row, 8)?,
            stop_price: dec_opt(row, 9)?,
            avg_price: dec_opt(row, 10)?,
            status: parse_col(11, &status_raw, OrderStatus::parse)?,
            commission: dec_opt(row, 12)?,
            commission_asset: row.get(13)?,
            futures_position_id: row.get(14)?,
            spot_holding_id: row.get(15)?,
            external_order_id: row.get(16)?,
            platform: row.get(17)?,
            trading_mode: parse_col(18, &mode_raw, TradingMode::parse)?,
            trading_type: parse_col(19, &ttype_raw, TradingType::parse)?,
            created_at: ts(row, 20)?,
        })
    }

    pub fn insert(&self, o: &Order) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO orders \
             (council_id, symbol, side, order_type, position_side, orig_qty, executed_qty, \
              price, stop_price, avg_price, status, commission, commission_asset, \
              futures_position_id, spot_holding_id, external_order_id, platform, trading_mode, \
              trading_type, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                     ?17, ?18, ?19, ?20)",
            params![
                o.council_id,
                o.symbol,
                o.side.as_str(),
                o.order_type.as_str(),
                o.position_side.map(|s| s.as_str()),
                dec_sql(o.orig_qty),
                dec_sql(o.executed_qty),
                dec_sql_opt(o.price),
                dec_sql_opt(o.stop_price),
                dec_sql_opt(o.avg_price),
                o.status.as_str(),
                dec_sql_opt(o.commission),
                o.commission_asset,
                o.futures_position_id,
                o.spot_holding_id,
                o.external_order_id,
                o.platform,
                o.trading_mode.as_str(),
                o.trading_type.as_str(),
                ts_sql(o.created_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, council_id: i64, order_id: i64) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE council_id = ?1 AND id = ?2");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt
            .query_row(params![council_id, order_id], Self::from_row)
            .optional()?)
    }

    pub fn list_recent(&self, council_id: i64, limit: usize) -> StoreResult<Vec<Order>> {
        let limit = limit.clamp(1, 1_000) as i64;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE council_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![council_id, limit], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Venue reconciliation path: fills reported after submission.
    pub fn update_fill(
        &self,
        order_id: i64,
        status: OrderStatus,
        executed_qty: rust_decimal::Decimal,
        avg_price: Option<rust_decimal::Decimal>,
    ) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE orders SET status = ?2, executed_qty = ?3, avg_price = ?4 WHERE id = ?1",
            params![
                order_id,
                status.as_str(),
                dec_sql(executed_qty),
                dec_sql_opt(avg_price),
            ],
        )?;
        Ok(())
    }
}
