//! Metrics engine: recomputes all derived account metrics on a council.
//!
//! Pure function of store state and the supplied clock instant, so repeated
//! invocation without state change writes identical fields. Each run appends
//! one council performance snapshot plus one PnL snapshot per open exposure.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::db::{CouncilRepo, FuturesPositionRepo, SnapshotRepo, SpotHoldingRepo};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Council, FuturesPosition, HoldingStatus, PerformanceSnapshot, PnlSnapshot, PositionSide,
    PositionStatus, TradingType,
};
use crate::money;

/// Tolerance on the account-value identity check.
const IDENTITY_TOLERANCE: &str = "0.01";

pub fn update_all_metrics(conn: &Connection, council_id: i64, now: DateTime<Utc>) -> EngineResult<()> {
    let councils = CouncilRepo::new(conn);
    let Some(council) = councils.get(council_id)? else {
        warn!(council_id, "council not found for metrics update");
        return Err(EngineError::NotFound {
            entity: "council",
            id: council_id,
        });
    };

    match council.trading_type {
        TradingType::Futures => update_futures_metrics(conn, council, now),
        TradingType::Spot => update_spot_metrics(conn, council, now),
    }
}

fn update_futures_metrics(
    conn: &Connection,
    mut council: Council,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let positions = FuturesPositionRepo::new(conn).find_all(council.id)?;
    let open: Vec<&FuturesPosition> = positions
        .iter()
        .filter(|p| p.status == PositionStatus::Open)
        .collect();
    let closed: Vec<&FuturesPosition> = positions
        .iter()
        .filter(|p| matches!(p.status, PositionStatus::Closed | PositionStatus::Liquidated))
        .collect();

    let zero = Decimal::ZERO;
    let total_unrealized_profit: Decimal = money::usd(
        open.iter().map(|p| p.unrealized_profit.unwrap_or(zero)).sum(),
    );
    let total_realized_pnl: Decimal = money::usd(
        closed.iter().map(|p| p.realized_pnl.unwrap_or(zero)).sum(),
    );
    let total_fees: Decimal = money::usd(positions.iter().map(|p| p.fees_paid).sum());
    let total_funding_fees: Decimal =
        money::usd(positions.iter().map(|p| p.funding_fees).sum());
    let net_pnl = total_realized_pnl - total_fees;
    let total_margin_used: Decimal =
        open.iter().map(|p| p.isolated_margin.unwrap_or(zero)).sum();

    // derived from the rounded parts so the account identity holds exactly
    let total_account_value = money::usd(
        council.initial_capital + total_realized_pnl + total_unrealized_profit - total_fees,
    );
    let available_balance = (total_account_value - total_margin_used).max(zero);

    let leverages: Vec<Decimal> = positions.iter().map(|p| Decimal::from(p.leverage)).collect();
    let confidences: Vec<Decimal> = positions.iter().filter_map(|p| p.confidence).collect();

    let biggest_win = closed
        .iter()
        .map(|p| p.realized_pnl.unwrap_or(zero))
        .max()
        .unwrap_or(zero)
        .max(zero);
    let biggest_loss = closed
        .iter()
        .map(|p| p.realized_pnl.unwrap_or(zero))
        .min()
        .unwrap_or(zero)
        .min(zero);

    let win_rate = if closed.is_empty() {
        zero
    } else {
        let winners = closed
            .iter()
            .filter(|p| p.realized_pnl.unwrap_or(zero) > zero)
            .count();
        money::div_usd(
            Decimal::from(winners) * Decimal::ONE_HUNDRED,
            Decimal::from(closed.len()),
        )?
    };

    let (long_hold_pct, short_hold_pct, flat_hold_pct) = hold_time_split(&positions, now);

    let total_pnl = total_realized_pnl + total_unrealized_profit;
    let total_pnl_percentage = if council.initial_capital > zero {
        money::div_pct(total_pnl * Decimal::ONE_HUNDRED, council.initial_capital)?
    } else {
        zero
    };

    council.total_account_value = total_account_value;
    council.available_balance = money::usd(available_balance);
    council.used_balance = money::usd(total_margin_used);
    council.total_margin_used = money::usd(total_margin_used);
    council.total_unrealized_profit = money::usd(total_unrealized_profit);
    council.total_realized_pnl = money::usd(total_realized_pnl);
    council.net_pnl = money::usd(net_pnl);
    council.total_fees = money::usd(total_fees);
    council.total_funding_fees = money::usd(total_funding_fees);
    council.open_futures_count = open.len() as i64;
    council.closed_futures_count = closed.len() as i64;
    council.average_leverage = money::mean(&leverages, money::USD_SCALE);
    council.average_confidence = money::mean(&confidences, money::PCT_SCALE);
    council.biggest_win = money::usd(biggest_win);
    council.biggest_loss = money::usd(biggest_loss);
    council.long_hold_pct = long_hold_pct;
    council.short_hold_pct = short_hold_pct;
    council.flat_hold_pct = flat_hold_pct;

    // legacy mirror columns
    council.current_capital = Some(total_account_value);
    council.total_pnl = Some(money::usd(total_pnl));
    council.total_pnl_percentage = Some(total_pnl_percentage);
    council.win_rate = Some(win_rate);
    council.total_trades = closed.len() as i64;

    verify_account_identity(&council)?;

    CouncilRepo::new(conn).update_metrics(&council)?;

    let snapshots = SnapshotRepo::new(conn);
    for p in &open {
        let mark = p.mark_price.unwrap_or(p.entry_price);
        let notional = p.notional.unwrap_or(zero);
        let unrealized = p.unrealized_profit.unwrap_or(zero);
        let margin = p.isolated_margin.unwrap_or(zero);
        let pnl_percentage = if margin > zero {
            money::div_pct(unrealized * Decimal::ONE_HUNDRED, margin)?
        } else {
            zero
        };
        let liquidation_distance_pct = p.liquidation_price.and_then(|liq| {
            if mark <= zero {
                return None;
            }
            let distance = match p.position_side {
                PositionSide::Short => liq - mark,
                _ => mark - liq,
            };
            money::div_pct(distance * Decimal::ONE_HUNDRED, mark).ok()
        });
        let margin_ratio = if notional > zero {
            money::div_pct(margin, notional).ok()
        } else {
            None
        };
        snapshots.insert_pnl(&PnlSnapshot {
            id: 0,
            council_id: council.id,
            futures_position_id: Some(p.id),
            spot_holding_id: None,
            snapshot_time: now,
            mark_price: mark,
            notional_value: notional,
            unrealized_pnl: unrealized,
            pnl_percentage,
            liquidation_distance_pct,
            margin_ratio,
        })?;
    }

    snapshots.insert_performance(&PerformanceSnapshot {
        id: 0,
        council_id: council.id,
        snapshot_time: now,
        total_value: council.total_account_value,
        pnl: council.total_pnl.unwrap_or(zero),
        pnl_percentage: council.total_pnl_percentage.unwrap_or(zero),
        win_rate,
        total_trades: council.total_trades,
        open_positions: council.open_futures_count,
    })?;

    info!(
        council_id = council.id,
        account_value = %council.total_account_value,
        unrealized_profit = %council.total_unrealized_profit,
        realized_pnl = %council.total_realized_pnl,
        open_positions = council.open_futures_count,
        "futures metrics updated"
    );
    Ok(())
}

fn update_spot_metrics(
    conn: &Connection,
    mut council: Council,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let holdings = SpotHoldingRepo::new(conn).find_all(council.id)?;
    let active: Vec<_> = holdings
        .iter()
        .filter(|h| h.status == HoldingStatus::Active)
        .collect();

    let zero = Decimal::ZERO;
    let total_unrealized_pnl: Decimal =
        active.iter().map(|h| h.unrealized_pnl.unwrap_or(zero)).sum();
    let total_invested: Decimal = active.iter().map(|h| h.total_cost).sum();
    let total_account_value = money::usd(council.initial_capital + total_unrealized_pnl);
    let available_balance = money::usd(council.initial_capital - total_invested);

    let total_pnl_percentage = if council.initial_capital > zero {
        money::div_pct(
            total_unrealized_pnl * Decimal::ONE_HUNDRED,
            council.initial_capital,
        )?
    } else {
        zero
    };

    council.total_account_value = total_account_value;
    council.available_balance = available_balance;
    council.total_unrealized_profit = money::usd(total_unrealized_pnl);
    council.active_spot_holdings = active.len() as i64;

    // legacy mirror columns
    council.current_capital = Some(total_account_value);
    council.total_pnl = Some(money::usd(total_unrealized_pnl));
    council.total_pnl_percentage = Some(total_pnl_percentage);

    CouncilRepo::new(conn).update_metrics(&council)?;

    let snapshots = SnapshotRepo::new(conn);
    for h in &active {
        let Some(price) = h.current_price else {
            continue;
        };
        let value = h.current_value.unwrap_or(zero);
        let unrealized = h.unrealized_pnl.unwrap_or(zero);
        let pnl_percentage = if h.total_cost > zero {
            money::div_pct(unrealized * Decimal::ONE_HUNDRED, h.total_cost)?
        } else {
            zero
        };
        snapshots.insert_pnl(&PnlSnapshot {
            id: 0,
            council_id: council.id,
            futures_position_id: None,
            spot_holding_id: Some(h.id),
            snapshot_time: now,
            mark_price: price,
            notional_value: value,
            unrealized_pnl: unrealized,
            pnl_percentage,
            liquidation_distance_pct: None,
            margin_ratio: None,
        })?;
    }

    snapshots.insert_performance(&PerformanceSnapshot {
        id: 0,
        council_id: council.id,
        snapshot_time: now,
        total_value: council.total_account_value,
        pnl: council.total_pnl.unwrap_or(zero),
        pnl_percentage: council.total_pnl_percentage.unwrap_or(zero),
        win_rate: council.win_rate.unwrap_or(zero),
        total_trades: council.total_trades,
        open_positions: council.active_spot_holdings,
    })?;

    info!(
        council_id = council.id,
        account_value = %council.total_account_value,
        unrealized_pnl = %council.total_unrealized_profit,
        active_holdings = council.active_spot_holdings,
        "spot metrics updated"
    );
    Ok(())
}

/// Time-in-market split. Overlapping exposure can push long+short beyond
/// the horizon; the split is renormalized so the three parts always sum to
/// 100.
fn hold_time_split(positions: &[FuturesPosition], now: DateTime<Utc>) -> (Decimal, Decimal, Decimal) {
    let zero = Decimal::ZERO;
    let hundred = Decimal::ONE_HUNDRED;
    if positions.is_empty() {
        return (zero, zero, hundred);
    }

    let first_opened = positions.iter().map(|p| p.opened_at).min().unwrap_or(now);
    let horizon = (now - first_opened).num_seconds().max(0);
    if horizon == 0 {
        return (zero, zero, hundred);
    }

    let mut long_secs = 0i64;
    let mut short_secs = 0i64;
    for p in positions {
        let end = p.closed_at.unwrap_or(now);
        let duration = (end - p.opened_at).num_seconds().max(0);
        match p.position_side {
            PositionSide::Long => long_secs += duration,
            PositionSide::Short => short_secs += duration,
            PositionSide::Both => {
                if p.position_amt >= zero {
                    long_secs += duration;
                } else {
                    short_secs += duration;
                }
            }
        }
    }

    let horizon_dec = Decimal::from(horizon);
    let mut long_pct = money::div_usd(Decimal::from(long_secs) * hundred, horizon_dec)
        .unwrap_or(zero);
    let mut short_pct = money::div_usd(Decimal::from(short_secs) * hundred, horizon_dec)
        .unwrap_or(zero);

    let combined = long_pct + short_pct;
    if combined > hundred && combined > zero {
        long_pct = money::div_usd(long_pct * hundred, combined).unwrap_or(zero);
        short_pct = money::usd(hundred - long_pct);
    }
    let flat_pct = money::usd((hundred - long_pct - short_pct).max(zero));
    (long_pct, short_pct, flat_pct)
}

/// Divergence here means corrupt rows, not a math bug downstream.
fn verify_account_identity(council: &Council) -> EngineResult<()> {
    let expected = council.initial_capital + council.total_realized_pnl
        + council.total_unrealized_profit
        - council.total_fees;
    let tolerance: Decimal = IDENTITY_TOLERANCE.parse().unwrap_or(Decimal::ZERO);
    if (council.total_account_value - expected).abs() > tolerance {
        return Err(EngineError::Fatal(format!(
            "account value identity diverged for council {}: {} vs {}",
            council.id, council.total_account_value, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SpotHoldingRepo};
    use crate::models::{
        AgentsConfig, ConnectionsConfig, ExitPlan, MarginType, NewCouncil, SpotHolding,
        TradingMode,
    };
    use chrono::Duration as ChronoDuration;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn council(db: &Database, trading_type: TradingType) -> i64 {
        let conn = db.session().await;
        CouncilRepo::new(&conn)
            .insert(&NewCouncil {
                user_id: None,
                name: format!("metrics-{}", trading_type.as_str()),
                is_system: true,
                is_public: false,
                is_template: false,
                agents: AgentsConfig::default(),
                connections: ConnectionsConfig::default(),
                trading_mode: TradingMode::Paper,
                trading_type,
                initial_capital: Decimal::from(10_000),
                forked_from_id: None,
            })
            .unwrap()
    }

    fn position(
        council_id: i64,
        side: PositionSide,
        status: PositionStatus,
        opened_at: DateTime<Utc>,
        closed_at: Option<DateTime<Utc>>,
    ) -> FuturesPosition {
        FuturesPosition {
            id: 0,
            council_id,
            symbol: "BTCUSDT".to_string(),
            position_side: side,
            position_amt: d("0.5"),
            entry_price: d("50000"),
            mark_price: Some(d("50000")),
            liquidation_price: None,
            leverage: 10,
            margin_type: MarginType::Isolated,
            isolated_margin: None,
            notional: None,
            unrealized_profit: None,
            realized_pnl: None,
            fees_paid: Decimal::ZERO,
            funding_fees: Decimal::ZERO,
            confidence: None,
            agent_reasoning: None,
            platform: "binance".to_string(),
            trading_mode: TradingMode::Paper,
            status,
            opened_at,
            closed_at,
            exit_plan: ExitPlan::default(),
        }
    }

    #[tokio::test]
    async fn futures_metrics_match_the_worked_example() {
        let db = Database::open_in_memory().unwrap();
        let cid = council(&db, TradingType::Futures).await;
        let now = Utc::now();
        {
            let conn = db.session().await;
            let repo = FuturesPositionRepo::new(&conn);

            // closed LONG: realized +250, fees 5
            let mut closed = position(
                cid,
                PositionSide::Long,
                PositionStatus::Closed,
                now - ChronoDuration::hours(10),
                Some(now - ChronoDuration::hours(2)),
            );
            closed.realized_pnl = Some(d("250.00"));
            closed.fees_paid = d("5.00");
            repo.insert(&closed).unwrap();

            // open SHORT: unrealized -40, margin 200
            let mut open = position(
                cid,
                PositionSide::Short,
                PositionStatus::Open,
                now - ChronoDuration::hours(4),
                None,
            );
            open.unrealized_profit = Some(d("-40.00"));
            open.isolated_margin = Some(d("200.00"));
            open.confidence = Some(d("0.7"));
            repo.insert(&open).unwrap();

            update_all_metrics(&conn, cid, now).unwrap();
        }

        let conn = db.session().await;
        let c = CouncilRepo::new(&conn).get(cid).unwrap().unwrap();
        assert_eq!(c.total_account_value, d("10205.00"));
        assert_eq!(c.used_balance, d("200.00"));
        assert_eq!(c.available_balance, d("10005.00"));
        assert_eq!(c.win_rate, Some(d("100.00")));
        assert_eq!(c.biggest_win, d("250.00"));
        assert_eq!(c.biggest_loss, d("0.00"));
        assert_eq!(c.open_futures_count, 1);
        assert_eq!(c.closed_futures_count, 1);
        assert_eq!(c.net_pnl, d("245.00"));
        // identity holds within tolerance
        assert!(
            (c.total_account_value
                - (c.initial_capital + c.total_realized_pnl + c.total_unrealized_profit
                    - c.total_fees))
                .abs()
                < d("0.01")
        );
        // hold percentages sum to 100
        assert!(
            (c.long_hold_pct + c.short_hold_pct + c.flat_hold_pct - Decimal::ONE_HUNDRED).abs()
                <= d("0.01")
        );
    }

    #[tokio::test]
    async fn metrics_are_idempotent_at_a_fixed_instant() {
        let db = Database::open_in_memory().unwrap();
        let cid = council(&db, TradingType::Futures).await;
        let now = Utc::now();
        let conn = db.session().await;
        let repo = FuturesPositionRepo::new(&conn);
        let mut open = position(
            cid,
            PositionSide::Long,
            PositionStatus::Open,
            now - ChronoDuration::hours(1),
            None,
        );
        open.unrealized_profit = Some(d("75.00"));
        open.isolated_margin = Some(d("500.00"));
        repo.insert(&open).unwrap();

        update_all_metrics(&conn, cid, now).unwrap();
        let first = CouncilRepo::new(&conn).get(cid).unwrap().unwrap();
        update_all_metrics(&conn, cid, now).unwrap();
        let second = CouncilRepo::new(&conn).get(cid).unwrap().unwrap();

        assert_eq!(first.total_account_value, second.total_account_value);
        assert_eq!(first.available_balance, second.available_balance);
        assert_eq!(first.long_hold_pct, second.long_hold_pct);
        assert_eq!(first.flat_hold_pct, second.flat_hold_pct);

        let history = SnapshotRepo::new(&conn).performance_history(cid, 100).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn empty_portfolio_is_flat_and_zero() {
        let db = Database::open_in_memory().unwrap();
        let cid = council(&db, TradingType::Futures).await;
        let conn = db.session().await;
        update_all_metrics(&conn, cid, Utc::now()).unwrap();
        let c = CouncilRepo::new(&conn).get(cid).unwrap().unwrap();
        assert_eq!(c.average_leverage, Decimal::ZERO);
        assert_eq!(c.average_confidence, Decimal::ZERO);
        assert_eq!(c.win_rate, Some(Decimal::ZERO));
        assert_eq!(c.flat_hold_pct, Decimal::ONE_HUNDRED);
        assert_eq!(c.total_account_value, d("10000.00"));
    }

    #[tokio::test]
    async fn spot_metrics_track_invested_capital() {
        let db = Database::open_in_memory().unwrap();
        let cid = council(&db, TradingType::Spot).await;
        let conn = db.session().await;
        SpotHoldingRepo::new(&conn)
            .insert(&SpotHolding {
                id: 0,
                council_id: cid,
                symbol: "BTCUSDT".to_string(),
                base_asset: "BTC".to_string(),
                quote_asset: "USDT".to_string(),
                free: d("0.032"),
                locked: Decimal::ZERO,
                total: d("0.032"),
                average_cost: d("50000"),
                total_cost: d("1600.00"),
                current_price: Some(d("52000")),
                current_value: Some(d("1664.00")),
                unrealized_pnl: Some(d("64.00")),
                platform: "binance".to_string(),
                trading_mode: TradingMode::Paper,
                status: HoldingStatus::Active,
                first_acquired_at: Utc::now(),
                closed_at: None,
            })
            .unwrap();

        update_all_metrics(&conn, cid, Utc::now()).unwrap();
        let c = CouncilRepo::new(&conn).get(cid).unwrap().unwrap();
        assert_eq!(c.total_account_value, d("10064.00"));
        assert_eq!(c.available_balance, d("8400.00"));
        assert_eq!(c.active_spot_holdings, 1);
        assert_eq!(c.total_pnl, Some(d("64.00")));
    }
}
