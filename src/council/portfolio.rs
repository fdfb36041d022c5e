//! Portfolio context builder.
//!
//! Normalizes open positions into the snapshot agents reason over. The
//! snapshot is advisory input; on any read failure a minimal context is
//! returned instead of failing the cycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::db::FuturesPositionRepo;
use crate::models::{Council, FuturesPosition, PositionSide, RiskLevel};
use crate::money;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionContext {
    /// LONG or SHORT; BOTH is resolved from the amount sign before it gets
    /// here.
    pub side: PositionSide,
    /// Absolute quantity.
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: i64,
    pub notional: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub margin_used: Decimal,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioContext {
    pub council_id: i64,
    pub initial_capital: Decimal,
    pub available_balance: Decimal,
    pub total_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub positions: BTreeMap<String, PositionContext>,
    pub total_positions: usize,
    pub total_notional: Decimal,
    pub margin_usage_ratio: Decimal,
    pub liquidation_risk: RiskLevel,
}

impl PortfolioContext {
    /// Fallback when position reads fail: balances from the council row,
    /// no positions, risk unknown.
    pub fn minimal(council_id: i64, initial_capital: Decimal, available_balance: Decimal) -> Self {
        Self {
            council_id,
            initial_capital,
            available_balance,
            total_value: available_balance,
            unrealized_pnl: Decimal::ZERO,
            positions: BTreeMap::new(),
            total_positions: 0,
            total_notional: Decimal::ZERO,
            margin_usage_ratio: Decimal::ZERO,
            liquidation_risk: RiskLevel::Unknown,
        }
    }

    /// Float rendition for outbound payloads and prompts. Everything that
    /// persists keeps using the decimal fields.
    pub fn broadcast_payload(&self) -> serde_json::Value {
        let positions: serde_json::Map<String, serde_json::Value> = self
            .positions
            .iter()
            .map(|(symbol, p)| {
                (
                    symbol.clone(),
                    serde_json::json!({
                        "side": p.side.as_str(),
                        "position_amt": money::to_broadcast_f64(p.position_amt),
                        "entry_price": money::to_broadcast_f64(p.entry_price),
                        "current_price": money::to_broadcast_f64(p.current_price),
                        "mark_price": money::to_broadcast_f64(p.mark_price),
                        "unrealized_pnl": money::to_broadcast_f64(p.unrealized_pnl),
                        "leverage": p.leverage,
                        "notional": money::to_broadcast_f64(p.notional),
                        "liquidation_price": p.liquidation_price.map(money::to_broadcast_f64),
                        "margin_used": money::to_broadcast_f64(p.margin_used),
                        "opened_at": p.opened_at.map(|t| t.to_rfc3339()),
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "council_id": self.council_id,
            "initial_capital": money::to_broadcast_f64(self.initial_capital),
            "available_balance": money::to_broadcast_f64(self.available_balance),
            "total_value": money::to_broadcast_f64(self.total_value),
            "unrealized_pnl": money::to_broadcast_f64(self.unrealized_pnl),
            "positions": positions,
            "total_positions": self.total_positions,
            "total_notional": money::to_broadcast_f64(self.total_notional),
            "margin_usage_ratio": money::to_broadcast_f64(self.margin_usage_ratio),
            "liquidation_risk": self.liquidation_risk.as_str(),
        })
    }
}

/// Build the agent-facing snapshot for a council.
pub fn build_portfolio_context(
    conn: &Connection,
    council: &Council,
    _symbols: &[String],
) -> PortfolioContext {
    let repo = FuturesPositionRepo::new(conn);
    let open_positions = match repo.find_open(council.id, None) {
        Ok(positions) => positions,
        Err(e) => {
            error!(council_id = council.id, error = %e, "portfolio context read failed");
            return PortfolioContext::minimal(
                council.id,
                council.initial_capital,
                effective_balance(council),
            );
        }
    };

    let mut positions: BTreeMap<String, PositionContext> = BTreeMap::new();
    let mut total_notional = Decimal::ZERO;
    let mut total_unrealized = Decimal::ZERO;
    let mut total_margin_used = Decimal::ZERO;

    for pos in &open_positions {
        let Some((side, amt_abs)) = normalize_side(pos) else {
            continue;
        };
        let notional = money::usd(amt_abs * pos.entry_price * Decimal::from(pos.leverage));
        let margin_used = if pos.leverage > 0 {
            money::div_usd(notional, Decimal::from(pos.leverage)).unwrap_or(notional)
        } else {
            notional
        };
        let mark = pos.mark_price.unwrap_or(pos.entry_price);
        let unrealized = pos.unrealized_profit.unwrap_or(Decimal::ZERO);

        positions.insert(
            pos.symbol.clone(),
            PositionContext {
                side,
                position_amt: amt_abs,
                entry_price: pos.entry_price,
                current_price: mark,
                mark_price: mark,
                unrealized_pnl: unrealized,
                leverage: pos.leverage,
                notional,
                liquidation_price: pos.liquidation_price,
                margin_used,
                opened_at: Some(pos.opened_at),
            },
        );

        total_notional += notional;
        total_unrealized += unrealized;
        total_margin_used += margin_used;
    }

    let available_balance = effective_balance(council);
    let total_value = available_balance + total_unrealized;
    let margin_usage_ratio = if available_balance > Decimal::ZERO {
        money::div_pct(total_margin_used, available_balance).unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };
    let liquidation_risk = assess_liquidation_risk(&positions);

    let context = PortfolioContext {
        council_id: council.id,
        initial_capital: council.initial_capital,
        available_balance,
        total_value,
        unrealized_pnl: total_unrealized,
        total_positions: positions.len(),
        positions,
        total_notional,
        margin_usage_ratio,
        liquidation_risk,
    };

    info!(
        council_id = council.id,
        total_positions = context.total_positions,
        total_value = %context.total_value,
        liquidation_risk = context.liquidation_risk.as_str(),
        "portfolio context built"
    );

    context
}

fn effective_balance(council: &Council) -> Decimal {
    if council.available_balance > Decimal::ZERO {
        council.available_balance
    } else {
        council.initial_capital
    }
}

/// One-way mode stores BOTH with a signed amount; resolve the side from the
/// sign and drop flat positions.
fn normalize_side(pos: &FuturesPosition) -> Option<(PositionSide, Decimal)> {
    if pos.position_amt.is_zero() {
        return None;
    }
    let side = match pos.position_side {
        PositionSide::Both => {
            if pos.position_amt > Decimal::ZERO {
                PositionSide::Long
            } else {
                PositionSide::Short
            }
        }
        other => other,
    };
    Some((side, pos.position_amt.abs()))
}

fn assess_liquidation_risk(positions: &BTreeMap<String, PositionContext>) -> RiskLevel {
    let mut worst = RiskLevel::Low;
    for pos in positions.values() {
        let Some(liquidation) = pos.liquidation_price else {
            continue;
        };
        if pos.current_price <= Decimal::ZERO {
            continue;
        }
        let distance = match pos.side {
            PositionSide::Short => liquidation - pos.current_price,
            _ => pos.current_price - liquidation,
        };
        let distance_pct = money::div_pct(distance * Decimal::ONE_HUNDRED, pos.current_price)
            .unwrap_or(Decimal::ZERO);

        let level = if distance_pct < Decimal::from(5) {
            RiskLevel::Critical
        } else if distance_pct < Decimal::from(10) {
            RiskLevel::High
        } else if distance_pct < Decimal::from(20) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        if level > worst && level != RiskLevel::Unknown {
            worst = level;
        }
    }
    worst
}
