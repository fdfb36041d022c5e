//! Venue clients: one futures instance and one spot instance per cycle.
//!
//! Paper mode emulates fills at the current mark price with zero commission;
//! real mode signs requests against the configured exchange.

pub mod binance;
pub mod paper;

pub use binance::{BinanceClient, MarketKind};
pub use paper::PaperVenue;

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{OrderSide, OrderStatus, OrderType, PositionSide};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: Decimal,
}

/// One OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub open_time_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VenueOrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub position_side: Option<PositionSide>,
    pub leverage: Option<i64>,
    pub time_in_force: Option<TimeInForce>,
}

#[derive(Debug, Clone)]
pub struct VenueOrderAck {
    pub order_id: String,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub avg_price: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub commission_asset: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VenueBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Account state used for reconciliation.
#[derive(Debug, Clone, Default)]
pub struct VenueAccount {
    pub balances: Vec<VenueBalance>,
}

#[async_trait::async_trait]
pub trait VenueClient: Send + Sync {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn get_klines(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Kline>>;

    async fn place_order(&self, req: &VenueOrderRequest) -> Result<VenueOrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    async fn get_account(&self) -> Result<VenueAccount>;
}
