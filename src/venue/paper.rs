//! Simulated venue for paper trading.
//!
//! Fills are immediate at the current mark price with zero commission.
//! Marks come from an optional delegate (the exchange's public endpoints
//! need no credentials) or from a static price table.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use super::{Kline, Ticker, VenueAccount, VenueClient, VenueOrderAck, VenueOrderRequest};
use crate::models::OrderStatus;

pub struct PaperVenue {
    prices: RwLock<HashMap<String, Decimal>>,
    /// Read-only market-data delegate; order flow never reaches it.
    market_data: Option<Arc<dyn VenueClient>>,
}

impl PaperVenue {
    pub fn new(market_data: Option<Arc<dyn VenueClient>>) -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            market_data,
        }
    }

    /// Fully offline venue with pinned marks.
    pub fn with_static_prices(prices: HashMap<String, Decimal>) -> Self {
        Self {
            prices: RwLock::new(prices),
            market_data: None,
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().insert(symbol.to_string(), price);
    }

    async fn mark_price(&self, symbol: &str) -> Result<Decimal> {
        if let Some(feed) = &self.market_data {
            match feed.get_ticker(symbol).await {
                Ok(ticker) => {
                    self.prices.write().insert(symbol.to_string(), ticker.price);
                    return Ok(ticker.price);
                }
                Err(e) => {
                    debug!(symbol, error = %e, "market data delegate failed, using last mark");
                }
            }
        }
        self.prices
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("no mark price available for {symbol}"))
    }
}

#[async_trait::async_trait]
impl VenueClient for PaperVenue {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let price = self.mark_price(symbol).await?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price,
        })
    }

    async fn get_klines(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Kline>> {
        if let Some(feed) = &self.market_data {
            return feed.get_klines(symbol, timeframe, limit).await;
        }
        // flat synthetic bars at the pinned mark
        let price = self.mark_price(symbol).await?;
        Ok((0..limit.min(500))
            .map(|i| Kline {
                open_time_ms: i as i64 * 60_000,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: Decimal::ZERO,
                close_time_ms: (i as i64 + 1) * 60_000 - 1,
            })
            .collect())
    }

    async fn place_order(&self, req: &VenueOrderRequest) -> Result<VenueOrderAck> {
        if req.quantity <= Decimal::ZERO {
            return Err(anyhow!("invalid quantity {}", req.quantity));
        }
        let mark = self.mark_price(&req.symbol).await?;
        let fill_price = req.price.unwrap_or(mark);

        debug!(
            symbol = %req.symbol,
            side = req.side.as_str(),
            quantity = %req.quantity,
            fill_price = %fill_price,
            "paper fill"
        );

        Ok(VenueOrderAck {
            order_id: format!("paper:{}", req.client_order_id),
            status: OrderStatus::Filled,
            executed_qty: req.quantity,
            avg_price: Some(fill_price),
            commission: Some(Decimal::ZERO),
            commission_asset: None,
        })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_account(&self) -> Result<VenueAccount> {
        Ok(VenueAccount::default())
    }
}
