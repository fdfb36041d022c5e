//! Binance REST client with HMAC-SHA256 signed requests.
//!
//! One struct serves both the spot API (`/api/v3`) and the USDⓈ-M futures
//! API (`/fapi/v1`); `MarketKind` selects the path family. The secret key is
//! used exclusively for signing and never logged. Signed requests carry
//! X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate minor
//! clock drift.

use anyhow::{anyhow, Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::{
    Kline, Ticker, TimeInForce, VenueAccount, VenueBalance, VenueClient, VenueOrderAck,
    VenueOrderRequest,
};
use crate::models::{OrderStatus, OrderType};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketKind {
    Spot,
    Futures,
}

#[derive(Clone)]
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    market: MarketKind,
    client: reqwest::Client,
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("market", &self.market)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl BinanceClient {
    pub fn new(
        market: MarketKind,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret: secret.into(),
            base_url: base_url.into(),
            market,
            client,
        }
    }

    fn path(&self, endpoint: &str) -> String {
        match self.market {
            MarketKind::Spot => format!("{}/api/v3/{endpoint}", self.base_url),
            MarketKind::Futures => format!("{}/fapi/v1/{endpoint}", self.base_url),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<serde_json::Value> {
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {what} response"))?;
        if !status.is_success() {
            return Err(anyhow!("binance {what} returned {status}: {body}"));
        }
        Ok(body)
    }
}

fn dec_str(v: &serde_json::Value) -> Option<Decimal> {
    v.as_str().and_then(|s| s.parse().ok())
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    symbol: String,
    price: String,
}

#[async_trait::async_trait]
impl VenueClient for BinanceClient {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let url = format!("{}?symbol={symbol}", self.path("ticker/price"));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("ticker request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("binance ticker returned {status}: {body}"));
        }
        let parsed: TickerResponse = resp.json().await.context("ticker parse")?;
        let price: Decimal = parsed
            .price
            .parse()
            .with_context(|| format!("bad ticker price '{}'", parsed.price))?;
        Ok(Ticker {
            symbol: parsed.symbol,
            price,
        })
    }

    async fn get_klines(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Kline>> {
        let limit = limit.clamp(1, 1_000);
        let url = format!(
            "{}?symbol={symbol}&interval={timeframe}&limit={limit}",
            self.path("klines")
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("klines request failed")?;
        let body = Self::check(resp, "klines").await?;
        let rows = body.as_array().context("klines response not an array")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let cells = row.as_array().context("kline row not an array")?;
            if cells.len() < 7 {
                continue;
            }
            let bar = Kline {
                open_time_ms: cells[0].as_i64().unwrap_or_default(),
                open: dec_str(&cells[1]).context("kline open")?,
                high: dec_str(&cells[2]).context("kline high")?,
                low: dec_str(&cells[3]).context("kline low")?,
                close: dec_str(&cells[4]).context("kline close")?,
                volume: dec_str(&cells[5]).context("kline volume")?,
                close_time_ms: cells[6].as_i64().unwrap_or_default(),
            };
            out.push(bar);
        }
        Ok(out)
    }

    async fn place_order(&self, req: &VenueOrderRequest) -> Result<VenueOrderAck> {
        let mut params = format!(
            "symbol={}&side={}&type={}&quantity={}",
            req.symbol,
            req.side.as_str(),
            req.order_type.as_str(),
            req.quantity
        );
        if let Some(p) = req.price {
            params.push_str(&format!("&price={p}"));
        }
        if let Some(sp) = req.stop_price {
            params.push_str(&format!("&stopPrice={sp}"));
        }
        if self.market == MarketKind::Futures {
            if let Some(ps) = req.position_side {
                params.push_str(&format!("&positionSide={}", ps.as_str()));
            }
        }
        let tif = match (req.time_in_force, req.order_type) {
            (Some(t), _) => Some(t),
            (None, OrderType::Limit) => Some(TimeInForce::Gtc),
            _ => None,
        };
        if let Some(t) = tif {
            params.push_str(&format!("&timeInForce={}", t.as_str()));
        }
        params.push_str(&format!("&newClientOrderId={}", req.client_order_id));
        params.push_str("&newOrderRespType=RESULT");

        let qs = self.signed_query(&params);
        let url = format!("{}?{}", self.path("order"), qs);

        debug!(
            symbol = %req.symbol,
            side = req.side.as_str(),
            order_type = req.order_type.as_str(),
            quantity = %req.quantity,
            "placing order"
        );

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("order request failed")?;
        let body = Self::check(resp, "order").await?;

        let order_id = body["orderId"]
            .as_i64()
            .map(|v| v.to_string())
            .or_else(|| body["orderId"].as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| req.client_order_id.clone());
        let status = body["status"]
            .as_str()
            .and_then(OrderStatus::parse)
            .unwrap_or(OrderStatus::New);
        let executed_qty = dec_str(&body["executedQty"]).unwrap_or(Decimal::ZERO);
        let avg_price = dec_str(&body["avgPrice"]).filter(|p| !p.is_zero()).or_else(|| {
            // spot RESULT responses carry cumulative quote volume instead
            let quote = dec_str(&body["cummulativeQuoteQty"])?;
            if executed_qty.is_zero() {
                return None;
            }
            quote.checked_div(executed_qty)
        });

        // spot FULL responses report commission per fill
        let mut commission: Option<Decimal> = None;
        let mut commission_asset: Option<String> = None;
        if let Some(fills) = body["fills"].as_array() {
            let mut total = Decimal::ZERO;
            for fill in fills {
                if let Some(c) = dec_str(&fill["commission"]) {
                    total += c;
                }
                if commission_asset.is_none() {
                    commission_asset = fill["commissionAsset"].as_str().map(|s| s.to_string());
                }
            }
            if !fills.is_empty() {
                commission = Some(total);
            }
        }

        if status == OrderStatus::Rejected {
            warn!(symbol = %req.symbol, order_id = %order_id, "order rejected by venue");
        }

        Ok(VenueOrderAck {
            order_id,
            status,
            executed_qty,
            avg_price,
            commission,
            commission_asset,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let qs = self.signed_query(&params);
        let url = format!("{}?{}", self.path("order"), qs);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .context("cancel request failed")?;
        Self::check(resp, "cancel").await?;
        Ok(())
    }

    async fn get_account(&self) -> Result<VenueAccount> {
        let qs = self.signed_query("");
        let url = match self.market {
            MarketKind::Spot => format!("{}/api/v3/account?{}", self.base_url, qs),
            MarketKind::Futures => format!("{}/fapi/v2/account?{}", self.base_url, qs),
        };
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("account request failed")?;
        let body = Self::check(resp, "account").await?;

        let key = match self.market {
            MarketKind::Spot => "balances",
            MarketKind::Futures => "assets",
        };
        let mut balances = Vec::new();
        if let Some(rows) = body[key].as_array() {
            for row in rows {
                let asset = row["asset"].as_str().unwrap_or_default().to_string();
                let free = dec_str(&row["free"])
                    .or_else(|| dec_str(&row["availableBalance"]))
                    .unwrap_or(Decimal::ZERO);
                let locked = dec_str(&row["locked"]).unwrap_or(Decimal::ZERO);
                if asset.is_empty() {
                    continue;
                }
                balances.push(VenueBalance {
                    asset,
                    free,
                    locked,
                });
            }
        }
        Ok(VenueAccount { balances })
    }
}
