//! Typed agent signals and normalization of raw model output.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::agents::registry::AgentSpec;
use crate::models::{MessageType, Sentiment, TradeDirection};
use crate::money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
        }
    }
}

/// Response schema requested from the model. Agents are inconsistent about
/// which field carries the verdict, so all three aliases are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAgentOutput {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub confidence: Option<serde_json::Number>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub leverage: Option<serde_json::Number>,
    #[serde(default)]
    pub suggested_leverage: Option<serde_json::Number>,
    #[serde(default)]
    pub stop_loss: Option<serde_json::Number>,
    #[serde(default)]
    pub entry_price: Option<serde_json::Number>,
    #[serde(default)]
    pub take_profits: Option<Vec<serde_json::Number>>,
    #[serde(default)]
    pub position_size: Option<serde_json::Number>,
}

/// Normalized per-(agent, symbol) signal consumed by the consensus engine.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSignal {
    pub agent_key: String,
    pub display_name: String,
    pub symbol: String,
    pub action: SignalAction,
    pub direction: TradeDirection,
    pub sentiment: Sentiment,
    /// 0–1 at percentage scale.
    pub confidence: Decimal,
    pub reasoning: String,
    pub message_type: MessageType,
    pub leverage: Option<i64>,
    pub stop_loss: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub take_profits: Vec<Decimal>,
    pub position_size: Option<Decimal>,
    /// True when the signal stands in for a failed or timed-out invocation.
    pub is_fallback: bool,
}

impl AgentSignal {
    /// Normalize a raw model reply.
    pub fn from_raw(spec: &AgentSpec, symbol: &str, raw: &RawAgentOutput) -> Self {
        let verdict = raw
            .action
            .as_deref()
            .or(raw.signal.as_deref())
            .or(raw.recommendation.as_deref())
            .unwrap_or("hold")
            .trim()
            .to_ascii_uppercase();

        let (action, mapped_direction) = match verdict.as_str() {
            "BUY" | "STRONG_BUY" | "LONG" => (SignalAction::Buy, TradeDirection::Long),
            "SELL" | "STRONG_SELL" | "SHORT" => (SignalAction::Sell, TradeDirection::Short),
            _ => (SignalAction::Hold, TradeDirection::None),
        };

        let direction = raw
            .direction
            .as_deref()
            .and_then(TradeDirection::parse)
            .filter(|d| *d != TradeDirection::None)
            .unwrap_or(mapped_direction);

        let confidence = raw
            .confidence
            .as_ref()
            .and_then(money::from_json_number)
            .map(normalize_confidence)
            .unwrap_or_else(|| Decimal::new(5, 1));

        let reasoning = raw
            .reasoning
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("Analysis performed for {symbol}"));

        let dec_field = |n: &Option<serde_json::Number>| {
            n.as_ref().and_then(money::from_json_number).map(money::qty)
        };

        let leverage = raw
            .leverage
            .as_ref()
            .or(raw.suggested_leverage.as_ref())
            .and_then(|n| n.as_i64())
            .filter(|l| *l >= 1);

        Self {
            agent_key: spec.key.to_string(),
            display_name: spec.display_name.to_string(),
            symbol: symbol.to_string(),
            action,
            direction,
            sentiment: Sentiment::from_direction(direction),
            confidence,
            reasoning,
            message_type: spec.role.message_type(),
            leverage,
            stop_loss: dec_field(&raw.stop_loss),
            entry_price: dec_field(&raw.entry_price),
            take_profits: raw
                .take_profits
                .as_deref()
                .unwrap_or_default()
                .iter()
                .filter_map(money::from_json_number)
                .map(money::qty)
                .take(3)
                .collect(),
            position_size: dec_field(&raw.position_size),
            is_fallback: false,
        }
    }

    /// Stand-in for a failed (agent, symbol) invocation; never aborts the
    /// cycle and never votes directionally.
    pub fn fallback(spec: &AgentSpec, symbol: &str, error: &str) -> Self {
        Self {
            agent_key: spec.key.to_string(),
            display_name: spec.display_name.to_string(),
            symbol: symbol.to_string(),
            action: SignalAction::Hold,
            direction: TradeDirection::None,
            sentiment: Sentiment::Neutral,
            confidence: Decimal::ZERO,
            reasoning: format!("agent invocation failed: {error}"),
            message_type: spec.role.message_type(),
            leverage: None,
            stop_loss: None,
            entry_price: None,
            take_profits: Vec::new(),
            position_size: None,
            is_fallback: true,
        }
    }

    /// Vote used by the consensus engine: direction first, action fallback.
    pub fn vote(&self) -> TradeDirection {
        if self.direction != TradeDirection::None {
            return self.direction;
        }
        match self.action {
            SignalAction::Buy => TradeDirection::Long,
            SignalAction::Sell => TradeDirection::Short,
            SignalAction::Hold => TradeDirection::None,
        }
    }
}

/// Models answer with either 0–1 or 0–100; rescale and clamp to [0, 1].
fn normalize_confidence(raw: Decimal) -> Decimal {
    let scaled = if raw > Decimal::ONE {
        raw.checked_div(Decimal::ONE_HUNDRED).unwrap_or(Decimal::ONE)
    } else {
        raw
    };
    money::pct(scaled.clamp(Decimal::ZERO, Decimal::ONE))
}
