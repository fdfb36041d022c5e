use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading mode: simulated fills vs. live venue submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Real,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Real => "real",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Some(Self::Paper),
            "real" => Some(Self::Real),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingType {
    Futures,
    Spot,
}

impl TradingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingType::Futures => "futures",
            TradingType::Spot => "spot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "futures" => Some(Self::Futures),
            "spot" => Some(Self::Spot),
            _ => None,
        }
    }
}

/// Position side as reported by perpetual venues. `Both` appears only for
/// one-way account mode; readers normalize it from the sign of the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
    Both,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
            PositionSide::Both => "BOTH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            "BOTH" => Some(Self::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginType {
    Isolated,
    Crossed,
}

impl MarginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Isolated => "ISOLATED",
            MarginType::Crossed => "CROSSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ISOLATED" => Some(Self::Isolated),
            "CROSSED" => Some(Self::Crossed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
            PositionStatus::Liquidated => "LIQUIDATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            "LIQUIDATED" => Some(Self::Liquidated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HoldingStatus {
    Active,
    Closed,
}

impl HoldingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldingStatus::Active => "ACTIVE",
            HoldingStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Stop => "STOP",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            "STOP" => Some(Self::Stop),
            "STOP_MARKET" => Some(Self::StopMarket),
            "TAKE_PROFIT" => Some(Self::TakeProfit),
            "TAKE_PROFIT_MARKET" => Some(Self::TakeProfitMarket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(Self::New),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" => Some(Self::Canceled),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Idle,
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "IDLE",
            RunStatus::InProgress => "IN_PROGRESS",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IDLE" => Some(Self::Idle),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Directional consensus decision for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Buy => "BUY",
            Decision::Sell => "SELL",
            Decision::Hold => "HOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            "HOLD" => Some(Self::Hold),
            _ => None,
        }
    }
}

/// Trade direction attached to a signal or decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Long,
    Short,
    None,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Long => "LONG",
            TradeDirection::Short => "SHORT",
            TradeDirection::None => "NONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            "NONE" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" => Some(Self::Bullish),
            "bearish" => Some(Self::Bearish),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }

    pub fn from_direction(direction: TradeDirection) -> Self {
        match direction {
            TradeDirection::Long => Sentiment::Bullish,
            TradeDirection::Short => Sentiment::Bearish,
            TradeDirection::None => Sentiment::Neutral,
        }
    }
}

/// Kind of debate message an agent emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Analysis,
    TechnicalAnalysis,
    SentimentAnalysis,
    PersonaAnalysis,
    RiskAnalysis,
    Consensus,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Analysis => "analysis",
            MessageType::TechnicalAnalysis => "technical_analysis",
            MessageType::SentimentAnalysis => "sentiment_analysis",
            MessageType::PersonaAnalysis => "persona_analysis",
            MessageType::RiskAnalysis => "risk_analysis",
            MessageType::Consensus => "consensus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analysis" => Some(Self::Analysis),
            "technical_analysis" => Some(Self::TechnicalAnalysis),
            "sentiment_analysis" => Some(Self::SentimentAnalysis),
            "persona_analysis" => Some(Self::PersonaAnalysis),
            "risk_analysis" => Some(Self::RiskAnalysis),
            "consensus" => Some(Self::Consensus),
            _ => None,
        }
    }
}

/// Portfolio-level liquidation risk class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
    Unknown,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
            RiskLevel::Unknown => "unknown",
        }
    }
}

/// Agent roster entry in the council configuration blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub agent_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEdge {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    #[serde(default)]
    pub edges: Vec<ConnectionEdge>,
}

/// A council: a configured set of analysis agents with a capital book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Council {
    pub id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub is_system: bool,
    pub is_public: bool,
    pub is_template: bool,
    pub is_active: bool,
    pub agents: AgentsConfig,
    pub connections: ConnectionsConfig,
    pub trading_mode: TradingMode,
    pub trading_type: TradingType,

    // Capital book
    pub initial_capital: Decimal,
    pub available_balance: Decimal,
    pub used_balance: Decimal,
    pub total_account_value: Decimal,
    pub total_margin_used: Decimal,

    // PnL aggregates
    pub total_unrealized_profit: Decimal,
    pub total_realized_pnl: Decimal,
    pub net_pnl: Decimal,
    pub total_fees: Decimal,
    pub total_funding_fees: Decimal,

    // Counts
    pub open_futures_count: i64,
    pub closed_futures_count: i64,
    pub active_spot_holdings: i64,

    // Trading statistics
    pub average_leverage: Decimal,
    pub average_confidence: Decimal,
    pub biggest_win: Decimal,
    pub biggest_loss: Decimal,
    pub long_hold_pct: Decimal,
    pub short_hold_pct: Decimal,
    pub flat_hold_pct: Decimal,

    // Legacy compatibility columns
    pub current_capital: Option<Decimal>,
    pub total_pnl: Option<Decimal>,
    pub total_pnl_percentage: Option<Decimal>,
    pub win_rate: Option<Decimal>,
    pub total_trades: i64,

    pub forked_from_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_executed_at: Option<DateTime<Utc>>,
}

/// Insert payload for a new council; account fields start from
/// `initial_capital` and the metrics engine takes it from there.
#[derive(Debug, Clone)]
pub struct NewCouncil {
    pub user_id: Option<i64>,
    pub name: String,
    pub is_system: bool,
    pub is_public: bool,
    pub is_template: bool,
    pub agents: AgentsConfig,
    pub connections: ConnectionsConfig,
    pub trading_mode: TradingMode,
    pub trading_type: TradingType,
    pub initial_capital: Decimal,
    pub forked_from_id: Option<i64>,
}

/// Venue credentials, at most one per council.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub id: i64,
    pub council_id: i64,
    pub exchange: String,
    pub api_key: String,
    pub secret_key: String,
    pub contract_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Exit plan recorded on a futures position for the venue client to lift
/// into working orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitPlan {
    pub stop_loss_price: Option<Decimal>,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_short: Option<Decimal>,
    pub take_profit_short_order_id: Option<String>,
    pub take_profit_mid: Option<Decimal>,
    pub take_profit_mid_order_id: Option<String>,
    pub take_profit_long: Option<Decimal>,
    pub take_profit_long_order_id: Option<String>,
}

impl ExitPlan {
    pub fn is_empty(&self) -> bool {
        self.stop_loss_price.is_none()
            && self.take_profit_short.is_none()
            && self.take_profit_mid.is_none()
            && self.take_profit_long.is_none()
    }
}

/// Leveraged directional exposure. `position_amt` is stored absolute; the
/// direction lives in `position_side` (`Both` only enters via venue
/// reconciliation in one-way mode). Closed rows preserve their last
/// non-zero amount as history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesPosition {
    pub id: i64,
    pub council_id: i64,
    pub symbol: String,
    pub position_side: PositionSide,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
    pub leverage: i64,
    pub margin_type: MarginType,
    pub isolated_margin: Option<Decimal>,
    pub notional: Option<Decimal>,
    pub unrealized_profit: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub fees_paid: Decimal,
    pub funding_fees: Decimal,
    pub confidence: Option<Decimal>,
    pub agent_reasoning: Option<String>,
    pub platform: String,
    pub trading_mode: TradingMode,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_plan: ExitPlan,
}

/// Unleveraged asset balance with weighted-average cost basis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotHolding {
    pub id: i64,
    pub council_id: i64,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
    pub average_cost: Decimal,
    pub total_cost: Decimal,
    pub current_price: Option<Decimal>,
    pub current_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub platform: String,
    pub trading_mode: TradingMode,
    pub status: HoldingStatus,
    pub first_acquired_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Unified order record for both trading types. Holds weak references to
/// at most one position or holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub council_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub position_side: Option<PositionSide>,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub avg_price: Option<Decimal>,
    pub status: OrderStatus,
    pub commission: Option<Decimal>,
    pub commission_asset: Option<String>,
    pub futures_position_id: Option<i64>,
    pub spot_holding_id: Option<i64>,
    pub external_order_id: Option<String>,
    pub platform: String,
    pub trading_mode: TradingMode,
    pub trading_type: TradingType,
    pub created_at: DateTime<Utc>,
}

/// One orchestrator-invoked cycle of a council.
#[derive(Debug, Clone)]
pub struct CouncilRun {
    pub id: i64,
    pub council_id: i64,
    pub user_id: Option<i64>,
    pub trading_mode: TradingMode,
    pub symbols: Vec<String>,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub run_number: i64,
    pub request_data: Option<serde_json::Value>,
    pub results: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// Sub-phase of a run capturing what the cycle saw and did.
#[derive(Debug, Clone)]
pub struct CouncilRunCycle {
    pub id: i64,
    pub council_run_id: i64,
    pub cycle_number: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub analyst_signals: Option<serde_json::Value>,
    pub trading_decisions: Option<serde_json::Value>,
    pub executed_trades: Option<serde_json::Value>,
    pub portfolio_snapshot: Option<serde_json::Value>,
    pub performance_metrics: Option<serde_json::Value>,
    pub trigger_reason: Option<String>,
    pub llm_calls_count: i64,
    pub api_calls_count: i64,
    pub estimated_cost: Option<String>,
    pub error_message: Option<String>,
}

/// Persisted consensus decision with its vote tally.
#[derive(Debug, Clone)]
pub struct ConsensusDecision {
    pub id: i64,
    pub council_id: i64,
    pub council_run_id: Option<i64>,
    pub council_run_cycle_id: Option<i64>,
    pub symbol: String,
    pub decision: Decision,
    pub confidence: Decimal,
    pub votes_buy: i64,
    pub votes_sell: i64,
    pub votes_hold: i64,
    pub total_votes: i64,
    pub agent_votes: serde_json::Value,
    pub threshold: Decimal,
    pub reasoning: Option<String>,
    pub market_price: Option<Decimal>,
    pub market_conditions: Option<serde_json::Value>,
    pub was_executed: bool,
    pub executed_order_id: Option<i64>,
    pub execution_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only debate stream entry.
#[derive(Debug, Clone)]
pub struct DebateMessage {
    pub id: i64,
    pub council_id: i64,
    pub agent_name: String,
    pub message: String,
    pub message_type: MessageType,
    pub sentiment: Sentiment,
    pub market_symbol: Option<String>,
    pub confidence: Option<Decimal>,
    pub debate_round: i64,
    pub created_at: DateTime<Utc>,
}

/// Time-series point tying a position or holding to a mark.
#[derive(Debug, Clone)]
pub struct PnlSnapshot {
    pub id: i64,
    pub council_id: i64,
    pub futures_position_id: Option<i64>,
    pub spot_holding_id: Option<i64>,
    pub snapshot_time: DateTime<Utc>,
    pub mark_price: Decimal,
    pub notional_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub pnl_percentage: Decimal,
    pub liquidation_distance_pct: Option<Decimal>,
    pub margin_ratio: Option<Decimal>,
}

/// Council-level performance snapshot appended after each metrics pass.
#[derive(Debug, Clone)]
pub struct PerformanceSnapshot {
    pub id: i64,
    pub council_id: i64,
    pub snapshot_time: DateTime<Utc>,
    pub total_value: Decimal,
    pub pnl: Decimal,
    pub pnl_percentage: Decimal,
    pub win_rate: Decimal,
    pub total_trades: i64,
    pub open_positions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips() {
        for s in ["OPEN", "CLOSED", "LIQUIDATED"] {
            assert_eq!(PositionStatus::parse(s).unwrap().as_str(), s);
        }
        for s in ["BUY", "SELL", "HOLD"] {
            assert_eq!(Decision::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(OrderType::parse("take_profit_market"), Some(OrderType::TakeProfitMarket));
        assert_eq!(TradingMode::parse("REAL"), Some(TradingMode::Real));
        assert_eq!(TradingMode::parse("backtest"), None);
    }

    #[test]
    fn sentiment_follows_direction() {
        assert_eq!(Sentiment::from_direction(TradeDirection::Long), Sentiment::Bullish);
        assert_eq!(Sentiment::from_direction(TradeDirection::Short), Sentiment::Bearish);
        assert_eq!(Sentiment::from_direction(TradeDirection::None), Sentiment::Neutral);
    }

    #[test]
    fn agents_config_deserializes_partial_entries() {
        let cfg: AgentsConfig = serde_json::from_str(
            r#"{"agents":[{"agent_key":"satoshi_nakamoto"},{"agent_key":"crypto_technical","role":"technical"}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.agents.len(), 2);
        assert_eq!(cfg.agents[1].role.as_deref(), Some("technical"));
    }
}
