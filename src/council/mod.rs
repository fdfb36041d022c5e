//! Council execution pipeline: portfolio context, debate/consensus,
//! trading, metrics and the orchestrator.

pub mod debate;
pub mod metrics;
pub mod orchestrator;
pub mod portfolio;
pub mod seed;
pub mod trading;

pub use debate::{determine_consensus, persist_debate_messages, ConsensusOutcome};
pub use metrics::update_all_metrics;
pub use orchestrator::{CycleReport, Orchestrator};
pub use portfolio::{build_portfolio_context, PortfolioContext, PositionContext};
pub use seed::seed_system_councils;
pub use trading::{BatchOutcome, TradeOutcome, TradingExecutor};
