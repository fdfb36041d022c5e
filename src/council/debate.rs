//! Debate persistence and the consensus engine.
//!
//! Reduces the per-(symbol, agent) signal matrix to one directional
//! decision per symbol, persisting the decision row and a "System" debate
//! message with the vote tally.

use std::collections::BTreeMap;

use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::agents::{AgentSignal, DebateOutcome};
use crate::db::debate_repo::NewConsensusDecision;
use crate::db::{ConsensusRepo, DebateRepo, StoreResult};
use crate::models::{Decision, MessageType, Sentiment, TradeDirection};
use crate::money;

/// One consensus decision handed to the trading executor.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusOutcome {
    pub decision_id: i64,
    pub symbol: String,
    pub decision: Decision,
    pub direction: TradeDirection,
    pub confidence: Decimal,
    pub votes_long: i64,
    pub votes_short: i64,
    pub votes_hold: i64,
    pub agent_votes: BTreeMap<String, TradeDirection>,
    pub market_price: Option<Decimal>,
    /// Carried from the strongest agreeing signal.
    pub leverage: Option<i64>,
    pub stop_loss: Option<Decimal>,
    pub take_profits: Vec<Decimal>,
    pub reasoning: String,
}

/// Append one debate message per non-fallback signal.
pub fn persist_debate_messages(
    conn: &Connection,
    council_id: i64,
    outcome: &DebateOutcome,
) -> StoreResult<usize> {
    let repo = DebateRepo::new(conn);
    let mut appended = 0usize;
    for agent_signals in outcome.signals.values() {
        for signal in agent_signals.values() {
            if signal.is_fallback {
                continue;
            }
            repo.append(
                council_id,
                &signal.display_name,
                &signal.reasoning,
                signal.message_type,
                signal.sentiment,
                Some(&signal.symbol),
                Some(signal.confidence),
                1,
            )?;
            appended += 1;
        }
    }
    Ok(appended)
}

/// Derive, persist and return one consensus per symbol, in symbol order.
#[allow(clippy::too_many_arguments)]
pub fn determine_consensus(
    conn: &Connection,
    council_id: i64,
    council_run_id: Option<i64>,
    council_run_cycle_id: Option<i64>,
    signals: &BTreeMap<String, BTreeMap<String, AgentSignal>>,
    threshold: Decimal,
    market_prices: &BTreeMap<String, Decimal>,
) -> StoreResult<Vec<ConsensusOutcome>> {
    if signals.is_empty() {
        warn!(council_id, "no signals provided for consensus determination");
        return Ok(Vec::new());
    }

    let decisions_repo = ConsensusRepo::new(conn);
    let debate_repo = DebateRepo::new(conn);
    let mut consensuses = Vec::new();

    for (symbol, agent_signals) in signals {
        if agent_signals.is_empty() {
            warn!(council_id, symbol = %symbol, "no agent signals for symbol, skipping");
            continue;
        }

        let mut votes_long = 0i64;
        let mut votes_short = 0i64;
        let mut votes_hold = 0i64;
        let mut agent_votes: BTreeMap<String, TradeDirection> = BTreeMap::new();
        let mut confidences: Vec<Decimal> = Vec::with_capacity(agent_signals.len());

        for (agent_key, signal) in agent_signals {
            let vote = signal.vote();
            match vote {
                TradeDirection::Long => votes_long += 1,
                TradeDirection::Short => votes_short += 1,
                TradeDirection::None => votes_hold += 1,
            }
            agent_votes.insert(agent_key.clone(), vote);
            confidences.push(signal.confidence);
        }

        let total = Decimal::from(votes_long + votes_short + votes_hold);
        let long_ratio = money::div_pct(Decimal::from(votes_long), total).unwrap_or(Decimal::ZERO);
        let short_ratio =
            money::div_pct(Decimal::from(votes_short), total).unwrap_or(Decimal::ZERO);

        let (decision, direction) = if long_ratio >= threshold {
            (Decision::Buy, TradeDirection::Long)
        } else if short_ratio >= threshold {
            (Decision::Sell, TradeDirection::Short)
        } else {
            (Decision::Hold, TradeDirection::None)
        };

        let confidence = money::mean(&confidences, money::PCT_SCALE);
        let market_price = market_prices.get(symbol.as_str()).copied();

        // exit-plan hints ride along from the strongest agreeing signal
        let strongest = agent_signals
            .values()
            .filter(|s| s.vote() == direction && direction != TradeDirection::None)
            .max_by_key(|s| s.confidence);
        let leverage = strongest.and_then(|s| s.leverage);
        let stop_loss = strongest.and_then(|s| s.stop_loss);
        let take_profits = strongest.map(|s| s.take_profits.clone()).unwrap_or_default();

        let reasoning = format!(
            "Consensus reached for {symbol} with {} ({}) decision. \
             Agent votes: {votes_long} LONG, {votes_short} SHORT, {votes_hold} HOLD. \
             Average confidence: {confidence}. Threshold: {threshold}",
            decision.as_str(),
            direction.as_str(),
        );

        let agent_votes_json = serde_json::to_value(
            agent_votes
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str()))
                .collect::<BTreeMap<_, _>>(),
        )
        .unwrap_or(serde_json::Value::Null);

        let decision_id = decisions_repo.insert(&NewConsensusDecision {
            council_id,
            council_run_id,
            council_run_cycle_id,
            symbol: symbol.clone(),
            decision,
            confidence,
            votes_buy: votes_long,
            votes_sell: votes_short,
            votes_hold,
            agent_votes: agent_votes_json,
            threshold,
            reasoning: reasoning.clone(),
            market_price,
            market_conditions: None,
            execution_reason: if decision == Decision::Hold {
                "hold_decision".to_string()
            } else {
                "pending".to_string()
            },
        })?;

        debate_repo.append(
            council_id,
            "System",
            &format!(
                "Consensus for {symbol}: {} ({}). Votes: {votes_long} LONG, \
                 {votes_short} SHORT, {votes_hold} HOLD. Confidence: {confidence}",
                decision.as_str(),
                direction.as_str(),
            ),
            MessageType::Consensus,
            Sentiment::from_direction(direction),
            Some(symbol),
            Some(confidence),
            1,
        )?;

        info!(
            council_id,
            symbol = %symbol,
            decision = decision.as_str(),
            direction = direction.as_str(),
            confidence = %confidence,
            votes_long,
            votes_short,
            votes_hold,
            decision_id,
            "consensus determined"
        );

        consensuses.push(ConsensusOutcome {
            decision_id,
            symbol: symbol.clone(),
            decision,
            direction,
            confidence,
            votes_long,
            votes_short,
            votes_hold,
            agent_votes,
            market_price,
            leverage,
            stop_loss,
            take_profits,
            reasoning,
        });
    }

    Ok(consensuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry;
    use crate::db::{CouncilRepo, Database};
    use crate::models::{AgentsConfig, ConnectionsConfig, NewCouncil, TradingMode, TradingType};
    use crate::money::PCT_SCALE;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let cid = {
            let conn = db.session().await;
            CouncilRepo::new(&conn)
                .insert(&NewCouncil {
                    user_id: None,
                    name: "consensus".to_string(),
                    is_system: true,
                    is_public: false,
                    is_template: false,
                    agents: AgentsConfig::default(),
                    connections: ConnectionsConfig::default(),
                    trading_mode: TradingMode::Paper,
                    trading_type: TradingType::Futures,
                    initial_capital: Decimal::from(10_000),
                    forked_from_id: None,
                })
                .unwrap()
        };
        (db, cid)
    }

    fn signal(agent_key: &str, symbol: &str, direction: TradeDirection, confidence: &str) -> AgentSignal {
        let spec = registry::lookup(agent_key).unwrap_or_else(|| registry::AGENTS.first().unwrap());
        let mut s = AgentSignal::fallback(spec, symbol, "seed");
        s.is_fallback = false;
        s.direction = direction;
        s.action = match direction {
            TradeDirection::Long => crate::agents::SignalAction::Buy,
            TradeDirection::Short => crate::agents::SignalAction::Sell,
            TradeDirection::None => crate::agents::SignalAction::Hold,
        };
        s.confidence = d(confidence);
        s
    }

    fn matrix(symbol: &str, entries: &[(&str, TradeDirection, &str)]) -> BTreeMap<String, BTreeMap<String, AgentSignal>> {
        let mut by_agent = BTreeMap::new();
        for (agent, direction, confidence) in entries {
            by_agent.insert(
                agent.to_string(),
                signal(agent, symbol, *direction, confidence),
            );
        }
        let mut out = BTreeMap::new();
        out.insert(symbol.to_string(), by_agent);
        out
    }

    #[tokio::test]
    async fn threshold_boundary_is_inclusive() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        // 3 of 5 LONG at threshold 0.6 -> BUY
        let signals = matrix(
            "ETHUSDT",
            &[
                ("satoshi_nakamoto", TradeDirection::Long, "0.8"),
                ("vitalik_buterin", TradeDirection::Long, "0.7"),
                ("michael_saylor", TradeDirection::Long, "0.9"),
                ("crypto_technical", TradeDirection::None, "0.4"),
                ("crypto_sentiment", TradeDirection::None, "0.5"),
            ],
        );
        let out = determine_consensus(
            &conn,
            cid,
            None,
            None,
            &signals,
            d("0.6"),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].decision, Decision::Buy);
        assert_eq!(out[0].direction, TradeDirection::Long);
        assert_eq!(out[0].votes_long, 3);
    }

    #[tokio::test]
    async fn split_below_threshold_holds() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        // 2 LONG, 2 SHORT, 1 HOLD -> HOLD
        let signals = matrix(
            "ETHUSDT",
            &[
                ("satoshi_nakamoto", TradeDirection::Long, "0.8"),
                ("vitalik_buterin", TradeDirection::Long, "0.7"),
                ("michael_saylor", TradeDirection::Short, "0.9"),
                ("crypto_technical", TradeDirection::Short, "0.6"),
                ("crypto_sentiment", TradeDirection::None, "0.5"),
            ],
        );
        let out = determine_consensus(
            &conn,
            cid,
            None,
            None,
            &signals,
            d("0.6"),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(out[0].decision, Decision::Hold);
        assert_eq!(out[0].direction, TradeDirection::None);
    }

    #[tokio::test]
    async fn confidence_is_mean_over_all_signals() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        let signals = matrix(
            "BTCUSDT",
            &[
                ("satoshi_nakamoto", TradeDirection::Long, "0.9"),
                ("vitalik_buterin", TradeDirection::Long, "0.6"),
            ],
        );
        let out = determine_consensus(
            &conn,
            cid,
            None,
            None,
            &signals,
            d("0.6"),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(out[0].confidence, d("0.7500"));
    }

    #[tokio::test]
    async fn decision_row_and_system_message_are_persisted() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        let mut prices = BTreeMap::new();
        prices.insert("BTCUSDT".to_string(), d("50000"));
        let signals = matrix(
            "BTCUSDT",
            &[
                ("satoshi_nakamoto", TradeDirection::Long, "0.9"),
                ("vitalik_buterin", TradeDirection::Long, "0.8"),
            ],
        );
        let out =
            determine_consensus(&conn, cid, None, None, &signals, d("0.6"), &prices).unwrap();

        let stored = ConsensusRepo::new(&conn)
            .get(cid, out[0].decision_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.decision, Decision::Buy);
        assert_eq!(stored.total_votes, stored.votes_buy + stored.votes_sell + stored.votes_hold);
        assert_eq!(stored.market_price, Some(d("50000")));
        assert!(!stored.was_executed);
        assert_eq!(stored.execution_reason.as_deref(), Some("pending"));

        let messages = DebateRepo::new(&conn).list_recent(cid, 10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].agent_name, "System");
        assert_eq!(messages[0].message_type, MessageType::Consensus);
    }

    #[tokio::test]
    async fn consensus_is_idempotent_over_same_signals() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        let signals = matrix(
            "BTCUSDT",
            &[
                ("satoshi_nakamoto", TradeDirection::Long, "0.9"),
                ("vitalik_buterin", TradeDirection::Short, "0.8"),
                ("crypto_technical", TradeDirection::Long, "0.7"),
            ],
        );
        let first =
            determine_consensus(&conn, cid, None, None, &signals, d("0.6"), &BTreeMap::new())
                .unwrap();
        let second =
            determine_consensus(&conn, cid, None, None, &signals, d("0.6"), &BTreeMap::new())
                .unwrap();
        assert_eq!(first[0].decision, second[0].decision);
        assert_eq!(first[0].confidence, second[0].confidence);
        assert_eq!(first[0].agent_votes, second[0].agent_votes);
    }

    #[tokio::test]
    async fn empty_matrix_yields_no_decisions() {
        let (db, cid) = setup().await;
        let conn = db.session().await;
        let out = determine_consensus(
            &conn,
            cid,
            None,
            None,
            &BTreeMap::new(),
            d("0.6"),
            &BTreeMap::new(),
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn mean_confidence_scale_matches_store() {
        let values = [d("0.9"), d("0.6")];
        assert_eq!(money::mean(&values, PCT_SCALE), d("0.75"));
    }
}
