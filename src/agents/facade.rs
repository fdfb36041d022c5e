//! Concurrent agent fan-out.
//!
//! Runs every configured agent over every symbol under a bounded worker
//! pool. Individual failures and timeouts degrade to hold signals with zero
//! confidence; they never abort the cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::agents::registry::{AgentSpec, RosterEntry};
use crate::agents::signal::{AgentSignal, RawAgentOutput};
use crate::council::portfolio::PortfolioContext;
use crate::llm::LlmClient;

/// Inputs shared by every invocation in one debate round.
#[derive(Debug, Clone)]
pub struct DebateRequest {
    pub council_id: i64,
    pub symbols: Vec<String>,
    pub portfolio: PortfolioContext,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub model_override: Option<String>,
}

/// signals[symbol][agent_key] -> signal. BTreeMaps keep downstream
/// iteration deterministic.
#[derive(Debug, Default)]
pub struct DebateOutcome {
    pub signals: BTreeMap<String, BTreeMap<String, AgentSignal>>,
    pub llm_calls: i64,
}

#[async_trait::async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(
        &self,
        spec: &'static AgentSpec,
        symbol: &str,
        request: &DebateRequest,
    ) -> Result<RawAgentOutput>;
}

pub struct AgentFacade {
    invoker: Arc<dyn AgentInvoker>,
    concurrency: usize,
    timeout: Duration,
}

impl AgentFacade {
    pub fn new(invoker: Arc<dyn AgentInvoker>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            invoker,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    pub async fn run_debate(
        &self,
        roster: &[RosterEntry],
        request: DebateRequest,
    ) -> DebateOutcome {
        let mut outcome = DebateOutcome::default();
        if roster.is_empty() || request.symbols.is_empty() {
            return outcome;
        }

        let request = Arc::new(request);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(String, AgentSignal)> = JoinSet::new();

        for entry in roster {
            for symbol in &request.symbols {
                let invoker = Arc::clone(&self.invoker);
                let request = Arc::clone(&request);
                let semaphore = Arc::clone(&semaphore);
                let spec = entry.spec;
                let role = entry.role;
                let symbol = symbol.clone();
                let timeout = self.timeout;

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let result =
                        tokio::time::timeout(timeout, invoker.invoke(spec, &symbol, &request))
                            .await;

                    let mut signal = match result {
                        Ok(Ok(raw)) => AgentSignal::from_raw(spec, &symbol, &raw),
                        Ok(Err(e)) => {
                            warn!(
                                council_id = request.council_id,
                                agent_key = spec.key,
                                symbol = %symbol,
                                error = %e,
                                "agent invocation failed"
                            );
                            AgentSignal::fallback(spec, &symbol, &e.to_string())
                        }
                        Err(_) => {
                            warn!(
                                council_id = request.council_id,
                                agent_key = spec.key,
                                symbol = %symbol,
                                timeout_secs = timeout.as_secs(),
                                "agent invocation timed out"
                            );
                            AgentSignal::fallback(spec, &symbol, "invocation timed out")
                        }
                    };
                    signal.message_type = role.message_type();
                    (symbol, signal)
                });
            }
        }

        outcome.llm_calls = (roster.len() * request.symbols.len()) as i64;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, signal)) => {
                    debug!(
                        agent_key = %signal.agent_key,
                        symbol = %symbol,
                        action = signal.action.as_str(),
                        fallback = signal.is_fallback,
                        "agent signal collected"
                    );
                    outcome
                        .signals
                        .entry(symbol)
                        .or_default()
                        .insert(signal.agent_key.clone(), signal);
                }
                Err(e) => warn!(error = %e, "agent task panicked"),
            }
        }

        outcome
    }
}

/// LLM-backed invoker used in production.
pub struct LlmInvoker {
    client: LlmClient,
}

impl LlmInvoker {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }

    fn user_prompt(symbol: &str, request: &DebateRequest) -> String {
        let portfolio = serde_json::to_string(&request.portfolio.broadcast_payload())
            .unwrap_or_else(|_| "{}".to_string());
        let window = match (request.start_date, request.end_date) {
            (Some(start), Some(end)) => format!("Analysis window: {start} to {end}.\n"),
            (Some(start), None) => format!("Analysis window starts {start}.\n"),
            (None, Some(end)) => format!("Analysis window ends {end}.\n"),
            (None, None) => String::new(),
        };
        format!(
            "Analyze {symbol} for a directional trade.\n{window}\
             Current portfolio state: {portfolio}\n\
             Respond with a single JSON object:\n\
             {{\"signal\": \"BUY|SELL|HOLD|LONG|SHORT\", \"direction\": \"LONG|SHORT|NONE\", \
             \"confidence\": 0-100, \"reasoning\": \"...\", \"leverage\": optional int, \
             \"stop_loss\": optional price, \"take_profits\": optional [price, price, price]}}"
        )
    }
}

#[async_trait::async_trait]
impl AgentInvoker for LlmInvoker {
    async fn invoke(
        &self,
        spec: &'static AgentSpec,
        symbol: &str,
        request: &DebateRequest,
    ) -> Result<RawAgentOutput> {
        let model = request
            .model_override
            .as_deref()
            .unwrap_or_else(|| self.client.model());
        let user = Self::user_prompt(symbol, request);
        let (raw, out) = self
            .client
            .structured::<RawAgentOutput>(model, spec.system_prompt, &user)
            .await?;
        debug!(
            agent_key = spec.key,
            symbol,
            model = %out.model,
            latency_ms = out.latency_ms,
            "agent reply parsed"
        );
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry::resolve_roster;
    use crate::models::{AgentEntry, AgentsConfig, ConnectionsConfig};
    use rust_decimal::Decimal;

    struct ScriptedInvoker;

    #[async_trait::async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            spec: &'static AgentSpec,
            symbol: &str,
            _request: &DebateRequest,
        ) -> Result<RawAgentOutput> {
            if spec.key == "crypto_sentiment" {
                anyhow::bail!("provider 500");
            }
            if symbol == "ETHUSDT" {
                Ok(serde_json::from_str(r#"{"signal": "SELL", "confidence": 70}"#)?)
            } else {
                Ok(serde_json::from_str(r#"{"signal": "BUY", "confidence": 80}"#)?)
            }
        }
    }

    struct HangingInvoker;

    #[async_trait::async_trait]
    impl AgentInvoker for HangingInvoker {
        async fn invoke(
            &self,
            _spec: &'static AgentSpec,
            _symbol: &str,
            _request: &DebateRequest,
        ) -> Result<RawAgentOutput> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(RawAgentOutput::default())
        }
    }

    fn request(symbols: &[&str]) -> DebateRequest {
        DebateRequest {
            council_id: 1,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            portfolio: PortfolioContext::minimal(
                1,
                Decimal::from(10_000),
                Decimal::from(10_000),
            ),
            start_date: None,
            end_date: None,
            model_override: None,
        }
    }

    fn roster(keys: &[&str]) -> Vec<RosterEntry> {
        let cfg = AgentsConfig {
            agents: keys
                .iter()
                .map(|k| AgentEntry {
                    agent_key: k.to_string(),
                    role: None,
                })
                .collect(),
        };
        resolve_roster(1, &cfg, &ConnectionsConfig::default(), true)
    }

    #[tokio::test]
    async fn fan_out_covers_agent_symbol_product() {
        let facade = AgentFacade::new(Arc::new(ScriptedInvoker), 4, Duration::from_secs(5));
        let outcome = facade
            .run_debate(
                &roster(&["satoshi_nakamoto", "crypto_technical"]),
                request(&["BTCUSDT", "ETHUSDT"]),
            )
            .await;

        assert_eq!(outcome.llm_calls, 4);
        assert_eq!(outcome.signals.len(), 2);
        assert_eq!(outcome.signals["BTCUSDT"].len(), 2);
        assert_eq!(
            outcome.signals["ETHUSDT"]["crypto_technical"].action.as_str(),
            "sell"
        );
    }

    #[tokio::test]
    async fn failed_agent_degrades_to_hold_fallback() {
        let facade = AgentFacade::new(Arc::new(ScriptedInvoker), 4, Duration::from_secs(5));
        let outcome = facade
            .run_debate(
                &roster(&["crypto_technical", "crypto_sentiment"]),
                request(&["BTCUSDT"]),
            )
            .await;

        let failed = &outcome.signals["BTCUSDT"]["crypto_sentiment"];
        assert!(failed.is_fallback);
        assert_eq!(failed.confidence, Decimal::ZERO);
        assert!(!outcome.signals["BTCUSDT"]["crypto_technical"].is_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_produces_fallback_not_hang() {
        let facade = AgentFacade::new(Arc::new(HangingInvoker), 2, Duration::from_secs(1));
        let outcome = facade
            .run_debate(&roster(&["crypto_technical"]), request(&["BTCUSDT"]))
            .await;

        let signal = &outcome.signals["BTCUSDT"]["crypto_technical"];
        assert!(signal.is_fallback);
        assert!(signal.reasoning.contains("timed out"));
    }

    #[tokio::test]
    async fn empty_symbols_yield_empty_outcome() {
        let facade = AgentFacade::new(Arc::new(ScriptedInvoker), 2, Duration::from_secs(1));
        let outcome = facade
            .run_debate(&roster(&["crypto_technical"]), request(&[]))
            .await;
        assert!(outcome.signals.is_empty());
        assert_eq!(outcome.llm_calls, 0);
    }
}
