//! Per-council control loops.
//!
//! One long-lived task per active council. Each iteration runs exactly one
//! cycle (portfolio → debate → consensus → trade → metrics → snapshot →
//! broadcast), records a CouncilRun/CouncilRunCycle pair, then sleeps the
//! schedule interval. An external stop flips the council's running flag; the
//! in-flight cycle always completes before the loop exits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::agents::{resolve_roster, AgentFacade, DebateOutcome, DebateRequest};
use crate::broadcast::{BroadcastSink, CouncilEvent};
use crate::config::{OrchestratorConfig, VenueConfig};
use crate::council::debate::{determine_consensus, persist_debate_messages, ConsensusOutcome};
use crate::council::metrics;
use crate::council::portfolio::build_portfolio_context;
use crate::council::trading::{BatchOutcome, TradingExecutor};
use crate::db::run_repo::CycleArtifacts;
use crate::db::{CouncilRepo, CycleRepo, Database, RunRepo, WalletRepo};
use crate::error::{EngineError, EngineResult};
use crate::models::{Council, TradingMode, TradingType};
use crate::money;
use crate::venue::{BinanceClient, MarketKind, VenueClient};

/// Structured cycle result; stages never use errors for expected skips.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub success: bool,
    pub run_id: Option<i64>,
    pub consensus_count: usize,
    pub trades_executed: usize,
    pub trades_skipped: usize,
    pub error: Option<String>,
}

struct StageSummary {
    consensuses: Vec<ConsensusOutcome>,
    batch: BatchOutcome,
    debate: DebateOutcome,
    portfolio_snapshot: serde_json::Value,
    api_calls: i64,
}

pub struct Orchestrator {
    db: Database,
    cfg: OrchestratorConfig,
    venue_cfg: VenueConfig,
    facade: AgentFacade,
    paper_futures_venue: Arc<dyn VenueClient>,
    paper_spot_venue: Arc<dyn VenueClient>,
    running: Mutex<HashMap<i64, bool>>,
    broadcast: Option<Arc<dyn BroadcastSink>>,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        cfg: OrchestratorConfig,
        venue_cfg: VenueConfig,
        facade: AgentFacade,
        paper_futures_venue: Arc<dyn VenueClient>,
        paper_spot_venue: Arc<dyn VenueClient>,
    ) -> Self {
        Self {
            db,
            cfg,
            venue_cfg,
            facade,
            paper_futures_venue,
            paper_spot_venue,
            running: Mutex::new(HashMap::new()),
            broadcast: None,
        }
    }

    pub fn with_broadcast(mut self, sink: Arc<dyn BroadcastSink>) -> Self {
        self.broadcast = Some(sink);
        self
    }

    pub fn is_running(&self, council_id: i64) -> bool {
        self.running.lock().get(&council_id).copied().unwrap_or(false)
    }

    /// Signal every council loop to stop after its current cycle.
    pub fn stop(&self) {
        info!("stopping orchestrator - signaling all councils to stop");
        for flag in self.running.lock().values_mut() {
            *flag = false;
        }
    }

    /// Start loops for the given councils (all active system councils when
    /// none are named) and wait for them to finish.
    pub async fn start(self: Arc<Self>, council_ids: Option<Vec<i64>>) -> EngineResult<()> {
        let councils = {
            let conn = self.db.session().await;
            let repo = CouncilRepo::new(&conn);
            match council_ids {
                Some(ids) => {
                    let mut found = Vec::new();
                    for id in ids {
                        match repo.get(id)? {
                            Some(c) => found.push(c),
                            None => warn!(council_id = id, "council not found"),
                        }
                    }
                    found
                }
                None => repo.list_system_active()?,
            }
        };

        if councils.is_empty() {
            warn!("no councils to run");
            return Ok(());
        }

        info!(
            count = councils.len(),
            interval_secs = self.cfg.schedule_interval_secs,
            "starting council orchestrator daemon"
        );

        let mut tasks = JoinSet::new();
        for council in councils {
            let mut running = self.running.lock();
            if running.get(&council.id).copied().unwrap_or(false) {
                warn!(council_id = council.id, "council loop already running");
                continue;
            }
            running.insert(council.id, true);
            drop(running);

            let orchestrator = Arc::clone(&self);
            tasks.spawn(async move {
                orchestrator.run_council_loop(council.id, council.name).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "council loop task failed");
            }
        }
        Ok(())
    }

    async fn run_council_loop(&self, council_id: i64, council_name: String) {
        info!(
            council_id,
            council_name = %council_name,
            interval_secs = self.cfg.schedule_interval_secs,
            "starting council loop"
        );

        while self.is_running(council_id) {
            let report = self.run_council_cycle(council_id).await;
            let sleep_secs = if report.success {
                info!(
                    council_id,
                    trades_executed = report.trades_executed,
                    trades_skipped = report.trades_skipped,
                    interval_secs = self.cfg.schedule_interval_secs,
                    "council cycle completed, waiting for next cycle"
                );
                self.cfg.schedule_interval_secs
            } else {
                error!(
                    council_id,
                    council_name = %council_name,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    backoff_secs = self.cfg.error_backoff_secs,
                    "error in council loop"
                );
                self.cfg.error_backoff_secs
            };
            self.sleep_observing_stop(council_id, sleep_secs).await;
        }

        info!(council_id, "council loop stopped");
    }

    /// Sleep up to `secs`, waking early once the running flag drops.
    async fn sleep_observing_stop(&self, council_id: i64, secs: u64) {
        let mut remaining = secs;
        while remaining > 0 && self.is_running(council_id) {
            let step = remaining.min(1);
            tokio::time::sleep(Duration::from_secs(step)).await;
            remaining -= step;
        }
    }

    /// Run exactly one cycle for a council.
    pub async fn run_council_cycle(&self, council_id: i64) -> CycleReport {
        let council = {
            let conn = self.db.session().await;
            match CouncilRepo::new(&conn).get(council_id) {
                Ok(Some(c)) => c,
                Ok(None) => {
                    error!(council_id, "council not found");
                    return CycleReport {
                        error: Some("council_not_found".to_string()),
                        ..Default::default()
                    };
                }
                Err(e) => {
                    return CycleReport {
                        error: Some(e.to_string()),
                        ..Default::default()
                    };
                }
            }
        };

        info!(
            council_id,
            council_name = %council.name,
            trading_mode = council.trading_mode.as_str(),
            trading_type = council.trading_type.as_str(),
            "running council cycle"
        );

        let symbols = self.cfg.symbols.clone();
        let (run_id, cycle_id) = {
            let conn = self.db.session().await;
            let run_id = match RunRepo::new(&conn).start(
                council_id,
                council.user_id,
                council.trading_mode,
                &symbols,
                Utc::now(),
            ) {
                Ok(id) => id,
                Err(e) => {
                    return CycleReport {
                        error: Some(e.to_string()),
                        ..Default::default()
                    };
                }
            };
            let cycle_id = CycleRepo::new(&conn)
                .start(run_id, 1, "scheduled", Utc::now())
                .ok();
            (run_id, cycle_id)
        };

        match self
            .execute_cycle_stages(&council, run_id, cycle_id, &symbols)
            .await
        {
            Ok(summary) => {
                let results = serde_json::json!({
                    "consensuses": summary.consensuses.len(),
                    "trades_executed": summary.batch.trades_executed.len(),
                    "trades_skipped": summary.batch.trades_skipped.len(),
                    "symbols_processed": summary.consensuses.len(),
                });
                {
                    let conn = self.db.session().await;
                    if let Err(e) = RunRepo::new(&conn).complete(run_id, &results) {
                        warn!(council_id, error = %e, "failed to complete run record");
                    }
                    if let Some(cycle_id) = cycle_id {
                        let artifacts = CycleArtifacts {
                            analyst_signals: serde_json::to_value(&summary.debate.signals).ok(),
                            trading_decisions: serde_json::to_value(&summary.consensuses).ok(),
                            executed_trades: serde_json::to_value(&summary.batch).ok(),
                            portfolio_snapshot: Some(summary.portfolio_snapshot.clone()),
                            performance_metrics: None,
                            llm_calls_count: summary.debate.llm_calls,
                            api_calls_count: summary.api_calls,
                            estimated_cost: None,
                        };
                        if let Err(e) = CycleRepo::new(&conn).complete(cycle_id, &artifacts) {
                            warn!(council_id, error = %e, "failed to complete cycle record");
                        }
                    }
                }

                self.broadcast_consensuses(council_id, &summary.consensuses);

                info!(
                    council_id,
                    trades_executed = summary.batch.trades_executed.len(),
                    trades_skipped = summary.batch.trades_skipped.len(),
                    "council cycle completed"
                );

                CycleReport {
                    success: true,
                    run_id: Some(run_id),
                    consensus_count: summary.consensuses.len(),
                    trades_executed: summary.batch.trades_executed.len(),
                    trades_skipped: summary.batch.trades_skipped.len(),
                    error: None,
                }
            }
            Err(e) => {
                error!(council_id, error = %e, "council cycle failed");
                let conn = self.db.session().await;
                if let Err(err) = RunRepo::new(&conn).fail(run_id, &e.to_string()) {
                    warn!(council_id, error = %err, "failed to mark run failed");
                }
                if let Some(cycle_id) = cycle_id {
                    if let Err(err) = CycleRepo::new(&conn).fail(cycle_id, &e.to_string()) {
                        warn!(council_id, error = %err, "failed to mark cycle failed");
                    }
                }
                CycleReport {
                    success: false,
                    run_id: Some(run_id),
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    async fn execute_cycle_stages(
        &self,
        council: &Council,
        run_id: i64,
        cycle_id: Option<i64>,
        symbols: &[String],
    ) -> EngineResult<StageSummary> {
        // 1. portfolio snapshot before any agent call
        let portfolio = {
            let conn = self.db.session().await;
            build_portfolio_context(&conn, council, symbols)
        };
        let portfolio_snapshot = serde_json::to_value(&portfolio)
            .map_err(|e| EngineError::Fatal(format!("portfolio snapshot serialization: {e}")))?;

        // 2. roster
        let roster = resolve_roster(
            council.id,
            &council.agents,
            &council.connections,
            council.is_system,
        );
        if roster.is_empty() {
            return Err(EngineError::Validation(
                "no recognized agents configured for council".to_string(),
            ));
        }

        // 3. debate fan-out
        let debate = self
            .facade
            .run_debate(
                &roster,
                DebateRequest {
                    council_id: council.id,
                    symbols: symbols.to_vec(),
                    portfolio,
                    start_date: None,
                    end_date: None,
                    model_override: None,
                },
            )
            .await;

        {
            let conn = self.db.session().await;
            persist_debate_messages(&conn, council.id, &debate)?;
        }

        // 4. marks for the decision records
        let venue = self.venue_for(council).await?;
        let mut market_prices: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut api_calls = 0i64;
        for symbol in debate.signals.keys() {
            api_calls += 1;
            match venue.get_ticker(symbol).await {
                Ok(ticker) => {
                    market_prices.insert(symbol.clone(), ticker.price);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "mark fetch failed"),
            }
        }

        // 5. consensus, persisted before any trade
        let consensuses = {
            let conn = self.db.session().await;
            determine_consensus(
                &conn,
                council.id,
                Some(run_id),
                cycle_id,
                &debate.signals,
                self.cfg.consensus_threshold,
                &market_prices,
            )?
        };

        // 6. trades
        let executor = TradingExecutor::new(
            self.db.clone(),
            Arc::clone(&venue),
            "binance",
            self.cfg.min_confidence_for_trade,
            self.cfg.max_position_pct,
        );
        let batch = executor.execute_batch(council.id, &consensuses).await;
        api_calls += batch.trades_executed.len() as i64;

        // 7. metrics run even when nothing traded
        {
            let conn = self.db.session().await;
            metrics::update_all_metrics(&conn, council.id, Utc::now())?;
        }

        Ok(StageSummary {
            consensuses,
            batch,
            debate,
            portfolio_snapshot,
            api_calls,
        })
    }

    /// Venue instance for the cycle. Paper councils share the injected
    /// simulators; real councils build a signed client from their wallet.
    async fn venue_for(&self, council: &Council) -> EngineResult<Arc<dyn VenueClient>> {
        if council.trading_mode == TradingMode::Paper {
            return Ok(match council.trading_type {
                TradingType::Futures => Arc::clone(&self.paper_futures_venue),
                TradingType::Spot => Arc::clone(&self.paper_spot_venue),
            });
        }

        let conn = self.db.session().await;
        let wallet = WalletRepo::new(&conn)
            .find_for_council(council.id)?
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "council {} is in real mode but has no wallet credentials",
                    council.id
                ))
            })?;
        let (kind, base_url) = match council.trading_type {
            TradingType::Futures => (MarketKind::Futures, self.venue_cfg.futures_base_url.clone()),
            TradingType::Spot => (MarketKind::Spot, self.venue_cfg.spot_base_url.clone()),
        };
        Ok(Arc::new(BinanceClient::new(
            kind,
            base_url,
            wallet.api_key,
            wallet.secret_key,
            self.venue_cfg.request_timeout,
        )))
    }

    fn broadcast_consensuses(&self, council_id: i64, consensuses: &[ConsensusOutcome]) {
        let Some(sink) = &self.broadcast else {
            return;
        };
        for consensus in consensuses {
            sink.publish(CouncilEvent {
                topic: format!("council_{council_id}"),
                event_type: "consensus".to_string(),
                data: serde_json::json!({
                    "symbol": consensus.symbol,
                    "decision": consensus.decision.as_str(),
                    "direction": consensus.direction.as_str(),
                    "confidence": money::to_broadcast_f64(consensus.confidence),
                    "votes": {
                        "long": consensus.votes_long,
                        "short": consensus.votes_short,
                        "hold": consensus.votes_hold,
                    },
                }),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::facade::AgentInvoker;
    use crate::agents::registry::AgentSpec;
    use crate::agents::RawAgentOutput;
    use crate::broadcast::ChannelSink;
    use crate::db::{ConsensusRepo, RunRepo, SpotHoldingRepo};
    use crate::models::{
        AgentEntry, AgentsConfig, ConnectionsConfig, NewCouncil, RunStatus,
    };
    use crate::venue::PaperVenue;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct BullishInvoker;

    #[async_trait::async_trait]
    impl AgentInvoker for BullishInvoker {
        async fn invoke(
            &self,
            _spec: &'static AgentSpec,
            _symbol: &str,
            _request: &DebateRequest,
        ) -> anyhow::Result<RawAgentOutput> {
            Ok(serde_json::from_str(
                r#"{"signal": "BUY", "direction": "LONG", "confidence": 80, "reasoning": "up only"}"#,
            )?)
        }
    }

    async fn seed_council(db: &Database, trading_type: TradingType) -> i64 {
        let conn = db.session().await;
        CouncilRepo::new(&conn)
            .insert(&NewCouncil {
                user_id: None,
                name: "orchestrated".to_string(),
                is_system: true,
                is_public: true,
                is_template: false,
                agents: AgentsConfig {
                    agents: vec![
                        AgentEntry {
                            agent_key: "satoshi_nakamoto".to_string(),
                            role: None,
                        },
                        AgentEntry {
                            agent_key: "crypto_technical".to_string(),
                            role: None,
                        },
                    ],
                },
                connections: ConnectionsConfig::default(),
                trading_mode: TradingMode::Paper,
                trading_type,
                initial_capital: Decimal::from(10_000),
                forked_from_id: None,
            })
            .unwrap()
    }

    fn orchestrator(db: &Database, schedule_secs: u64) -> Arc<Orchestrator> {
        let prices = crate::council::trading::static_prices(&[
            ("BTCUSDT", d("50000")),
            ("ETHUSDT", d("3000")),
        ]);
        let facade = AgentFacade::new(Arc::new(BullishInvoker), 4, Duration::from_secs(5));
        let cfg = OrchestratorConfig {
            schedule_interval_secs: schedule_secs,
            error_backoff_secs: 1,
            ..Default::default()
        };
        Arc::new(Orchestrator::new(
            db.clone(),
            cfg,
            VenueConfig::default(),
            facade,
            Arc::new(PaperVenue::with_static_prices(prices.clone())),
            Arc::new(PaperVenue::with_static_prices(prices)),
        ))
    }

    #[tokio::test]
    async fn full_cycle_trades_and_records_everything() {
        let db = Database::open_in_memory().unwrap();
        let cid = seed_council(&db, TradingType::Spot).await;
        let orch = orchestrator(&db, 10);

        let report = orch.run_council_cycle(cid).await;
        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.consensus_count, 2);
        assert_eq!(report.trades_executed, 2);

        let conn = db.session().await;
        let runs = RunRepo::new(&conn).list_recent(cid, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert!(runs[0].completed_at.is_some());

        let decisions = ConsensusRepo::new(&conn).list_recent(cid, None, 10).unwrap();
        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.was_executed));
        assert!(decisions.iter().all(|d| d.council_run_id == Some(runs[0].id)));

        let holding = SpotHoldingRepo::new(&conn)
            .find_by_key(cid, "BTCUSDT", "binance", TradingMode::Paper)
            .unwrap();
        assert!(holding.is_some());

        let council = CouncilRepo::new(&conn).get(cid).unwrap().unwrap();
        assert!(council.available_balance < council.initial_capital);
    }

    #[tokio::test]
    async fn broadcast_emits_one_event_per_consensus() {
        let db = Database::open_in_memory().unwrap();
        let cid = seed_council(&db, TradingType::Spot).await;
        let sink = Arc::new(ChannelSink::new(16));
        let mut rx = sink.subscribe();

        let prices = crate::council::trading::static_prices(&[
            ("BTCUSDT", d("50000")),
            ("ETHUSDT", d("3000")),
        ]);
        let facade = AgentFacade::new(Arc::new(BullishInvoker), 4, Duration::from_secs(5));
        let orch = Arc::new(
            Orchestrator::new(
                db.clone(),
                OrchestratorConfig::default(),
                VenueConfig::default(),
                facade,
                Arc::new(PaperVenue::with_static_prices(prices.clone())),
                Arc::new(PaperVenue::with_static_prices(prices)),
            )
            .with_broadcast(sink.clone()),
        );

        let report = orch.run_council_cycle(cid).await;
        assert!(report.success);

        let mut seen = 0;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.event_type, "consensus");
            assert_eq!(event.topic, format!("council_{cid}"));
            seen += 1;
        }
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn cycle_with_no_agents_fails_the_run() {
        let db = Database::open_in_memory().unwrap();
        let cid = {
            let conn = db.session().await;
            CouncilRepo::new(&conn)
                .insert(&NewCouncil {
                    user_id: None,
                    name: "empty".to_string(),
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
        let orch = orchestrator(&db, 10);
        let report = orch.run_council_cycle(cid).await;
        assert!(!report.success);

        let conn = db.session().await;
        let runs = RunRepo::new(&conn).list_recent(cid, 10).unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error_message.as_deref().unwrap().contains("agents"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_the_current_cycle_complete() {
        let db = Database::open_in_memory().unwrap();
        let cid = seed_council(&db, TradingType::Spot).await;
        // long schedule: the loop would only run cycle N+1 hours from now
        let orch = orchestrator(&db, 14_400);

        let handle = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.start(Some(vec![cid])).await })
        };

        // let cycle N finish and the loop enter its sleep
        tokio::time::sleep(Duration::from_secs(5)).await;
        orch.stop();
        // the loop observes the flag within its sleep granularity
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.await.unwrap().unwrap();

        let conn = db.session().await;
        let runs = RunRepo::new(&conn).list_recent(cid, 10).unwrap();
        assert_eq!(runs.len(), 1, "no cycle N+1 after stop");
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(RunRepo::new(&conn).in_progress_count(cid).unwrap(), 0);
    }

    #[tokio::test]
    async fn at_most_one_run_in_progress_per_council() {
        let db = Database::open_in_memory().unwrap();
        let cid = seed_council(&db, TradingType::Futures).await;
        let orch = orchestrator(&db, 10);

        let report = orch.run_council_cycle(cid).await;
        assert!(report.success);
        let conn = db.session().await;
        assert_eq!(RunRepo::new(&conn).in_progress_count(cid).unwrap(), 0);
    }
}
