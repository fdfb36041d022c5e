//! pantheond - council trading daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pantheon_backend::agents::{AgentFacade, LlmInvoker};
use pantheon_backend::broadcast::ChannelSink;
use pantheon_backend::config::AppConfig;
use pantheon_backend::council::{seed_system_councils, Orchestrator};
use pantheon_backend::db::Database;
use pantheon_backend::llm::LlmClient;
use pantheon_backend::venue::{BinanceClient, MarketKind, PaperVenue, VenueClient};

#[derive(Parser)]
#[command(name = "pantheond", about = "Autonomous trading council daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator daemon over all active system councils.
    Run {
        /// Restrict to specific council ids.
        #[arg(long, value_delimiter = ',')]
        council_ids: Option<Vec<i64>>,
    },
    /// Run a single cycle for one council and exit.
    Cycle {
        #[arg(long)]
        council_id: i64,
    },
    /// Insert the built-in system councils if they are missing.
    Seed,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_orchestrator(cfg: &AppConfig, db: Database) -> Result<Arc<Orchestrator>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let llm = LlmClient::from_config(http, &cfg.llm)?;
    let facade = AgentFacade::new(
        Arc::new(LlmInvoker::new(llm)),
        cfg.orchestrator.agent_concurrency,
        cfg.orchestrator.agent_timeout,
    );

    // paper venues price off the public endpoints, no credentials needed
    let futures_feed: Arc<dyn VenueClient> = Arc::new(BinanceClient::new(
        MarketKind::Futures,
        cfg.venue.futures_base_url.clone(),
        "",
        "",
        cfg.venue.request_timeout,
    ));
    let spot_feed: Arc<dyn VenueClient> = Arc::new(BinanceClient::new(
        MarketKind::Spot,
        cfg.venue.spot_base_url.clone(),
        "",
        "",
        cfg.venue.request_timeout,
    ));
    let paper_futures = Arc::new(PaperVenue::new(Some(futures_feed)));
    let paper_spot = Arc::new(PaperVenue::new(Some(spot_feed)));

    let sink = Arc::new(ChannelSink::new(1_000));

    Ok(Arc::new(
        Orchestrator::new(
            db,
            cfg.orchestrator.clone(),
            cfg.venue.clone(),
            facade,
            paper_futures,
            paper_spot,
        )
        .with_broadcast(sink),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env();
    let db = Database::open(&cfg.database).context("failed to open database")?;
    info!(path = %cfg.database.path, "database initialized");

    match cli.command {
        Command::Run { council_ids } => {
            {
                let conn = db.session().await;
                let created = seed_system_councils(&conn)?;
                if created > 0 {
                    info!(created, "seeded missing system councils");
                }
            }
            let orchestrator = build_orchestrator(&cfg, db)?;

            let handle = {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move { orchestrator.start(council_ids).await })
            };

            tokio::signal::ctrl_c().await.ok();
            warn!("shutdown signal received, letting in-flight cycles complete");
            orchestrator.stop();
            handle.await.context("orchestrator task")??;
        }
        Command::Cycle { council_id } => {
            let orchestrator = build_orchestrator(&cfg, db)?;
            let report = orchestrator.run_council_cycle(council_id).await;
            if report.success {
                info!(
                    council_id,
                    consensus_count = report.consensus_count,
                    trades_executed = report.trades_executed,
                    trades_skipped = report.trades_skipped,
                    "cycle completed"
                );
            } else {
                anyhow::bail!(
                    "cycle failed: {}",
                    report.error.unwrap_or_else(|| "unknown".to_string())
                );
            }
        }
        Command::Seed => {
            let conn = db.session().await;
            let created = seed_system_councils(&conn)?;
            info!(created, "seed complete");
        }
    }

    Ok(())
}
