//! Built-in system councils, inserted when absent.

use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::info;

use crate::db::{CouncilRepo, StoreResult};
use crate::models::{
    AgentEntry, AgentsConfig, ConnectionEdge, ConnectionsConfig, NewCouncil, TradingMode,
    TradingType,
};

fn agents(keys: &[&str]) -> AgentsConfig {
    AgentsConfig {
        agents: keys
            .iter()
            .map(|k| AgentEntry {
                agent_key: k.to_string(),
                role: None,
            })
            .collect(),
    }
}

fn chain(keys: &[&str]) -> ConnectionsConfig {
    ConnectionsConfig {
        edges: keys
            .windows(2)
            .map(|pair| ConnectionEdge {
                source: pair[0].to_string(),
                target: pair[1].to_string(),
            })
            .collect(),
    }
}

/// Insert the default system councils; existing names are left untouched.
/// Returns how many were created.
pub fn seed_system_councils(conn: &Connection) -> StoreResult<usize> {
    let repo = CouncilRepo::new(conn);

    let defaults = [
        NewCouncil {
            user_id: None,
            name: "Crypto Pantheon".to_string(),
            is_system: true,
            is_public: true,
            is_template: false,
            agents: agents(&[
                "satoshi_nakamoto",
                "vitalik_buterin",
                "michael_saylor",
                "cz_binance",
                "elon_musk",
            ]),
            connections: ConnectionsConfig::default(),
            trading_mode: TradingMode::Paper,
            trading_type: TradingType::Futures,
            initial_capital: Decimal::from(100_000),
            forked_from_id: None,
        },
        NewCouncil {
            user_id: None,
            name: "Quant Desk".to_string(),
            is_system: true,
            is_public: true,
            is_template: false,
            agents: agents(&["crypto_technical", "crypto_sentiment", "crypto_analyst"]),
            connections: chain(&["crypto_technical", "crypto_sentiment", "crypto_analyst"]),
            trading_mode: TradingMode::Paper,
            trading_type: TradingType::Futures,
            initial_capital: Decimal::from(50_000),
            forked_from_id: None,
        },
        NewCouncil {
            user_id: None,
            name: "Spot Accumulators".to_string(),
            is_system: true,
            is_public: true,
            is_template: false,
            agents: agents(&["michael_saylor", "satoshi_nakamoto", "crypto_analyst"]),
            connections: ConnectionsConfig::default(),
            trading_mode: TradingMode::Paper,
            trading_type: TradingType::Spot,
            initial_capital: Decimal::from(25_000),
            forked_from_id: None,
        },
        NewCouncil {
            user_id: None,
            name: "DeFi Collective".to_string(),
            is_system: true,
            is_public: true,
            is_template: false,
            agents: agents(&["defi_agent", "vitalik_buterin", "crypto_sentiment"]),
            connections: ConnectionsConfig::default(),
            trading_mode: TradingMode::Paper,
            trading_type: TradingType::Spot,
            initial_capital: Decimal::from(25_000),
            forked_from_id: None,
        },
    ];

    let mut created = 0usize;
    for new in &defaults {
        if repo.find_by_name(&new.name)?.is_some() {
            continue;
        }
        let id = repo.insert(new)?;
        info!(council_id = id, name = %new.name, "seeded system council");
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.session().await;
        assert_eq!(seed_system_councils(&conn).unwrap(), 4);
        assert_eq!(seed_system_councils(&conn).unwrap(), 0);

        let councils = CouncilRepo::new(&conn).list_system_active().unwrap();
        assert_eq!(councils.len(), 4);
        assert!(councils.iter().any(|c| c.trading_type == TradingType::Spot));
        assert!(councils
            .iter()
            .all(|c| c.trading_mode == TradingMode::Paper && c.is_system));
    }
}
