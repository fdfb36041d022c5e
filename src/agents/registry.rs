//! Recognized analysis agents and roster resolution.
//!
//! Each council names its agents by key in the configuration blob; the
//! registry maps keys to personas with a role and a system prompt. Unknown
//! keys are skipped with a warning rather than failing the council.

use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::models::{AgentsConfig, ConnectionsConfig, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Technical,
    Sentiment,
    Persona,
    Risk,
    Analysis,
}

impl AgentRole {
    pub fn message_type(&self) -> MessageType {
        match self {
            AgentRole::Technical => MessageType::TechnicalAnalysis,
            AgentRole::Sentiment => MessageType::SentimentAnalysis,
            AgentRole::Persona => MessageType::PersonaAnalysis,
            AgentRole::Risk => MessageType::RiskAnalysis,
            AgentRole::Analysis => MessageType::Analysis,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "technical" | "technical_analysis" => Some(Self::Technical),
            "sentiment" | "sentiment_analysis" => Some(Self::Sentiment),
            "persona" | "persona_analysis" => Some(Self::Persona),
            "risk" | "risk_analysis" => Some(Self::Risk),
            "analysis" | "fundamental_analysis" => Some(Self::Analysis),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct AgentSpec {
    pub key: &'static str,
    pub display_name: &'static str,
    pub role: AgentRole,
    pub system_prompt: &'static str,
}

pub static AGENTS: &[AgentSpec] = &[
    AgentSpec {
        key: "satoshi_nakamoto",
        display_name: "Satoshi Nakamoto",
        role: AgentRole::Persona,
        system_prompt: "You are Satoshi Nakamoto, creator of Bitcoin. You evaluate crypto \
            assets through the lens of decentralization, sound money principles, network \
            security and long-term store-of-value potential. You distrust leverage and \
            centralized intermediaries and favour patient conviction positions.",
    },
    AgentSpec {
        key: "vitalik_buterin",
        display_name: "Vitalik Buterin",
        role: AgentRole::Persona,
        system_prompt: "You are Vitalik Buterin, co-founder of Ethereum. You analyze assets \
            by protocol design quality, developer activity, L2 scaling trajectories and \
            credible neutrality. You weigh technical fundamentals far above short-term \
            price narratives.",
    },
    AgentSpec {
        key: "michael_saylor",
        display_name: "Michael Saylor",
        role: AgentRole::Persona,
        system_prompt: "You are Michael Saylor, executive chairman of MicroStrategy. You view \
            Bitcoin as digital property and the apex treasury reserve asset. You favour \
            accumulating on weakness with high conviction and view fiat dilution as the \
            primary risk.",
    },
    AgentSpec {
        key: "cz_binance",
        display_name: "CZ (Changpeng Zhao)",
        role: AgentRole::Persona,
        system_prompt: "You are CZ, founder of Binance. You analyze markets through exchange \
            flows, liquidity depth, listing dynamics and user adoption across regions. You \
            are pragmatic about volatility and focus on where volume actually moves.",
    },
    AgentSpec {
        key: "elon_musk",
        display_name: "Elon Musk",
        role: AgentRole::Persona,
        system_prompt: "You are Elon Musk. You evaluate crypto assets through mainstream \
            adoption potential, memetic energy, payments utility and engineering first \
            principles. You are contrarian and comfortable with asymmetric bets.",
    },
    AgentSpec {
        key: "defi_agent",
        display_name: "DeFi Specialist",
        role: AgentRole::Analysis,
        system_prompt: "You are a DeFi protocol specialist. You analyze on-chain liquidity, \
            TVL trends, yield dynamics, token emissions and smart-contract risk to judge \
            directional opportunities in crypto assets.",
    },
    AgentSpec {
        key: "crypto_technical",
        display_name: "Technical Analyst",
        role: AgentRole::Technical,
        system_prompt: "You are a cryptocurrency technical analyst. You read trend structure, \
            momentum, RSI/MACD divergences, volume profiles and support/resistance levels, \
            and you produce precise entries with stop-loss and take-profit levels.",
    },
    AgentSpec {
        key: "crypto_sentiment",
        display_name: "Sentiment Analyst",
        role: AgentRole::Sentiment,
        system_prompt: "You are a cryptocurrency sentiment analyst. You weigh social media \
            momentum, news flow, funding rates and the fear & greed index to judge crowd \
            positioning and fade or follow it deliberately.",
    },
    AgentSpec {
        key: "crypto_analyst",
        display_name: "Crypto Analyst",
        role: AgentRole::Analysis,
        system_prompt: "You are a generalist cryptocurrency analyst. You combine market \
            structure, macro conditions, tokenomics and relative strength into a single \
            directional view with an explicit confidence.",
    },
];

pub fn lookup(key: &str) -> Option<&'static AgentSpec> {
    AGENTS.iter().find(|a| a.key == key)
}

/// Effective role for a roster entry: an explicit `role` in the config
/// overrides the registry default.
#[derive(Debug, Clone, Copy)]
pub struct RosterEntry {
    pub spec: &'static AgentSpec,
    pub role: AgentRole,
}

/// Resolve the council's configured agents into an execution roster.
///
/// System councils run agents in configuration order. Non-system councils
/// additionally interpret the connections graph: edges order execution via a
/// topological sort with configuration order as the tie-break. Cycles fall
/// back to configuration order for the remainder.
pub fn resolve_roster(
    council_id: i64,
    agents: &AgentsConfig,
    connections: &ConnectionsConfig,
    is_system: bool,
) -> Vec<RosterEntry> {
    let mut roster: Vec<RosterEntry> = Vec::new();
    for entry in &agents.agents {
        let Some(spec) = lookup(&entry.agent_key) else {
            warn!(council_id, agent_key = %entry.agent_key, "unrecognized agent key ignored");
            continue;
        };
        let role = entry
            .role
            .as_deref()
            .and_then(AgentRole::parse)
            .unwrap_or(spec.role);
        roster.push(RosterEntry { spec, role });
    }

    if is_system || connections.edges.is_empty() {
        return roster;
    }

    topo_order(roster, connections)
}

fn topo_order(roster: Vec<RosterEntry>, connections: &ConnectionsConfig) -> Vec<RosterEntry> {
    let index: HashMap<&str, usize> = roster
        .iter()
        .enumerate()
        .map(|(i, e)| (e.spec.key, i))
        .collect();

    let mut indegree = vec![0usize; roster.len()];
    let mut adjacent: Vec<Vec<usize>> = vec![Vec::new(); roster.len()];
    for edge in &connections.edges {
        let (Some(&from), Some(&to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) else {
            continue;
        };
        if from == to {
            continue;
        }
        adjacent[from].push(to);
        indegree[to] += 1;
    }

    let mut queue: VecDeque<usize> = (0..roster.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order: Vec<usize> = Vec::with_capacity(roster.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &adjacent[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    // remainder of a cyclic graph keeps configuration order
    if order.len() < roster.len() {
        for i in 0..roster.len() {
            if !order.contains(&i) {
                order.push(i);
            }
        }
    }

    let mut seen = vec![false; roster.len()];
    let mut out = Vec::with_capacity(roster.len());
    for i in order {
        if !seen[i] {
            seen[i] = true;
            out.push(roster[i]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentEntry, ConnectionEdge};

    fn config(keys: &[&str]) -> AgentsConfig {
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

    #[test]
    fn unknown_keys_are_skipped() {
        let roster = resolve_roster(
            1,
            &config(&["satoshi_nakamoto", "warren_buffett", "crypto_technical"]),
            &ConnectionsConfig::default(),
            true,
        );
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].spec.key, "satoshi_nakamoto");
        assert_eq!(roster[1].spec.key, "crypto_technical");
    }

    #[test]
    fn role_override_applies() {
        let cfg = AgentsConfig {
            agents: vec![AgentEntry {
                agent_key: "crypto_analyst".to_string(),
                role: Some("risk".to_string()),
            }],
        };
        let roster = resolve_roster(1, &cfg, &ConnectionsConfig::default(), true);
        assert_eq!(roster[0].role, AgentRole::Risk);
        assert_eq!(roster[0].role.message_type(), MessageType::RiskAnalysis);
    }

    #[test]
    fn connections_order_non_system_roster() {
        let connections = ConnectionsConfig {
            edges: vec![
                ConnectionEdge {
                    source: "crypto_sentiment".to_string(),
                    target: "crypto_technical".to_string(),
                },
                ConnectionEdge {
                    source: "crypto_technical".to_string(),
                    target: "crypto_analyst".to_string(),
                },
            ],
        };
        let roster = resolve_roster(
            1,
            &config(&["crypto_analyst", "crypto_technical", "crypto_sentiment"]),
            &connections,
            false,
        );
        let keys: Vec<&str> = roster.iter().map(|e| e.spec.key).collect();
        assert_eq!(keys, vec!["crypto_sentiment", "crypto_technical", "crypto_analyst"]);
    }

    #[test]
    fn cyclic_connections_fall_back_to_config_order() {
        let connections = ConnectionsConfig {
            edges: vec![
                ConnectionEdge {
                    source: "crypto_technical".to_string(),
                    target: "crypto_sentiment".to_string(),
                },
                ConnectionEdge {
                    source: "crypto_sentiment".to_string(),
                    target: "crypto_technical".to_string(),
                },
            ],
        };
        let roster = resolve_roster(
            1,
            &config(&["crypto_technical", "crypto_sentiment"]),
            &connections,
            false,
        );
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].spec.key, "crypto_technical");
    }
}
