//! Environment-driven configuration.
//!
//! Every knob has a default; `from_env` overrides from the process
//! environment. The orchestrator reads sizing/threshold settings once at
//! cycle start and holds them constant for that cycle.

use std::time::Duration;

use rust_decimal::Decimal;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    /// Lock timeout applied via SQLite busy_timeout.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "pantheon.db".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_string("PANTHEON_DB_PATH") {
            cfg.path = v;
        }
        if let Some(v) = env_parse("PANTHEON_DB_BUSY_TIMEOUT_MS") {
            cfg.busy_timeout_ms = v;
        }
        cfg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenRouter,
    OpenAi,
    DeepSeek,
    Anthropic,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::OpenAi => "openai",
            LlmProvider::DeepSeek => "deepseek",
            LlmProvider::Anthropic => "anthropic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Some(Self::OpenRouter),
            "openai" => Some(Self::OpenAi),
            "deepseek" => Some(Self::DeepSeek),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub openrouter_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub request_timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenRouter,
            model: "deepseek/deepseek-chat-v3.1".to_string(),
            openrouter_api_key: None,
            openai_api_key: None,
            deepseek_api_key: None,
            anthropic_api_key: None,
            request_timeout: Duration::from_secs(30),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_string("LLM_PROVIDER").and_then(|s| LlmProvider::parse(&s)) {
            cfg.provider = v;
        }
        if let Some(v) = env_string("LLM_MODEL") {
            cfg.model = v;
        }
        cfg.openrouter_api_key = env_string("OPENROUTER_API_KEY");
        cfg.openai_api_key = env_string("OPENAI_API_KEY");
        cfg.deepseek_api_key = env_string("DEEPSEEK_API_KEY");
        cfg.anthropic_api_key = env_string("ANTHROPIC_API_KEY");
        if let Some(secs) = env_parse::<u64>("LLM_TIMEOUT_SECS") {
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = env_parse("LLM_MAX_TOKENS") {
            cfg.max_tokens = v;
        }
        if let Some(v) = env_parse("LLM_TEMPERATURE") {
            cfg.temperature = v;
        }
        cfg
    }

    pub fn api_key_for(&self, provider: LlmProvider) -> Option<&str> {
        match provider {
            LlmProvider::OpenRouter => self.openrouter_api_key.as_deref(),
            LlmProvider::OpenAi => self.openai_api_key.as_deref(),
            LlmProvider::DeepSeek => self.deepseek_api_key.as_deref(),
            LlmProvider::Anthropic => self.anthropic_api_key.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub futures_base_url: String,
    pub spot_base_url: String,
    pub request_timeout: Duration,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            futures_base_url: "https://fapi.binance.com".to_string(),
            spot_base_url: "https://api.binance.com".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl VenueConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_string("VENUE_FUTURES_BASE_URL") {
            cfg.futures_base_url = v;
        }
        if let Some(v) = env_string("VENUE_SPOT_BASE_URL") {
            cfg.spot_base_url = v;
        }
        if let Some(secs) = env_parse::<u64>("VENUE_TIMEOUT_SECS") {
            cfg.request_timeout = Duration::from_secs(secs);
        }
        cfg
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub schedule_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub consensus_threshold: Decimal,
    pub min_confidence_for_trade: Decimal,
    pub max_position_pct: Decimal,
    pub symbols: Vec<String>,
    /// Bound on concurrent (agent, symbol) LLM invocations within a cycle.
    pub agent_concurrency: usize,
    pub agent_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            schedule_interval_secs: 14_400,
            error_backoff_secs: 60,
            consensus_threshold: Decimal::new(6, 1),
            min_confidence_for_trade: Decimal::new(5, 1),
            max_position_pct: Decimal::new(2, 1),
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            agent_concurrency: 8,
            agent_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse("SCHEDULE_INTERVAL_SECONDS") {
            cfg.schedule_interval_secs = v;
        }
        if let Some(v) = env_parse("ERROR_BACKOFF_SECONDS") {
            cfg.error_backoff_secs = v;
        }
        if let Some(v) = env_parse::<Decimal>("CONSENSUS_THRESHOLD") {
            cfg.consensus_threshold = v;
        }
        if let Some(v) = env_parse::<Decimal>("MIN_CONFIDENCE_FOR_TRADE") {
            cfg.min_confidence_for_trade = v;
        }
        if let Some(v) = env_parse::<Decimal>("MAX_POSITION_PCT") {
            cfg.max_position_pct = v;
        }
        if let Some(v) = env_string("TRADING_SYMBOLS") {
            let parsed: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                cfg.symbols = parsed;
            }
        }
        if let Some(v) = env_parse("AGENT_CONCURRENCY") {
            cfg.agent_concurrency = v;
        }
        if let Some(secs) = env_parse::<u64>("AGENT_TIMEOUT_SECS") {
            cfg.agent_timeout = Duration::from_secs(secs);
        }
        cfg
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub venue: VenueConfig,
    pub orchestrator: OrchestratorConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::from_env(),
            llm: LlmConfig::from_env(),
            venue: VenueConfig::from_env(),
            orchestrator: OrchestratorConfig::from_env(),
        }
    }
}
