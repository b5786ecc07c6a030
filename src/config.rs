//! Config Registry (C1)
//! Mission: process-wide typed configuration with a hot-reloadable watchlist

use crate::models::{MarketRegion, Ticker};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn env_csv(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// API keys for a provider, loaded as a comma-separated pool.
#[derive(Debug, Clone, Default)]
pub struct KeyPoolConfig {
    pub keys: Vec<String>,
    pub cooldown: Duration,
}

/// Immutable process-wide configuration loaded once at boot.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub webui_host: String,
    pub webui_port: u16,

    pub trading_day_check_enabled: bool,
    pub enable_realtime_technical_indicators: bool,
    pub market_review_region: MarketRegion,
    pub news_max_age_days: i64,
    pub bias_threshold: f64,
    pub schedule_time: String,
    pub run_immediately: bool,
    pub report_summary_only: bool,
    pub merge_email_notification: bool,
    pub notify_chunk_limit: usize,

    pub agent_mode: bool,
    pub agent_max_steps: u32,
    pub agent_strategy_dir: String,
    /// Tool short-names the agent may call; empty means all registered tools.
    pub agent_skills: Vec<String>,

    pub batch_parallelism: usize,
    pub pipeline_deadline: Duration,

    pub tushare_token: Option<String>,
    pub realtime_source_priority: Vec<String>,
    pub source_priority_overrides: HashMap<String, i32>,

    pub bocha_api_keys: KeyPoolConfig,
    pub tavily_api_keys: KeyPoolConfig,
    pub serpapi_api_keys: KeyPoolConfig,

    pub gemini_api_keys: KeyPoolConfig,
    pub anthropic_api_keys: KeyPoolConfig,
    pub openai_api_keys: KeyPoolConfig,
    pub litellm_model: String,
    pub litellm_fallback_models: Vec<String>,

    pub admin_auth_enabled: bool,
    pub jwt_secret: String,

    pub stock_groups: HashMap<String, Vec<String>>,
    pub email_groups: HashMap<String, Vec<String>>,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let key_pool = |keys_var: &str, cooldown_var: &str, default_cooldown: u64| KeyPoolConfig {
            keys: env_csv(keys_var),
            cooldown: Duration::from_secs(env_parse(cooldown_var, default_cooldown)),
        };

        let mut source_priority_overrides = HashMap::new();
        for (k, v) in env::vars() {
            if let Some(source) = k.strip_suffix("_PRIORITY") {
                if let Ok(p) = v.parse::<i32>() {
                    source_priority_overrides.insert(source.to_lowercase(), p);
                }
            }
        }

        let mut stock_groups = HashMap::new();
        let mut email_groups = HashMap::new();
        for (k, v) in env::vars() {
            if let Some(n) = k.strip_prefix("STOCK_GROUP_") {
                stock_groups.insert(n.to_string(), env_csv(&k));
            }
            if let Some(n) = k.strip_prefix("EMAIL_GROUP_") {
                email_groups.insert(n.to_string(), env_csv(&k));
            }
            let _ = v;
        }

        let market_review_region = match env_or("MARKET_REVIEW_REGION", "both").as_str() {
            "cn" => MarketRegion::China,
            "us" => MarketRegion::UnitedStates,
            _ => MarketRegion::Both,
        };

        Ok(Self {
            database_path: env_or("DATABASE_PATH", "./dsa_analyst.db"),
            webui_host: env_or("WEBUI_HOST", "0.0.0.0"),
            webui_port: env_parse("WEBUI_PORT", 8080u16),

            trading_day_check_enabled: env_bool("TRADING_DAY_CHECK_ENABLED", true),
            enable_realtime_technical_indicators: env_bool(
                "ENABLE_REALTIME_TECHNICAL_INDICATORS",
                true,
            ),
            market_review_region,
            news_max_age_days: env_parse("NEWS_MAX_AGE_DAYS", 7i64),
            bias_threshold: env_parse("BIAS_THRESHOLD", 8.0f64),
            schedule_time: env_or("SCHEDULE_TIME", "09:00"),
            run_immediately: env_bool("RUN_IMMEDIATELY", false),
            report_summary_only: env_bool("REPORT_SUMMARY_ONLY", false),
            merge_email_notification: env_bool("MERGE_EMAIL_NOTIFICATION", false),
            notify_chunk_limit: env_parse("NOTIFY_CHUNK_LIMIT", 4096usize),

            agent_mode: env_bool("AGENT_MODE", false),
            agent_max_steps: env_parse("AGENT_MAX_STEPS", 6u32),
            agent_strategy_dir: env_or("AGENT_STRATEGY_DIR", "./strategies"),
            agent_skills: env_csv("AGENT_SKILLS"),

            batch_parallelism: env_parse("BATCH_PARALLELISM", 4usize),
            pipeline_deadline: Duration::from_secs(env_parse("PIPELINE_DEADLINE_SECS", 600u64)),

            tushare_token: env::var("TUSHARE_TOKEN").ok(),
            realtime_source_priority: env_csv("REALTIME_SOURCE_PRIORITY"),
            source_priority_overrides,

            bocha_api_keys: key_pool("BOCHA_API_KEYS", "BOCHA_COOLDOWN_SECS", 60),
            tavily_api_keys: key_pool("TAVILY_API_KEYS", "TAVILY_COOLDOWN_SECS", 60),
            serpapi_api_keys: key_pool("SERPAPI_API_KEYS", "SERPAPI_COOLDOWN_SECS", 60),

            gemini_api_keys: key_pool("GEMINI_API_KEYS", "GEMINI_COOLDOWN_SECS", 60),
            anthropic_api_keys: key_pool("ANTHROPIC_API_KEYS", "ANTHROPIC_COOLDOWN_SECS", 60),
            openai_api_keys: key_pool("OPENAI_API_KEYS", "OPENAI_COOLDOWN_SECS", 60),
            litellm_model: env_or("LITELLM_MODEL", "gemini-1.5-pro"),
            litellm_fallback_models: env_csv("LITELLM_FALLBACK_MODELS"),

            admin_auth_enabled: env_bool("ADMIN_AUTH_ENABLED", true),
            jwt_secret: env_or("JWT_SECRET", "dev-secret-change-me"),

            stock_groups,
            email_groups,
        })
    }
}

/// Process-wide registry: the immutable `Config` plus a hot-reloadable
/// watchlist. The scheduler always reads via `watchlist()` at the start of a
/// batch rather than caching it.
pub struct ConfigRegistry {
    pub config: Config,
    watchlist: RwLock<Vec<Ticker>>,
}

impl ConfigRegistry {
    pub fn new(config: Config) -> Self {
        let initial = Self::read_watchlist_from_env();
        Self {
            config,
            watchlist: RwLock::new(initial),
        }
    }

    fn read_watchlist_from_env() -> Vec<Ticker> {
        env_csv("STOCK_LIST")
            .into_iter()
            .map(|s| Ticker::canonical(&s))
            .collect()
    }

    /// Re-read the watchlist from its source (env var today; a file watch is a
    /// drop-in replacement for `read_watchlist_from_env`).
    pub fn reload(&self) {
        let fresh = Self::read_watchlist_from_env();
        *self.watchlist.write() = fresh;
    }

    pub fn watchlist(&self) -> Vec<Ticker> {
        self.watchlist.read().clone()
    }
}
