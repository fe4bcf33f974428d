use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::domain::TimeInForce;

/// Main configuration structure, built once at start-up and passed by reference
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub market: MarketConfig,
    pub news: NewsConfig,
    pub narratives: NarrativeConfig,
    pub llm: LlmConfig,
    pub order: OrderConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which Hyperliquid deployment the signatures are produced for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// `source` field of the phantom agent
    pub fn agent_source(&self) -> &'static str {
        match self {
            Network::Mainnet => "a",
            Network::Testnet => "b",
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct ExchangeConfig {
    /// API root, `/info` and `/exchange` are appended
    pub base_url: String,
    pub network: Network,
    /// Address whose positions are read (the main account, not the API wallet)
    #[serde(default)]
    pub account_address: Option<String>,
    /// API wallet private key used to sign L1 actions
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub vault_address: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("base_url", &self.base_url)
            .field("network", &self.network)
            .field("account_address", &self.account_address)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("vault_address", &self.vault_address)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ExchangeConfig {
    pub fn info_url(&self) -> String {
        format!("{}/info", self.base_url.trim_end_matches('/'))
    }

    pub fn exchange_url(&self) -> String {
        format!("{}/exchange", self.base_url.trim_end_matches('/'))
    }
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Coin to trade (e.g., "ETH")
    pub coin: String,
    /// Candle interval requested from the exchange
    pub candle_interval: String,
    /// Candle look-back window
    pub history_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub cryptopanic: CryptoPanicConfig,
    pub cryptocompare: CryptoCompareConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoPanicConfig {
    pub enabled: bool,
    pub url: String,
    /// Source is skipped without a token
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub currencies: Option<String>,
    pub filter: String,
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoCompareConfig {
    pub enabled: bool,
    pub url: String,
    /// Works without a key at a lower rate limit
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub categories: Option<String>,
    #[serde(default)]
    pub feeds: Option<String>,
    pub sort_order: String,
}

#[derive(Clone, Deserialize)]
pub struct NarrativeConfig {
    /// OpenAI-compatible embeddings endpoint root
    pub embedding_url: String,
    /// Pinned sentence-embedding model
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_api_key: Option<String>,
    /// DBSCAN neighbourhood radius in cosine distance
    pub eps: f64,
    /// DBSCAN density threshold, the point itself included
    pub min_samples: usize,
    /// Body characters appended to the title before embedding
    pub body_chars: usize,
}

impl NarrativeConfig {
    /// The endpoint must be an http(s) URL with a model, and anything that is
    /// not a loopback server needs a key
    pub fn check_embedding_endpoint(&self) -> Result<(), String> {
        let url = reqwest::Url::parse(&self.embedding_url)
            .map_err(|e| format!("narratives.embedding_url is not a valid URL: {}", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err("narratives.embedding_url must use http or https".to_string());
        }
        if self.embedding_model.trim().is_empty() {
            return Err("narratives.embedding_model must not be empty".to_string());
        }

        let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]" | "::1"));
        let has_key = self.embedding_api_key.as_deref().map_or(false, |k| !k.is_empty());
        if !loopback && !has_key {
            return Err(format!(
                "narratives.embedding_api_key (or EMBEDDING_API_KEY) is required for remote endpoint {}",
                self.embedding_url
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for NarrativeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrativeConfig")
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_api_key", &self.embedding_api_key.as_ref().map(|_| "<redacted>"))
            .field("eps", &self.eps)
            .field("min_samples", &self.min_samples)
            .field("body_chars", &self.body_chars)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat-completions endpoint root
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Number of past decisions included in the prompt
    pub history_len: usize,
    /// Minimum confidence for a non-hold decision to be routed
    pub confidence_threshold: f64,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("history_len", &self.history_len)
            .field("confidence_threshold", &self.confidence_threshold)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfig {
    /// Size used when the model omits one
    pub default_size: Decimal,
    pub default_leverage: u32,
    pub default_tif: TimeInForce,
    /// Price allowance for marketable orders (e.g., 0.02 = 2%)
    pub slippage_pct: Decimal,
    /// Cross (true) or isolated (false) margin for leverage updates
    pub cross_margin: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Persist cycles (disable to run without PostgreSQL)
    pub enabled: bool,
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between cycle starts
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Enable dry run mode (orders are built but never signed or sent)
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rolling log files into this directory
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        for dotenv_file in [".env.local", ".env"] {
            let _ = dotenvy::from_filename(dotenv_file);
        }

        let builder = Self::with_defaults(Config::builder())?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("WALTER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (WALTER__MARKET__COIN, etc.)
            .add_source(Self::environment())
            // Well-known secret names take precedence
            .set_override_option("exchange.private_key", std::env::var("API_WALLET_PRIVATE_KEY").ok())?
            .set_override_option("exchange.account_address", std::env::var("GENERAL_PUBLIC_KEY").ok())?
            .set_override_option("database.url", std::env::var("PG_CONN_STR").ok())?
            .set_override_option("llm.api_key", std::env::var("OPENROUTER_API_KEY").ok())?
            .set_override_option("narratives.embedding_api_key", std::env::var("EMBEDDING_API_KEY").ok())?
            .set_override_option("news.cryptopanic.api_key", std::env::var("CP_CRYPTOPANIC_KEY").ok())?
            .set_override_option("news.cryptocompare.api_key", std::env::var("CC_CRYPTOCOMPARE_KEY").ok())?;

        builder.build()?.try_deserialize()
    }

    fn environment() -> Environment {
        Environment::with_prefix("WALTER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("exchange.base_url", "https://api.hyperliquid-testnet.xyz")?
            .set_default("exchange.network", "testnet")?
            .set_default("exchange.timeout_secs", 10)?
            .set_default("market.coin", "ETH")?
            .set_default("market.candle_interval", "1h")?
            .set_default("market.history_hours", 24)?
            .set_default("news.timeout_secs", 10)?
            .set_default("news.cryptopanic.enabled", true)?
            .set_default("news.cryptopanic.url", "https://cryptopanic.com/api/developer/v2/posts/")?
            .set_default("news.cryptopanic.currencies", "ETH")?
            .set_default("news.cryptopanic.filter", "important")?
            .set_default("news.cryptopanic.kind", "news")?
            .set_default("news.cryptocompare.enabled", true)?
            .set_default("news.cryptocompare.url", "https://min-api.cryptocompare.com/data/v2/news/")?
            .set_default("news.cryptocompare.categories", "ETH")?
            .set_default("news.cryptocompare.feeds", "cointelegraph,coindesk,decrypt")?
            .set_default("news.cryptocompare.sort_order", "popular")?
            .set_default("narratives.embedding_url", "http://127.0.0.1:8080/v1")?
            .set_default("narratives.embedding_model", "sentence-transformers/all-MiniLM-L6-v2")?
            .set_default("narratives.eps", 0.3)?
            .set_default("narratives.min_samples", 2)?
            .set_default("narratives.body_chars", 200)?
            .set_default("llm.base_url", "https://openrouter.ai/api/v1")?
            .set_default("llm.model", "openai/gpt-oss-20b:free")?
            .set_default("llm.temperature", 0.2)?
            .set_default("llm.max_tokens", 800)?
            .set_default("llm.timeout_secs", 60)?
            .set_default("llm.history_len", 5)?
            .set_default("llm.confidence_threshold", 0.55)?
            .set_default("order.default_size", "0.5")?
            .set_default("order.default_leverage", 1)?
            .set_default("order.default_tif", "Ioc")?
            .set_default("order.slippage_pct", "0.02")?
            .set_default("order.cross_margin", true)?
            .set_default("database.enabled", true)?
            .set_default("database.max_connections", 5)?
            .set_default("scheduler.interval_secs", 60)?
            .set_default("dry_run.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)
    }

    /// Static defaults only, no files or environment
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::with_defaults(Config::builder())?.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.market.coin.trim().is_empty() {
            errors.push("market.coin must not be empty".to_string());
        }

        if self.scheduler.interval_secs == 0 {
            errors.push("scheduler.interval_secs must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.llm.confidence_threshold) {
            errors.push("llm.confidence_threshold must be between 0 and 1".to_string());
        }

        if self.narratives.eps <= 0.0 || self.narratives.eps > 2.0 {
            errors.push("narratives.eps must be in (0, 2] (cosine distance)".to_string());
        }

        if let Err(problem) = self.narratives.check_embedding_endpoint() {
            errors.push(problem);
        }

        if self.narratives.min_samples == 0 {
            errors.push("narratives.min_samples must be at least 1".to_string());
        }

        if self.order.default_size <= Decimal::ZERO {
            errors.push("order.default_size must be positive".to_string());
        }

        if self.order.default_leverage == 0 {
            errors.push("order.default_leverage must be at least 1".to_string());
        }

        if self.order.slippage_pct < Decimal::ZERO || self.order.slippage_pct >= Decimal::new(5, 1) {
            errors.push("order.slippage_pct must be in [0, 0.5)".to_string());
        }

        if self.database.enabled && self.database.url.as_deref().map_or(true, str::is_empty) {
            errors.push("database.url (or PG_CONN_STR) is required when persistence is enabled".to_string());
        }

        if self.exchange.account_address.as_deref().map_or(true, str::is_empty) {
            errors.push("exchange.account_address (or GENERAL_PUBLIC_KEY) is required".to_string());
        }

        if !self.dry_run.enabled && self.exchange.private_key.as_deref().map_or(true, str::is_empty) {
            errors.push(
                "exchange.private_key (or API_WALLET_PRIVATE_KEY) is required for live trading"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
