use thiserror::Error;

/// Main error type for the decision loop
#[derive(Error, Debug)]
pub enum WalterError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream API error: {service} returned {status}: {body}")]
    Upstream {
        service: String,
        status: u16,
        body: String,
    },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Msgpack encoding error: {0}")]
    Msgpack(#[from] rmp_serde::encode::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    #[error("Account data unavailable: {0}")]
    AccountUnavailable(String),

    // News / narrative errors
    #[error("News unavailable: {0}")]
    NewsUnavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    // LLM errors
    #[error("LLM error: {0}")]
    Llm(String),

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    // Crypto/signing errors
    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Signature error: {0}")]
    Signature(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WalterError
pub type Result<T> = std::result::Result<T, WalterError>;

impl WalterError {
    /// Short stage-agnostic label used when recording aborted cycles
    pub fn kind(&self) -> &'static str {
        match self {
            WalterError::Config(_) | WalterError::InvalidConfig(_) => "config",
            WalterError::Database(_) => "database",
            WalterError::Http(_) | WalterError::Upstream { .. } => "network",
            WalterError::Json(_) | WalterError::Msgpack(_) => "serialization",
            WalterError::MarketDataUnavailable(_) | WalterError::InvalidMarketData(_) => "market",
            WalterError::AccountUnavailable(_) => "account",
            WalterError::NewsUnavailable(_) => "news",
            WalterError::Embedding(_) => "embedding",
            WalterError::Llm(_) => "llm",
            WalterError::OrderSubmission(_)
            | WalterError::OrderRejected(_)
            | WalterError::UnknownAsset(_) => "order",
            WalterError::Wallet(_) | WalterError::Signature(_) => "signing",
            WalterError::Io(_) => "io",
            WalterError::Cancelled => "cancelled",
            WalterError::Internal(_) | WalterError::Other(_) => "internal",
        }
    }
}
