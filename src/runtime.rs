//! Process start-up: logging, persistence and component wiring

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::{build_sources, CycleStore, HttpEmbedder, HyperliquidClient, PostgresStore};
use crate::agent::{DecisionEngine, OpenRouterClient};
use crate::config::{AppConfig, LoggingConfig};
use crate::error::{Result, WalterError};
use crate::narratives::NarrativeClusterer;
use crate::services::{CycleRunner, MarketSnapshotBuilder, NewsAggregator, OrderRouter, Scheduler};

const DEFAULT_FILTER: &str = "info,walter=debug,sqlx=warn";

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.level == "info" {
            EnvFilter::new(DEFAULT_FILTER)
        } else {
            EnvFilter::new(format!("{},sqlx=warn", config.level))
        }
    });

    // `rolling::daily` panics if it cannot create the first file, so check
    // the directory is writable before handing it over
    let file_layer = config.dir.as_deref().and_then(|dir| {
        let writable = std::fs::create_dir_all(dir).is_ok()
            && std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(std::path::Path::new(dir).join(".walter_write_test"))
                .is_ok();
        if !writable {
            eprintln!("Warning: could not write to log directory {}, file logging disabled", dir);
            return None;
        }
        let _ = std::fs::remove_file(std::path::Path::new(dir).join(".walter_write_test"));

        let (non_blocking, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "walter.log"));
        // Lives for the whole process
        Box::leak(Box::new(guard));
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// Connect and prepare the store. An unreachable database is fatal when
/// persistence is enabled.
pub async fn connect_store(config: &AppConfig) -> Result<Option<Arc<dyn CycleStore>>> {
    if !config.database.enabled {
        warn!("Persistence disabled, cycles will not be stored");
        return Ok(None);
    }
    let url = config
        .database
        .url
        .as_deref()
        .ok_or_else(|| WalterError::InvalidConfig("database.url is not set".to_string()))?;

    let store = PostgresStore::new(url, config.database.max_connections).await?;
    store.ensure_schema().await?;
    info!("Connected to PostgreSQL");
    Ok(Some(Arc::new(store)))
}

/// Wire every collaborator of the loop from configuration
pub async fn build_scheduler(
    config: &AppConfig,
    dry_run: bool,
    store: Option<Arc<dyn CycleStore>>,
) -> Result<Scheduler> {
    let exchange = Arc::new(HyperliquidClient::new(&config.exchange)?);
    if !dry_run && !exchange.can_sign() {
        return Err(WalterError::InvalidConfig(
            "live trading requires exchange.private_key".to_string(),
        ));
    }
    let account_address = config.exchange.account_address.as_deref().ok_or_else(|| {
        WalterError::InvalidConfig("exchange.account_address is not set".to_string())
    })?;

    let market = MarketSnapshotBuilder::new(exchange.clone(), &config.market);
    let news = NewsAggregator::new(build_sources(&config.news)?);
    let embedder = Arc::new(HttpEmbedder::new(&config.narratives, config.llm.timeout_secs)?);
    let clusterer = NarrativeClusterer::new(&config.narratives, embedder)?;
    let llm = Arc::new(OpenRouterClient::new(&config.llm)?);
    let engine = DecisionEngine::new(llm, &config.llm, &config.order);
    let router = OrderRouter::new(
        exchange,
        &config.market.coin,
        &config.order,
        config.llm.confidence_threshold,
        dry_run,
    );

    info!(
        "Trading {} on {:?} every {}s (dry run: {}, news sources: {:?})",
        config.market.coin,
        config.exchange.network,
        config.scheduler.interval_secs,
        dry_run,
        news.source_names()
    );

    let mut runner = CycleRunner::new(market, account_address, news, clusterer, engine, router, store);
    runner.seed_history(config.llm.history_len).await;

    Ok(Scheduler::new(
        runner,
        Duration::from_secs(config.scheduler.interval_secs),
    ))
}
