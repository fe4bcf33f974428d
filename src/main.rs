use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use walter::cli::Cli;
use walter::config::AppConfig;
use walter::coordination::{install_signal_handlers, GracefulShutdown};
use walter::domain::CycleOutcome;
use walter::runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;
    runtime::init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }

    let dry_run = cli.effective_dry_run(config.dry_run.enabled);
    if dry_run {
        info!("Dry run mode: orders are built and recorded but never sent");
    }

    let store = runtime::connect_store(&config)
        .await
        .context("connecting to PostgreSQL")?;
    let mut scheduler = runtime::build_scheduler(&config, dry_run, store).await?;

    let shutdown = Arc::new(GracefulShutdown::new());
    install_signal_handlers(shutdown.clone());
    let token = shutdown.token();

    if cli.once {
        match scheduler.run_once(&token).await {
            CycleOutcome::Completed(record) => {
                info!("Single cycle finished: {}", record.decision.action)
            }
            CycleOutcome::Aborted { stage, reason } => {
                anyhow::bail!("cycle aborted at {}: {}", stage, reason)
            }
            CycleOutcome::Cancelled { stage } => info!("Cycle cancelled before {}", stage),
        }
        return Ok(());
    }

    scheduler.run(token).await?;
    info!("Shutdown complete");
    Ok(())
}
