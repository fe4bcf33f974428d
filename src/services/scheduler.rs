//! The decision loop: one sequential cycle per interval until shutdown.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::CycleStore;
use crate::agent::DecisionEngine;
use crate::coordination::ShutdownToken;
use crate::domain::{CycleOutcome, CycleRecord, CycleStage, SchedulerState};
use crate::error::{Result, WalterError};
use crate::narratives::NarrativeClusterer;
use crate::services::{MarketSnapshotBuilder, NewsAggregator, OrderRouter};

/// Runs the steps of a single cycle
pub struct CycleRunner {
    market: MarketSnapshotBuilder,
    account_address: String,
    news: NewsAggregator,
    clusterer: NarrativeClusterer,
    engine: DecisionEngine,
    router: OrderRouter,
    store: Option<Arc<dyn CycleStore>>,
}

impl CycleRunner {
    pub fn new(
        market: MarketSnapshotBuilder,
        account_address: &str,
        news: NewsAggregator,
        clusterer: NarrativeClusterer,
        engine: DecisionEngine,
        router: OrderRouter,
        store: Option<Arc<dyn CycleStore>>,
    ) -> Self {
        Self {
            market,
            account_address: account_address.to_string(),
            news,
            clusterer,
            engine,
            router,
            store,
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Load the newest persisted decisions into the prompt history
    pub async fn seed_history(&mut self, limit: usize) {
        let Some(store) = &self.store else {
            return;
        };
        match store.recent_decisions(limit).await {
            Ok(decisions) => {
                info!("Loaded {} previous decisions", decisions.len());
                self.engine.seed_history(decisions);
            }
            Err(e) => warn!("Could not load decision history, starting empty: {}", e),
        }
    }

    /// Run every step in order. The shutdown token is checked before each
    /// step. Cycles stopped before a decision exists persist nothing.
    #[instrument(skip_all)]
    pub async fn run_cycle(&mut self, token: &ShutdownToken) -> CycleOutcome {
        let cycle_at = Utc::now();
        info!("Cycle started at {}", cycle_at.to_rfc3339());

        if let Some(cancelled) = checkpoint(token, CycleStage::Market) {
            return cancelled;
        }
        let market = match self.market.fetch(cycle_at).await {
            Ok(snapshot) => snapshot,
            Err(e) => return abort(CycleStage::Market, e),
        };

        if let Some(cancelled) = checkpoint(token, CycleStage::Account) {
            return cancelled;
        }
        let account = match self.market.fetch_account(&self.account_address, cycle_at).await {
            Ok(account) => account,
            Err(e) => return abort(CycleStage::Account, e),
        };

        if let Some(cancelled) = checkpoint(token, CycleStage::News) {
            return cancelled;
        }
        let articles = match self.news.collect().await {
            Ok(articles) => articles,
            Err(e) => return abort(CycleStage::News, e),
        };

        if let Some(cancelled) = checkpoint(token, CycleStage::Narratives) {
            return cancelled;
        }
        let digest = self.clusterer.summarize(&articles).await;

        if let Some(cancelled) = checkpoint(token, CycleStage::Decision) {
            return cancelled;
        }
        let decision = self.engine.decide(&market, &account, &digest).await;

        let mut record = CycleRecord {
            cycle_at,
            market,
            account,
            digest,
            article_count: articles.len(),
            decision,
            order: None,
        };

        // The decision is already in the engine's history, so it is stored
        // even when shutdown stops the cycle before routing.
        if let Some(cancelled) = checkpoint(token, CycleStage::Order) {
            self.persist(&record).await;
            return cancelled;
        }
        record.order = self.router.route(&record.decision, &record.account).await;

        // An order may already be live, so the cycle is recorded even if
        // shutdown arrived while routing.
        self.persist(&record).await;

        info!(
            "Cycle complete: {} (order: {})",
            record.decision.action,
            record
                .order
                .as_ref()
                .map_or("none", |attempt| attempt.status.as_str())
        );
        CycleOutcome::Completed(Box::new(record))
    }

    async fn persist(&self, record: &CycleRecord) {
        let Some(store) = &self.store else {
            debug!("Persistence disabled, cycle not stored");
            return;
        };
        if let Err(e) = store.record_cycle(record).await {
            error!("Failed to persist cycle {}: {}", record.cycle_at.to_rfc3339(), e);
        }
    }
}

fn checkpoint(token: &ShutdownToken, next: CycleStage) -> Option<CycleOutcome> {
    if token.is_shutdown_requested() {
        info!("Shutdown requested, stopping cycle before {}", next);
        Some(CycleOutcome::Cancelled { stage: next })
    } else {
        None
    }
}

fn abort(stage: CycleStage, err: WalterError) -> CycleOutcome {
    warn!("Cycle aborted at {} ({}): {}", stage, err.kind(), err);
    CycleOutcome::Aborted {
        stage,
        reason: err.to_string(),
    }
}

/// Drives [`CycleRunner`] at a fixed interval
pub struct Scheduler {
    runner: CycleRunner,
    interval: Duration,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(runner: CycleRunner, interval: Duration) -> Self {
        Self {
            runner,
            interval,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn runner(&self) -> &CycleRunner {
        &self.runner
    }

    fn transition(&mut self, target: SchedulerState) {
        if self.state.can_transition_to(target) {
            debug!("Scheduler {} -> {}", self.state, target);
            self.state = target;
        } else {
            warn!("Ignoring invalid scheduler transition {} -> {}", self.state, target);
        }
    }

    /// Run a single cycle
    pub async fn run_once(&mut self, token: &ShutdownToken) -> CycleOutcome {
        self.transition(SchedulerState::RunningCycle);
        let outcome = self.runner.run_cycle(token).await;
        self.transition(SchedulerState::Idle);
        outcome
    }

    /// Loop until shutdown. Cycle starts are `interval` apart; a cycle that
    /// overruns is followed immediately by the next one.
    pub async fn run(&mut self, token: ShutdownToken) -> Result<()> {
        info!("Scheduler starting, interval {:?}", self.interval);

        loop {
            if token.is_shutdown_requested() {
                break;
            }

            let started = Instant::now();
            let outcome = self.run_once(&token).await;
            if let CycleOutcome::Cancelled { .. } = outcome {
                break;
            }

            let remaining = self.interval.saturating_sub(started.elapsed());
            debug!("Next cycle in {:?}", remaining);
            if token.sleep(remaining).await {
                break;
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Embedder;
    use crate::agent::LlmClient;
    use crate::config::AppConfig;
    use crate::coordination::{GracefulShutdown, ShutdownSignal};
    use crate::domain::Decision;
    use crate::exchange::{MockMarketDataSource, MockOrderGateway};
    use async_trait::async_trait;

    struct NoEmbedder;

    #[async_trait]
    impl Embedder for NoEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(WalterError::Embedding("unused".to_string()))
        }
    }

    struct HoldLlm;

    #[async_trait]
    impl LlmClient for HoldLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(r#"{"action": "hold", "confidence": 0.1, "reasoning": "flat"}"#.to_string())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CycleStore for BrokenStore {
        async fn record_cycle(&self, _record: &CycleRecord) -> Result<()> {
            Err(WalterError::Internal("disk full".to_string()))
        }

        async fn recent_decisions(&self, _limit: usize) -> Result<Vec<Decision>> {
            Ok(vec![Decision::hold("seeded")])
        }
    }

    fn runner(source: MockMarketDataSource, store: Option<Arc<dyn CycleStore>>) -> CycleRunner {
        let config = AppConfig::defaults().unwrap();
        let mut gateway = MockOrderGateway::new();
        gateway.expect_place_order().times(0);

        CycleRunner::new(
            MarketSnapshotBuilder::new(Arc::new(source), &config.market),
            "0xabc",
            NewsAggregator::new(Vec::new()),
            NarrativeClusterer::new(&config.narratives, Arc::new(NoEmbedder)).unwrap(),
            DecisionEngine::new(Arc::new(HoldLlm), &config.llm, &config.order),
            OrderRouter::new(Arc::new(gateway), "ETH", &config.order, 0.55, true),
            store,
        )
    }

    fn healthy_source() -> MockMarketDataSource {
        let inputs = crate::services::market_snapshot::tests::sample_inputs();
        let mut source = MockMarketDataSource::new();
        let mids = inputs.mids.clone();
        source.expect_mid_prices().returning(move || Ok(mids.clone()));
        let candles = inputs.candles.clone();
        source
            .expect_candles()
            .returning(move |_, _, _, _| Ok(candles.clone()));
        let funding = inputs.funding.clone();
        source
            .expect_funding_history()
            .returning(move |_, _| Ok(funding.clone()));
        let (meta, contexts) = (inputs.meta.clone(), inputs.contexts.clone());
        source
            .expect_asset_contexts()
            .returning(move || Ok((meta.clone(), contexts.clone())));
        let trades = inputs.trades.clone();
        source
            .expect_recent_trades()
            .returning(move |_| Ok(trades.clone()));
        source.expect_account_state().returning(|_| {
            Ok(serde_json::json!({
                "marginSummary": {"accountValue": "1000.0", "totalNtlPos": "0.0",
                                  "totalRawUsd": "1000.0", "totalMarginUsed": "0.0"},
                "withdrawable": "1000.0",
                "assetPositions": []
            }))
        });
        source
    }

    #[tokio::test]
    async fn test_shutdown_before_start_cancels_without_fetching() {
        let mut source = MockMarketDataSource::new();
        source.expect_mid_prices().times(0);

        let shutdown = GracefulShutdown::new();
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let mut scheduler = Scheduler::new(runner(source, None), Duration::from_secs(60));
        let outcome = scheduler.run_once(&shutdown.token()).await;

        assert!(matches!(
            outcome,
            CycleOutcome::Cancelled {
                stage: CycleStage::Market
            }
        ));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_market_failure_aborts_cycle() {
        let mut source = MockMarketDataSource::new();
        source
            .expect_mid_prices()
            .returning(|| Err(WalterError::Internal("timeout".to_string())));
        source.expect_account_state().times(0);

        let mut runner = runner(source, None);
        let outcome = runner.run_cycle(&GracefulShutdown::new().token()).await;

        match outcome {
            CycleOutcome::Aborted { stage, reason } => {
                assert_eq!(stage, CycleStage::Market);
                assert!(reason.contains("allMids"));
            }
            other => panic!("expected abort, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_not_fatal() {
        let store: Arc<dyn CycleStore> = Arc::new(BrokenStore);
        let mut runner = runner(healthy_source(), Some(store));
        runner.seed_history(5).await;
        assert_eq!(runner.engine().history().count(), 1);

        let outcome = runner.run_cycle(&GracefulShutdown::new().token()).await;
        let record = outcome.record().unwrap();
        assert!(record.decision.action.is_hold());
        assert!(record.order.is_none());
        assert_eq!(record.article_count, 0);
        assert!(record.digest.is_empty());
        assert_eq!(runner.engine().history().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_shutdown_interrupts_sleep() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let mut scheduler = Scheduler::new(runner(healthy_source(), None), Duration::from_secs(60));

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            trigger.request_shutdown(ShutdownSignal::Graceful);
        });

        scheduler.run(shutdown.token()).await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}
