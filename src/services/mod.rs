//! Stages of the decision cycle and the loop that drives them

pub mod market_snapshot;
pub mod news_aggregator;
pub mod order_router;
pub mod scheduler;

pub use market_snapshot::{MarketInputs, MarketSnapshotBuilder};
pub use news_aggregator::NewsAggregator;
pub use order_router::{snap_to_tick, tick_size, OrderRouter, TickBias};
pub use scheduler::{CycleRunner, Scheduler};
