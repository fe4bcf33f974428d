mod traits;

pub use traits::{MarketDataSource, OrderGateway};

#[cfg(test)]
pub use traits::{MockMarketDataSource, MockOrderGateway};
