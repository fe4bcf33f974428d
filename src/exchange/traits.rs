use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;

use crate::adapters::{AssetCtx, AssetInfo, ExchangeResponse, FundingEntry, RawCandle, RawTrade, UniverseMeta};
use crate::domain::OrderRequest;
use crate::error::Result;

/// Read-only exchange data used to build market and account snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Mid price of every listed coin, as decimal strings
    async fn mid_prices(&self) -> Result<HashMap<String, String>>;

    async fn candles(
        &self,
        coin: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<RawCandle>>;

    async fn funding_history(&self, coin: &str, start_ms: i64) -> Result<Vec<FundingEntry>>;

    /// Universe metadata and per-asset contexts, index aligned
    async fn asset_contexts(&self) -> Result<(UniverseMeta, Vec<AssetCtx>)>;

    async fn recent_trades(&self, coin: &str) -> Result<Vec<RawTrade>>;

    /// Raw clearinghouse state of an account
    async fn account_state(&self, user: &str) -> Result<Value>;
}

/// Signed exchange actions used by the order router
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn asset_info(&self, coin: &str) -> Result<AssetInfo>;

    /// Best bid and best ask
    async fn best_prices(&self, coin: &str) -> Result<(Option<Decimal>, Option<Decimal>)>;

    async fn update_leverage(
        &self,
        asset: u32,
        leverage: u32,
        is_cross: bool,
    ) -> Result<ExchangeResponse>;

    async fn place_order(&self, order: &OrderRequest) -> Result<ExchangeResponse>;
}
