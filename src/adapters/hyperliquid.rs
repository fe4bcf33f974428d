//! Hyperliquid REST adapter (info + exchange endpoints).
//!
//! Info requests are unauthenticated `POST /info` calls. Exchange actions are
//! signed with the API wallet and sent to `POST /exchange`.

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::Address;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::{ExchangeConfig, Network};
use crate::domain::OrderRequest;
use crate::error::{Result, WalterError};
use crate::exchange::{MarketDataSource, OrderGateway};
use crate::signing::{sign_l1_action, Wallet, WireSignature};

// ==================== Info payloads ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCandle {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "n", default)]
    pub trades: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingEntry {
    pub coin: String,
    pub funding_rate: String,
    #[serde(default)]
    pub premium: Option<String>,
    pub time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    pub sz_decimals: u32,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
}

fn default_max_leverage() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseMeta {
    pub universe: Vec<AssetMeta>,
}

impl UniverseMeta {
    /// Resolve a coin to its asset index and trading constraints
    pub fn asset_info(&self, coin: &str) -> Option<AssetInfo> {
        self.universe
            .iter()
            .enumerate()
            .find(|(_, asset)| asset.name.eq_ignore_ascii_case(coin))
            .map(|(index, asset)| AssetInfo {
                index: index as u32,
                name: asset.name.clone(),
                sz_decimals: asset.sz_decimals,
                max_leverage: asset.max_leverage,
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    #[serde(default)]
    pub funding: Option<String>,
    #[serde(default)]
    pub open_interest: Option<String>,
    #[serde(default)]
    pub mark_px: Option<String>,
    #[serde(default)]
    pub mid_px: Option<String>,
    #[serde(default)]
    pub oracle_px: Option<String>,
    #[serde(default)]
    pub day_ntl_vlm: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTrade {
    pub coin: String,
    /// "B" = taker bought, "A" = taker sold
    pub side: String,
    pub px: String,
    pub sz: String,
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L2Level {
    pub px: String,
    pub sz: String,
    #[serde(default)]
    pub n: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L2Book {
    pub coin: String,
    /// `[bids, asks]`, best level first
    pub levels: Vec<Vec<L2Level>>,
}

impl L2Book {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.levels
            .first()
            .and_then(|side| side.first())
            .and_then(|level| Decimal::from_str(&level.px).ok())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.levels
            .get(1)
            .and_then(|side| side.first())
            .and_then(|level| Decimal::from_str(&level.px).ok())
    }
}

/// Index and constraints of one perpetual
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub index: u32,
    pub name: String,
    pub sz_decimals: u32,
    pub max_leverage: u32,
}

// ==================== Exchange payloads ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitWire {
    pub tif: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTypeWire {
    pub limit: LimitWire,
}

/// Field names and order are part of the signed msgpack payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderWire {
    pub a: u32,
    pub b: bool,
    pub p: String,
    pub s: String,
    pub r: bool,
    pub t: OrderTypeWire,
}

impl From<&OrderRequest> for OrderWire {
    fn from(order: &OrderRequest) -> Self {
        Self {
            a: order.asset,
            b: order.side.is_buy(),
            p: decimal_to_wire(order.limit_price),
            s: decimal_to_wire(order.size),
            r: order.reduce_only,
            t: OrderTypeWire {
                limit: LimitWire {
                    tif: order.tif.as_str().to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkOrder {
    pub orders: Vec<OrderWire>,
    pub grouping: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLeverage {
    pub asset: u32,
    pub is_cross: bool,
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExchangeAction {
    Order(BulkOrder),
    UpdateLeverage(UpdateLeverage),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest<'a> {
    action: &'a ExchangeAction,
    nonce: u64,
    signature: WireSignature,
    vault_address: Option<String>,
}

/// Raw `/exchange` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub status: String,
    #[serde(default)]
    pub response: Value,
}

/// Per-order acknowledgement inside an `order` reply
#[derive(Debug, Clone, PartialEq)]
pub enum OrderAck {
    Resting {
        oid: u64,
    },
    Filled {
        oid: u64,
        total_sz: Option<Decimal>,
        avg_px: Option<Decimal>,
    },
    Error(String),
}

impl ExchangeResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Top-level error text for `{"status": "err", "response": "..."}`
    pub fn error_message(&self) -> Option<String> {
        if self.is_ok() {
            return None;
        }
        Some(match &self.response {
            Value::String(msg) => msg.clone(),
            other => other.to_string(),
        })
    }

    pub fn order_acks(&self) -> Vec<OrderAck> {
        let statuses = self
            .response
            .pointer("/data/statuses")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        statuses
            .iter()
            .map(|status| {
                if let Some(resting) = status.get("resting") {
                    OrderAck::Resting {
                        oid: resting.get("oid").and_then(Value::as_u64).unwrap_or_default(),
                    }
                } else if let Some(filled) = status.get("filled") {
                    OrderAck::Filled {
                        oid: filled.get("oid").and_then(Value::as_u64).unwrap_or_default(),
                        total_sz: decimal_field(filled, "totalSz"),
                        avg_px: decimal_field(filled, "avgPx"),
                    }
                } else if let Some(error) = status.get("error").and_then(Value::as_str) {
                    OrderAck::Error(error.to_string())
                } else {
                    OrderAck::Error(format!("unrecognized order status: {}", status))
                }
            })
            .collect()
    }
}

fn decimal_field(value: &Value, key: &str) -> Option<Decimal> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| Decimal::from_str(s).ok())
}

/// Numbers on the wire are strings without trailing zeros
pub fn decimal_to_wire(value: Decimal) -> String {
    let normalized = value.normalize();
    if normalized.is_zero() {
        "0".to_string()
    } else {
        normalized.to_string()
    }
}

// ==================== Client ====================

#[derive(Clone)]
pub struct HyperliquidClient {
    http: Client,
    info_url: String,
    exchange_url: String,
    network: Network,
    wallet: Option<Wallet>,
    vault: Option<Address>,
}

impl HyperliquidClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("walter/0.1")
            .build()
            .map_err(|e| {
                WalterError::Internal(format!("failed to build Hyperliquid HTTP client: {}", e))
            })?;

        let wallet = match config.private_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Some(Wallet::from_private_key(key)?),
            _ => None,
        };

        let vault = config
            .vault_address
            .as_deref()
            .filter(|addr| !addr.trim().is_empty())
            .map(|addr| {
                addr.parse::<Address>()
                    .map_err(|e| WalterError::InvalidConfig(format!("invalid vault_address: {}", e)))
            })
            .transpose()?;

        Ok(Self {
            http,
            info_url: config.info_url(),
            exchange_url: config.exchange_url(),
            network: config.network,
            wallet,
            vault,
        })
    }

    pub fn can_sign(&self) -> bool {
        self.wallet.is_some()
    }

    async fn post_info<T: DeserializeOwned>(&self, body: Value) -> Result<T> {
        let request_type = body
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let response = self.http.post(&self.info_url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Hyperliquid info '{}' failed: {} - {}", request_type, status, body);
            return Err(WalterError::Upstream {
                service: format!("hyperliquid/{}", request_type),
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        debug!("Hyperliquid info '{}' returned {} bytes", request_type, text.len());
        serde_json::from_str(&text).map_err(|e| {
            WalterError::InvalidMarketData(format!("unexpected '{}' payload: {}", request_type, e))
        })
    }

    pub async fn meta(&self) -> Result<UniverseMeta> {
        self.post_info(json!({"type": "meta"})).await
    }

    pub async fn l2_book(&self, coin: &str) -> Result<L2Book> {
        self.post_info(json!({"type": "l2Book", "coin": coin})).await
    }

    async fn post_action(&self, action: &ExchangeAction) -> Result<ExchangeResponse> {
        let wallet = self.wallet.as_ref().ok_or_else(|| {
            WalterError::Wallet("no API wallet configured, cannot sign exchange actions".to_string())
        })?;

        let nonce = Utc::now().timestamp_millis() as u64;
        let signature = sign_l1_action(wallet, action, nonce, self.vault, self.network)?;

        let request = ExchangeRequest {
            action,
            nonce,
            signature: WireSignature::from(&signature),
            vault_address: self.vault.map(|addr| format!("{:?}", addr)),
        };

        let response = self
            .http
            .post(&self.exchange_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(WalterError::Upstream {
                service: "hyperliquid/exchange".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            WalterError::OrderSubmission(format!("unparseable exchange reply '{}': {}", body, e))
        })
    }
}

#[async_trait]
impl MarketDataSource for HyperliquidClient {
    #[instrument(skip(self))]
    async fn mid_prices(&self) -> Result<HashMap<String, String>> {
        self.post_info(json!({"type": "allMids"})).await
    }

    #[instrument(skip(self))]
    async fn candles(
        &self,
        coin: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<RawCandle>> {
        self.post_info(json!({
            "type": "candleSnapshot",
            "req": {
                "coin": coin,
                "interval": interval,
                "startTime": start_ms,
                "endTime": end_ms,
            }
        }))
        .await
    }

    #[instrument(skip(self))]
    async fn funding_history(&self, coin: &str, start_ms: i64) -> Result<Vec<FundingEntry>> {
        self.post_info(json!({"type": "fundingHistory", "coin": coin, "startTime": start_ms}))
            .await
    }

    #[instrument(skip(self))]
    async fn asset_contexts(&self) -> Result<(UniverseMeta, Vec<AssetCtx>)> {
        self.post_info(json!({"type": "metaAndAssetCtxs"})).await
    }

    #[instrument(skip(self))]
    async fn recent_trades(&self, coin: &str) -> Result<Vec<RawTrade>> {
        self.post_info(json!({"type": "recentTrades", "coin": coin})).await
    }

    #[instrument(skip(self))]
    async fn account_state(&self, user: &str) -> Result<Value> {
        self.post_info(json!({"type": "clearinghouseState", "user": user}))
            .await
            .map_err(|e| WalterError::AccountUnavailable(e.to_string()))
    }
}

#[async_trait]
impl OrderGateway for HyperliquidClient {
    #[instrument(skip(self))]
    async fn asset_info(&self, coin: &str) -> Result<AssetInfo> {
        self.meta()
            .await?
            .asset_info(coin)
            .ok_or_else(|| WalterError::UnknownAsset(coin.to_string()))
    }

    #[instrument(skip(self))]
    async fn best_prices(&self, coin: &str) -> Result<(Option<Decimal>, Option<Decimal>)> {
        let book = self.l2_book(coin).await?;
        Ok((book.best_bid(), book.best_ask()))
    }

    #[instrument(skip(self))]
    async fn update_leverage(
        &self,
        asset: u32,
        leverage: u32,
        is_cross: bool,
    ) -> Result<ExchangeResponse> {
        let action = ExchangeAction::UpdateLeverage(UpdateLeverage {
            asset,
            is_cross,
            leverage,
        });
        self.post_action(&action).await
    }

    #[instrument(skip(self), fields(coin = %order.coin, side = %order.side))]
    async fn place_order(&self, order: &OrderRequest) -> Result<ExchangeResponse> {
        let action = ExchangeAction::Order(BulkOrder {
            orders: vec![OrderWire::from(order)],
            grouping: "na".to_string(),
        });
        self.post_action(&action).await
    }
}
