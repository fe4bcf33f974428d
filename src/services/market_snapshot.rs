//! Builds the per-cycle market and account views from exchange info calls

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::{AssetCtx, FundingEntry, RawCandle, RawTrade, UniverseMeta};
use crate::config::MarketConfig;
use crate::domain::{AccountSnapshot, Candle, MarketSnapshot, TradePressure};
use crate::error::{Result, WalterError};
use crate::exchange::MarketDataSource;

/// Candles used for the indicators (24 x 1h = one day)
pub const INDICATOR_WINDOW: usize = 24;

/// Raw info responses for one coin
#[derive(Debug, Clone)]
pub struct MarketInputs {
    pub mids: HashMap<String, String>,
    pub candles: Vec<RawCandle>,
    pub funding: Vec<FundingEntry>,
    pub meta: UniverseMeta,
    pub contexts: Vec<AssetCtx>,
    pub trades: Vec<RawTrade>,
}

pub struct MarketSnapshotBuilder {
    source: Arc<dyn MarketDataSource>,
    coin: String,
    interval: String,
    history_hours: u32,
}

impl MarketSnapshotBuilder {
    pub fn new(source: Arc<dyn MarketDataSource>, config: &MarketConfig) -> Self {
        Self {
            source,
            coin: config.coin.clone(),
            interval: config.candle_interval.clone(),
            history_hours: config.history_hours,
        }
    }

    pub fn coin(&self) -> &str {
        &self.coin
    }

    /// Issue the info calls one after another and build the snapshot
    pub async fn fetch(&self, now: DateTime<Utc>) -> Result<MarketSnapshot> {
        let end_ms = now.timestamp_millis();
        let start_ms = (now - Duration::hours(self.history_hours as i64)).timestamp_millis();

        let mids = self
            .source
            .mid_prices()
            .await
            .map_err(|e| unavailable("allMids", e))?;
        let candles = self
            .source
            .candles(&self.coin, &self.interval, start_ms, end_ms)
            .await
            .map_err(|e| unavailable("candleSnapshot", e))?;
        let funding = self
            .source
            .funding_history(&self.coin, start_ms)
            .await
            .map_err(|e| unavailable("fundingHistory", e))?;
        let (meta, contexts) = self
            .source
            .asset_contexts()
            .await
            .map_err(|e| unavailable("metaAndAssetCtxs", e))?;
        let trades = self
            .source
            .recent_trades(&self.coin)
            .await
            .map_err(|e| unavailable("recentTrades", e))?;

        debug!(
            "Fetched {} candles, {} funding entries, {} trades for {}",
            candles.len(),
            funding.len(),
            trades.len(),
            self.coin
        );

        let snapshot = build_snapshot(
            &self.coin,
            &self.interval,
            MarketInputs {
                mids,
                candles,
                funding,
                meta,
                contexts,
                trades,
            },
            now,
        )?;

        info!(
            "Market snapshot {}: mid {:.4}, unavailable fields: {:?}",
            snapshot.coin,
            snapshot.mid_price,
            snapshot.unavailable_fields()
        );
        Ok(snapshot)
    }

    /// Clearinghouse state of `address`, focused on the traded coin
    pub async fn fetch_account(&self, address: &str, now: DateTime<Utc>) -> Result<AccountSnapshot> {
        let raw = self.source.account_state(address).await?;
        let account = AccountSnapshot::from_clearinghouse(&self.coin, raw, now)?;
        info!(
            "Account: value {:?}, {} position {}",
            account.account_value, account.position.side, account.position.size
        );
        Ok(account)
    }
}

fn unavailable(call: &str, err: WalterError) -> WalterError {
    WalterError::MarketDataUnavailable(format!("{}: {}", call, err))
}

/// Pure snapshot construction from already-fetched responses
pub fn build_snapshot(
    coin: &str,
    interval: &str,
    inputs: MarketInputs,
    captured_at: DateTime<Utc>,
) -> Result<MarketSnapshot> {
    let asset = inputs
        .meta
        .universe
        .iter()
        .position(|a| a.name.eq_ignore_ascii_case(coin))
        .ok_or_else(|| {
            WalterError::MarketDataUnavailable(format!("coin '{}' not found in universe", coin))
        })?;
    let ctx = inputs.contexts.get(asset).cloned().unwrap_or_default();

    let mid_price = inputs
        .mids
        .get(coin)
        .map(String::as_str)
        .or(ctx.mid_px.as_deref())
        .ok_or_else(|| WalterError::MarketDataUnavailable(format!("no mid price for '{}'", coin)))?;
    let mid_price = mid_price
        .parse::<f64>()
        .map_err(|_| WalterError::InvalidMarketData(format!("mid price '{}'", mid_price)))?;

    let mut candles: Vec<Candle> = inputs.candles.iter().filter_map(parse_candle).collect();
    candles.sort_by_key(|c| c.open_time);
    if candles.len() > INDICATOR_WINDOW {
        candles.drain(..candles.len() - INDICATOR_WINDOW);
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let mut funding = inputs.funding;
    funding.sort_by_key(|f| f.time);
    let rates: Vec<f64> = funding
        .iter()
        .filter_map(|f| f.funding_rate.parse::<f64>().ok())
        .collect();

    Ok(MarketSnapshot {
        coin: coin.to_string(),
        mid_price,
        mark_price: parse_opt(&ctx.mark_px),
        oracle_price: parse_opt(&ctx.oracle_px),
        candle_interval: interval.to_string(),
        ema10: ema(&closes, 10),
        ema20: ema(&closes, 20),
        volatility_24h: pct_change_std(&closes),
        volume_24h: if candles.is_empty() {
            None
        } else {
            Some(candles.iter().map(|c| c.volume).sum())
        },
        day_notional_volume: parse_opt(&ctx.day_ntl_vlm),
        funding_rate_latest: rates.last().copied(),
        funding_rate_avg: mean(&rates),
        open_interest: parse_opt(&ctx.open_interest),
        trade_pressure: trade_pressure(&inputs.trades),
        candles,
        captured_at,
    })
}

fn parse_opt(raw: &Option<String>) -> Option<f64> {
    raw.as_deref().and_then(|s| s.parse::<f64>().ok())
}

fn parse_candle(raw: &RawCandle) -> Option<Candle> {
    let parsed = (|| {
        Some(Candle {
            open_time: Utc.timestamp_millis_opt(raw.open_time).single()?,
            close_time: Utc.timestamp_millis_opt(raw.close_time).single()?,
            open: raw.open.parse().ok()?,
            high: raw.high.parse().ok()?,
            low: raw.low.parse().ok()?,
            close: raw.close.parse().ok()?,
            volume: raw.volume.parse().ok()?,
            trades: raw.trades,
        })
    })();
    if parsed.is_none() {
        warn!("Skipping unparseable candle at {}", raw.open_time);
    }
    parsed
}

/// Exponentially weighted mean with `adjust=True` weighting:
/// weights `(1 - alpha)^k` for the k-th most recent value, `alpha = 2 / (span + 1)`
pub fn ema(values: &[f64], span: usize) -> Option<f64> {
    if values.is_empty() || span == 0 {
        return None;
    }
    let decay = 1.0 - 2.0 / (span as f64 + 1.0);
    let mut weight = 1.0;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for value in values.iter().rev() {
        weighted_sum += weight * value;
        weight_total += weight;
        weight *= decay;
    }
    Some(weighted_sum / weight_total)
}

/// Sample standard deviation (ddof = 1) of consecutive percentage changes
pub fn pct_change_std(values: &[f64]) -> Option<f64> {
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let avg = mean(&returns)?;
    let variance =
        returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    Some(variance.sqrt())
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Taker-side volume split; side "B" is a taker buy, anything else a taker sell
pub fn trade_pressure(trades: &[RawTrade]) -> TradePressure {
    let mut pressure = TradePressure::default();
    for trade in trades {
        let Ok(size) = trade.sz.parse::<f64>() else {
            continue;
        };
        if trade.side == "B" {
            pressure.buy_volume += size;
            pressure.buy_count += 1;
        } else {
            pressure.sell_volume += size;
            pressure.sell_count += 1;
        }
    }

    let total = pressure.total_volume();
    pressure.net_volume = pressure.buy_volume - pressure.sell_volume;
    if total > 0.0 {
        pressure.buy_pressure_pct = Some(pressure.buy_volume / total * 100.0);
        pressure.sell_pressure_pct = Some(pressure.sell_volume / total * 100.0);
        pressure.volume_delta_pct = Some(pressure.net_volume / total * 100.0);
    }
    pressure
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::AssetMeta;
    use crate::exchange::MockMarketDataSource;
    use serde_json::json;

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn raw_candle(hour: i64, close: f64, volume: f64) -> RawCandle {
        let open_time = 1_700_000_000_000 + hour * 3_600_000;
        RawCandle {
            open_time,
            close_time: open_time + 3_599_999,
            open: close.to_string(),
            high: (close + 1.0).to_string(),
            low: (close - 1.0).to_string(),
            close: close.to_string(),
            volume: volume.to_string(),
            trades: 10,
        }
    }

    fn trade(side: &str, sz: &str) -> RawTrade {
        RawTrade {
            coin: "ETH".to_string(),
            side: side.to_string(),
            px: "3000".to_string(),
            sz: sz.to_string(),
            time: 0,
        }
    }

    pub(crate) fn sample_inputs() -> MarketInputs {
        MarketInputs {
            mids: HashMap::from([("ETH".to_string(), "3001.5".to_string())]),
            candles: (0..30).map(|h| raw_candle(h, 3000.0 + h as f64, 2.0)).collect(),
            funding: vec![
                FundingEntry {
                    coin: "ETH".to_string(),
                    funding_rate: "0.0001".to_string(),
                    premium: None,
                    time: 2,
                },
                FundingEntry {
                    coin: "ETH".to_string(),
                    funding_rate: "0.0003".to_string(),
                    premium: None,
                    time: 1,
                },
            ],
            meta: UniverseMeta {
                universe: vec![
                    AssetMeta {
                        name: "BTC".to_string(),
                        sz_decimals: 5,
                        max_leverage: 40,
                    },
                    AssetMeta {
                        name: "ETH".to_string(),
                        sz_decimals: 4,
                        max_leverage: 25,
                    },
                ],
            },
            contexts: vec![
                AssetCtx::default(),
                AssetCtx {
                    funding: Some("0.0001".to_string()),
                    open_interest: Some("12345.6".to_string()),
                    mark_px: Some("3001.0".to_string()),
                    mid_px: Some("3001.5".to_string()),
                    oracle_px: Some("3000.9".to_string()),
                    day_ntl_vlm: Some("987654.3".to_string()),
                },
            ],
            trades: vec![trade("B", "3"), trade("A", "1"), trade("B", "bad")],
        }
    }

    pub(crate) fn sample_snapshot() -> MarketSnapshot {
        build_snapshot("ETH", "1h", sample_inputs(), Utc::now()).unwrap()
    }

    #[test]
    fn test_ema_matches_adjusted_ewm() {
        // pandas: Series([1, 2, 3]).ewm(span=3).mean().iloc[-1] == 2.4285714...
        let value = ema(&[1.0, 2.0, 3.0], 3).unwrap();
        assert!(close_enough(value, 17.0 / 7.0));
        assert_eq!(ema(&[5.0], 10), Some(5.0));
        assert_eq!(ema(&[], 10), None);
    }

    #[test]
    fn test_pct_change_std_sample() {
        // returns: 0.1, -0.1 -> mean 0, sample variance 0.02
        let value = pct_change_std(&[100.0, 110.0, 99.0]).unwrap();
        assert!(close_enough(value, 0.02f64.sqrt()));
        assert_eq!(pct_change_std(&[100.0, 110.0]), None);
    }

    #[test]
    fn test_trade_pressure() {
        let pressure = trade_pressure(&[trade("B", "3"), trade("A", "1")]);
        assert_eq!(pressure.buy_count, 1);
        assert_eq!(pressure.sell_count, 1);
        assert_eq!(pressure.buy_pressure_pct, Some(75.0));
        assert_eq!(pressure.sell_pressure_pct, Some(25.0));
        assert_eq!(pressure.net_volume, 2.0);
        assert_eq!(pressure.volume_delta_pct, Some(50.0));

        let empty = trade_pressure(&[]);
        assert_eq!(empty.buy_pressure_pct, None);
        assert_eq!(empty.volume_delta_pct, None);
    }

    #[test]
    fn test_build_snapshot_uses_last_window() {
        let snapshot = sample_snapshot();
        assert_eq!(snapshot.mid_price, 3001.5);
        assert_eq!(snapshot.candles.len(), INDICATOR_WINDOW);
        assert_eq!(snapshot.candles[0].close, 3006.0);
        assert_eq!(snapshot.volume_24h, Some(48.0));
        assert_eq!(snapshot.funding_rate_latest, Some(0.0001));
        assert!(close_enough(snapshot.funding_rate_avg.unwrap(), 0.0002));
        assert_eq!(snapshot.open_interest, Some(12345.6));
        assert_eq!(snapshot.mark_price, Some(3001.0));
        assert_eq!(snapshot.trade_pressure.buy_count, 1);
        assert!(snapshot.unavailable_fields().is_empty());
    }

    #[test]
    fn test_missing_fields_are_none_not_zero() {
        let mut inputs = sample_inputs();
        inputs.candles.clear();
        inputs.funding.clear();
        inputs.trades.clear();
        inputs.contexts[1] = AssetCtx::default();

        let snapshot = build_snapshot("ETH", "1h", inputs, Utc::now()).unwrap();
        assert_eq!(snapshot.ema10, None);
        assert_eq!(snapshot.volatility_24h, None);
        assert_eq!(snapshot.volume_24h, None);
        assert_eq!(snapshot.funding_rate_avg, None);
        assert_eq!(snapshot.open_interest, None);
        assert_eq!(snapshot.trade_pressure.buy_pressure_pct, None);
        assert_eq!(snapshot.unavailable_fields().len(), 9);
    }

    #[test]
    fn test_unknown_coin_is_unavailable() {
        let err = build_snapshot("DOGE", "1h", sample_inputs(), Utc::now()).unwrap_err();
        assert!(matches!(err, WalterError::MarketDataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_propagates_source_failure() {
        let mut source = MockMarketDataSource::new();
        source.expect_mid_prices().returning(|| {
            Err(WalterError::Upstream {
                service: "hyperliquid/allMids".to_string(),
                status: 503,
                body: String::new(),
            })
        });

        let config = crate::config::AppConfig::defaults().unwrap().market;
        let builder = MarketSnapshotBuilder::new(Arc::new(source), &config);
        let err = builder.fetch(Utc::now()).await.unwrap_err();
        assert!(matches!(err, WalterError::MarketDataUnavailable(msg) if msg.starts_with("allMids")));
    }

    #[tokio::test]
    async fn test_fetch_account_focuses_on_coin() {
        let mut source = MockMarketDataSource::new();
        source.expect_account_state().returning(|_| {
            Ok(json!({
                "marginSummary": {"accountValue": "500.0", "totalMarginUsed": "50.0"},
                "withdrawable": "450.0",
                "assetPositions": [
                    {"position": {"coin": "ETH", "szi": "-0.5", "entryPx": "3100.0",
                                  "leverage": {"type": "cross", "value": 3}}}
                ]
            }))
        });

        let config = crate::config::AppConfig::defaults().unwrap().market;
        let builder = MarketSnapshotBuilder::new(Arc::new(source), &config);
        let account = builder.fetch_account("0xabc", Utc::now()).await.unwrap();
        assert_eq!(account.position.leverage, Some(3));
        assert_eq!(account.position.side, crate::domain::PositionSide::Short);
    }
}
