use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{Result, WalterError};

/// Direction of the open position on the traded coin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

impl PositionSide {
    pub fn from_signed_size(size: Decimal) -> Self {
        if size > Decimal::ZERO {
            PositionSide::Long
        } else if size < Decimal::ZERO {
            PositionSide::Short
        } else {
            PositionSide::Flat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
            PositionSide::Flat => "flat",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position held on the traded coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub coin: String,
    /// Signed size (negative = short)
    pub size: Decimal,
    pub side: PositionSide,
    pub entry_price: Option<Decimal>,
    pub leverage: Option<u32>,
    /// "cross" or "isolated"
    pub leverage_type: Option<String>,
    pub unrealized_pnl: Option<Decimal>,
    pub position_value: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
}

impl PositionInfo {
    pub fn flat(coin: &str) -> Self {
        Self {
            coin: coin.to_string(),
            size: Decimal::ZERO,
            side: PositionSide::Flat,
            entry_price: None,
            leverage: None,
            leverage_type: None,
            unrealized_pnl: None,
            position_value: None,
            liquidation_price: None,
        }
    }
}

/// Read-only account view fetched once per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_value: Option<Decimal>,
    pub total_notional: Option<Decimal>,
    pub total_raw_usd: Option<Decimal>,
    pub total_margin_used: Option<Decimal>,
    pub withdrawable: Option<Decimal>,
    pub position: PositionInfo,
    /// Number of open positions across all coins
    pub open_positions: usize,
    pub raw: Value,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseState {
    margin_summary: Option<MarginSummary>,
    withdrawable: Option<String>,
    #[serde(default)]
    asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginSummary {
    account_value: Option<String>,
    total_ntl_pos: Option<String>,
    total_raw_usd: Option<String>,
    total_margin_used: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssetPosition {
    position: RawPosition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    coin: String,
    szi: String,
    entry_px: Option<String>,
    position_value: Option<String>,
    unrealized_pnl: Option<String>,
    liquidation_px: Option<String>,
    leverage: Option<RawLeverage>,
}

#[derive(Debug, Deserialize)]
struct RawLeverage {
    #[serde(rename = "type")]
    kind: String,
    value: u32,
}

fn parse_dec(raw: &Option<String>) -> Option<Decimal> {
    raw.as_deref().and_then(|s| Decimal::from_str(s).ok())
}

impl AccountSnapshot {
    /// Build from a Hyperliquid `clearinghouseState` payload, keeping only the
    /// position on `coin` in structured form
    pub fn from_clearinghouse(coin: &str, raw: Value, captured_at: DateTime<Utc>) -> Result<Self> {
        let state: ClearinghouseState = serde_json::from_value(raw.clone()).map_err(|e| {
            WalterError::AccountUnavailable(format!("unexpected clearinghouseState shape: {}", e))
        })?;

        let summary = state.margin_summary.ok_or_else(|| {
            WalterError::AccountUnavailable("clearinghouseState has no marginSummary".to_string())
        })?;

        let open_positions = state
            .asset_positions
            .iter()
            .filter(|p| Decimal::from_str(&p.position.szi).map_or(false, |s| !s.is_zero()))
            .count();

        let position = state
            .asset_positions
            .iter()
            .find(|p| p.position.coin.eq_ignore_ascii_case(coin))
            .map(|p| {
                let raw = &p.position;
                let size = Decimal::from_str(&raw.szi).unwrap_or(Decimal::ZERO);
                PositionInfo {
                    coin: raw.coin.clone(),
                    size,
                    side: PositionSide::from_signed_size(size),
                    entry_price: parse_dec(&raw.entry_px),
                    leverage: raw.leverage.as_ref().map(|l| l.value),
                    leverage_type: raw.leverage.as_ref().map(|l| l.kind.clone()),
                    unrealized_pnl: parse_dec(&raw.unrealized_pnl),
                    position_value: parse_dec(&raw.position_value),
                    liquidation_price: parse_dec(&raw.liquidation_px),
                }
            })
            .unwrap_or_else(|| PositionInfo::flat(coin));

        Ok(Self {
            account_value: parse_dec(&summary.account_value),
            total_notional: parse_dec(&summary.total_ntl_pos),
            total_raw_usd: parse_dec(&summary.total_raw_usd),
            total_margin_used: parse_dec(&summary.total_margin_used),
            withdrawable: parse_dec(&state.withdrawable),
            position,
            open_positions,
            raw,
            captured_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample_state() -> Value {
        json!({
            "marginSummary": {
                "accountValue": "1012.55",
                "totalNtlPos": "1650.0",
                "totalRawUsd": "-637.45",
                "totalMarginUsed": "330.0"
            },
            "withdrawable": "682.55",
            "assetPositions": [
                {
                    "type": "oneWay",
                    "position": {
                        "coin": "ETH",
                        "szi": "-0.5",
                        "entryPx": "3300.0",
                        "positionValue": "1650.0",
                        "unrealizedPnl": "12.5",
                        "liquidationPx": "4100.2",
                        "leverage": { "type": "cross", "value": 5 }
                    }
                },
                {
                    "type": "oneWay",
                    "position": { "coin": "BTC", "szi": "0.0" }
                }
            ]
        })
    }

    #[test]
    fn test_parses_position_for_coin() {
        let snapshot = AccountSnapshot::from_clearinghouse("ETH", sample_state(), Utc::now()).unwrap();

        assert_eq!(snapshot.account_value, Some(dec!(1012.55)));
        assert_eq!(snapshot.withdrawable, Some(dec!(682.55)));
        assert_eq!(snapshot.position.size, dec!(-0.5));
        assert_eq!(snapshot.position.side, PositionSide::Short);
        assert_eq!(snapshot.position.leverage, Some(5));
        assert_eq!(snapshot.position.leverage_type.as_deref(), Some("cross"));
        assert_eq!(snapshot.position.unrealized_pnl, Some(dec!(12.5)));
        assert_eq!(snapshot.open_positions, 1);
    }

    #[test]
    fn test_missing_coin_is_flat() {
        let snapshot = AccountSnapshot::from_clearinghouse("SOL", sample_state(), Utc::now()).unwrap();
        assert_eq!(snapshot.position.side, PositionSide::Flat);
        assert_eq!(snapshot.position.size, Decimal::ZERO);
        assert_eq!(snapshot.position.leverage, None);
    }

    #[test]
    fn test_missing_margin_summary_is_error() {
        let err = AccountSnapshot::from_clearinghouse("ETH", json!({"assetPositions": []}), Utc::now())
            .unwrap_err();
        assert!(matches!(err, WalterError::AccountUnavailable(_)));
    }
}
