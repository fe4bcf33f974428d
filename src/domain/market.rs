use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle from the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: u64,
}

/// Taker-side pressure over the exchange's recent trades
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradePressure {
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub buy_count: u32,
    pub sell_count: u32,
    /// Buy share of total volume in percent, `None` when no trades were seen
    pub buy_pressure_pct: Option<f64>,
    pub sell_pressure_pct: Option<f64>,
    pub net_volume: f64,
    /// (buy - sell) / total in percent
    pub volume_delta_pct: Option<f64>,
}

impl TradePressure {
    pub fn total_volume(&self) -> f64 {
        self.buy_volume + self.sell_volume
    }
}

/// Normalized market view for one coin, built once per cycle
///
/// Every derived metric is optional: a missing upstream value is reported as
/// `None` instead of a zero that the model could mistake for data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub coin: String,
    pub mid_price: f64,
    pub mark_price: Option<f64>,
    pub oracle_price: Option<f64>,
    pub candle_interval: String,
    pub candles: Vec<Candle>,
    pub ema10: Option<f64>,
    pub ema20: Option<f64>,
    pub volatility_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub day_notional_volume: Option<f64>,
    pub funding_rate_latest: Option<f64>,
    pub funding_rate_avg: Option<f64>,
    pub open_interest: Option<f64>,
    pub trade_pressure: TradePressure,
    pub captured_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Closing prices of the candle window, oldest first
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Names of the derived fields that came back empty
    pub fn unavailable_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let checks: [(&'static str, bool); 9] = [
            ("mark_price", self.mark_price.is_none()),
            ("oracle_price", self.oracle_price.is_none()),
            ("ema10", self.ema10.is_none()),
            ("ema20", self.ema20.is_none()),
            ("volatility_24h", self.volatility_24h.is_none()),
            ("volume_24h", self.volume_24h.is_none()),
            ("funding_rate_latest", self.funding_rate_latest.is_none()),
            ("funding_rate_avg", self.funding_rate_avg.is_none()),
            ("open_interest", self.open_interest.is_none()),
        ];
        for (name, is_missing) in checks {
            if is_missing {
                missing.push(name);
            }
        }
        missing
    }
}
