use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Action, Decision, TimeInForce};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn from_action(action: Action) -> Option<Self> {
        match action {
            Action::Buy => Some(OrderSide::Buy),
            Action::Sell => Some(OrderSide::Sell),
            Action::Hold => None,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// How the price was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Crosses the spread with a slippage allowance (IOC)
    Market,
    /// Rests at the mid (GTC / ALO)
    Limit,
}

impl OrderKind {
    pub fn for_tif(tif: TimeInForce) -> Self {
        if tif.is_immediate() {
            OrderKind::Market
        } else {
            OrderKind::Limit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "market",
            OrderKind::Limit => "limit",
        }
    }
}

/// Order status as reported back by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Fully or partially filled on arrival
    Filled,
    /// Resting on the book
    Resting,
    /// Rejected by the exchange
    Rejected,
    /// Never reached the exchange (transport, signing, validation)
    Failed,
    /// Built in dry-run mode, not sent
    Simulated,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Filled => "FILLED",
            OrderStatus::Resting => "RESTING",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Simulated => "SIMULATED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Resting | OrderStatus::Simulated
        )
    }
}

/// Order parameters after tick-size, size and leverage adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub coin: String,
    pub asset: u32,
    pub side: OrderSide,
    pub size: Decimal,
    pub limit_price: Decimal,
    pub tif: TimeInForce,
    pub kind: OrderKind,
    pub leverage: u32,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Notional value at the limit price
    pub fn notional(&self) -> Decimal {
        self.size * self.limit_price
    }
}

/// Record of one routing attempt for an executable decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAttempt {
    pub coin: String,
    pub decision_action: Action,
    pub decision_confidence: f64,
    pub requested_size: Decimal,
    /// Parameters actually submitted; `None` when routing failed before pricing
    pub request: Option<OrderRequest>,
    pub leverage_updated: bool,
    pub status: OrderStatus,
    pub exchange_order_id: Option<u64>,
    pub filled_size: Option<Decimal>,
    pub avg_fill_price: Option<Decimal>,
    pub error: Option<String>,
    pub raw_response: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl OrderAttempt {
    pub fn new(coin: &str, decision: &Decision) -> Self {
        Self {
            coin: coin.to_string(),
            decision_action: decision.action,
            decision_confidence: decision.confidence,
            requested_size: decision.size,
            request: None,
            leverage_updated: false,
            status: OrderStatus::Failed,
            exchange_order_id: None,
            filled_size: None,
            avg_fill_price: None,
            error: None,
            raw_response: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = OrderStatus::Failed;
        self.error = Some(error.into());
        self
    }

    pub fn is_buy(&self) -> bool {
        matches!(self.decision_action, Action::Buy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_side_from_action() {
        assert_eq!(OrderSide::from_action(Action::Buy), Some(OrderSide::Buy));
        assert_eq!(OrderSide::from_action(Action::Sell), Some(OrderSide::Sell));
        assert_eq!(OrderSide::from_action(Action::Hold), None);
    }

    #[test]
    fn test_order_kind_follows_tif() {
        assert_eq!(OrderKind::for_tif(TimeInForce::Ioc), OrderKind::Market);
        assert_eq!(OrderKind::for_tif(TimeInForce::Gtc), OrderKind::Limit);
        assert_eq!(OrderKind::for_tif(TimeInForce::Alo), OrderKind::Limit);
    }

    #[test]
    fn test_failed_attempt_keeps_decision_link() {
        let decision = Decision {
            action: Action::Sell,
            size: dec!(0.25),
            leverage: 3,
            tif: TimeInForce::Gtc,
            confidence: 0.8,
            reasoning: "funding flipped".to_string(),
            decided_at: Utc::now(),
        };
        let attempt = OrderAttempt::new("ETH", &decision).failed("meta unavailable");

        assert_eq!(attempt.status, OrderStatus::Failed);
        assert_eq!(attempt.decision_action, Action::Sell);
        assert_eq!(attempt.requested_size, dec!(0.25));
        assert!(attempt.request.is_none());
        assert!(!attempt.status.is_success());
    }

    #[test]
    fn test_notional() {
        let request = OrderRequest {
            coin: "ETH".to_string(),
            asset: 1,
            side: OrderSide::Buy,
            size: dec!(0.5),
            limit_price: dec!(3300.1),
            tif: TimeInForce::Ioc,
            kind: OrderKind::Market,
            leverage: 2,
            reduce_only: false,
        };
        assert_eq!(request.notional(), dec!(1650.05));
    }
}
