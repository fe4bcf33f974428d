use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Action requested by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Action::Hold)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(Action::Buy),
            "sell" | "short" => Ok(Action::Sell),
            "hold" | "wait" | "none" => Ok(Action::Hold),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Order lifetime policy, spelled the way the exchange expects it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Immediate or cancel (used for marketable orders)
    #[serde(alias = "ioc", alias = "IOC")]
    Ioc,
    /// Good till cancelled
    #[serde(alias = "gtc", alias = "GTC")]
    Gtc,
    /// Add liquidity only (post-only)
    #[serde(alias = "alo", alias = "ALO")]
    Alo,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Ioc => "Ioc",
            TimeInForce::Gtc => "Gtc",
            TimeInForce::Alo => "Alo",
        }
    }

    /// Whether the order should cross the spread immediately
    pub fn is_immediate(&self) -> bool {
        matches!(self, TimeInForce::Ioc)
    }
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimeInForce {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ioc" | "immediate_or_cancel" | "market" => Ok(TimeInForce::Ioc),
            "gtc" | "good_till_cancelled" | "limit" => Ok(TimeInForce::Gtc),
            "alo" | "post_only" => Ok(TimeInForce::Alo),
            other => Err(format!("unknown time-in-force '{}'", other)),
        }
    }
}

pub const REASONING_UNAVAILABLE: &str = "unavailable";

/// Structured trade decision, one per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub size: Decimal,
    pub leverage: u32,
    pub tif: TimeInForce,
    /// Model-reported certainty in [0, 1]
    pub confidence: f64,
    pub reasoning: String,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    /// Fallback decision used when the model's answer cannot be trusted
    pub fn hold(reasoning: &str) -> Self {
        Self {
            action: Action::Hold,
            size: Decimal::ZERO,
            leverage: 1,
            tif: TimeInForce::Ioc,
            confidence: 0.0,
            reasoning: reasoning.to_string(),
            decided_at: Utc::now(),
        }
    }

    /// A non-hold decision at or above the threshold may be routed
    pub fn is_executable(&self, confidence_threshold: f64) -> bool {
        !self.action.is_hold() && self.confidence >= confidence_threshold
    }
}

/// Outcome of parsing the model response
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionParse {
    Parsed(Decision),
    Malformed { reason: String, raw: String },
}

impl DecisionParse {
    pub fn is_parsed(&self) -> bool {
        matches!(self, DecisionParse::Parsed(_))
    }

    /// Collapse into a decision, holding when the response was unusable
    pub fn into_decision(self) -> Decision {
        match self {
            DecisionParse::Parsed(decision) => decision,
            DecisionParse::Malformed { .. } => Decision::hold(REASONING_UNAVAILABLE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_action_aliases() {
        assert_eq!("LONG".parse::<Action>().unwrap(), Action::Buy);
        assert_eq!(" short ".parse::<Action>().unwrap(), Action::Sell);
        assert_eq!("hold".parse::<Action>().unwrap(), Action::Hold);
        assert!("moon".parse::<Action>().is_err());
    }

    #[test]
    fn test_tif_parsing_and_wire_name() {
        assert_eq!("IOC".parse::<TimeInForce>().unwrap(), TimeInForce::Ioc);
        assert_eq!("gtc".parse::<TimeInForce>().unwrap(), TimeInForce::Gtc);
        assert_eq!(TimeInForce::Alo.as_str(), "Alo");
        let tif: TimeInForce = serde_json::from_str("\"gtc\"").unwrap();
        assert_eq!(tif, TimeInForce::Gtc);
    }

    #[test]
    fn test_confidence_gate() {
        let mut decision = Decision {
            action: Action::Buy,
            size: dec!(0.5),
            leverage: 2,
            tif: TimeInForce::Ioc,
            confidence: 0.54,
            reasoning: "momentum".to_string(),
            decided_at: Utc::now(),
        };
        assert!(!decision.is_executable(0.55));

        decision.confidence = 0.55;
        assert!(decision.is_executable(0.55));

        decision.action = Action::Hold;
        decision.confidence = 1.0;
        assert!(!decision.is_executable(0.55));
    }

    #[test]
    fn test_malformed_collapses_to_hold() {
        let parse = DecisionParse::Malformed {
            reason: "expected value".to_string(),
            raw: "BUY!!!".to_string(),
        };
        let decision = parse.into_decision();
        assert_eq!(decision.action, Action::Hold);
        assert_eq!(decision.reasoning, REASONING_UNAVAILABLE);
    }
}
