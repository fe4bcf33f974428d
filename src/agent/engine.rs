//! Turns the cycle context into one model request and the reply into a
//! [`Decision`].

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::client::{extract_json, LlmClient};
use crate::agent::protocol::{DecisionContext, RawDecision, SYSTEM_PROMPT};
use crate::config::{LlmConfig, OrderConfig};
use crate::domain::{
    AccountSnapshot, Action, Decision, DecisionParse, MarketSnapshot, NarrativeDigest,
    TimeInForce, REASONING_UNAVAILABLE,
};

/// Order parameters applied when the model leaves them out
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionDefaults {
    pub size: Decimal,
    pub leverage: u32,
    pub tif: TimeInForce,
}

impl From<&OrderConfig> for DecisionDefaults {
    fn from(config: &OrderConfig) -> Self {
        Self {
            size: config.default_size,
            leverage: config.default_leverage.max(1),
            tif: config.default_tif,
        }
    }
}

pub struct DecisionEngine {
    llm: Arc<dyn LlmClient>,
    defaults: DecisionDefaults,
    confidence_threshold: f64,
    history_len: usize,
    history: VecDeque<Decision>,
}

impl DecisionEngine {
    pub fn new(llm: Arc<dyn LlmClient>, llm_config: &LlmConfig, order_config: &OrderConfig) -> Self {
        Self {
            llm,
            defaults: DecisionDefaults::from(order_config),
            confidence_threshold: llm_config.confidence_threshold,
            history_len: llm_config.history_len,
            history: VecDeque::with_capacity(llm_config.history_len),
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Replace the history window with persisted decisions (oldest first)
    pub fn seed_history(&mut self, decisions: Vec<Decision>) {
        self.history.clear();
        for decision in decisions {
            self.remember(decision);
        }
        debug!("Seeded decision history with {} entries", self.history.len());
    }

    pub fn history(&self) -> impl Iterator<Item = &Decision> {
        self.history.iter()
    }

    fn remember(&mut self, decision: Decision) {
        if self.history_len == 0 {
            return;
        }
        while self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(decision);
    }

    pub fn build_prompt(
        &self,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
        digest: &NarrativeDigest,
    ) -> String {
        DecisionContext {
            market,
            account,
            digest,
            history: self.history.iter().collect(),
        }
        .render()
    }

    /// Ask the model for a decision. Never fails: an unusable or missing
    /// reply becomes a hold. The decision is appended to the history window.
    pub async fn decide(
        &mut self,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
        digest: &NarrativeDigest,
    ) -> Decision {
        let prompt = self.build_prompt(market, account, digest);

        let decision = match self.llm.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => {
                let parsed = self.parse_response(&reply);
                if let DecisionParse::Malformed { reason, raw } = &parsed {
                    warn!("Malformed model reply ({}), holding: {}", reason, raw);
                }
                parsed.into_decision()
            }
            Err(e) => {
                warn!("LLM call failed, holding: {}", e);
                Decision::hold(REASONING_UNAVAILABLE)
            }
        };

        info!(
            "Decision: {} size={} leverage={} tif={} confidence={:.2}",
            decision.action, decision.size, decision.leverage, decision.tif, decision.confidence
        );
        self.remember(decision.clone());
        decision
    }

    pub fn parse_response(&self, reply: &str) -> DecisionParse {
        let malformed = |reason: String| DecisionParse::Malformed {
            reason,
            raw: reply.to_string(),
        };

        let raw: RawDecision = match serde_json::from_str(extract_json(reply)) {
            Ok(raw) => raw,
            Err(e) => return malformed(format!("not a JSON object: {}", e)),
        };

        let action = match raw.action.as_deref().map(Action::from_str) {
            Some(Ok(action)) => action,
            Some(Err(e)) => return malformed(e),
            None => return malformed("missing action".to_string()),
        };

        let confidence = match raw.confidence.as_ref().map(value_to_f64) {
            Some(Some(c)) if c.is_finite() => c.clamp(0.0, 1.0),
            Some(_) => return malformed("confidence is not a number".to_string()),
            None => 0.0,
        };

        let size = match raw.size.as_ref().filter(|v| !v.is_null()) {
            None => self.defaults.size,
            Some(v) => match value_to_decimal(v) {
                Some(size) if size >= Decimal::ZERO => size,
                _ => return malformed(format!("invalid size {}", v)),
            },
        };

        let leverage = match raw.leverage.as_ref().filter(|v| !v.is_null()) {
            None => self.defaults.leverage,
            Some(v) => match value_to_decimal(v).and_then(|d| d.round().to_u32()) {
                Some(leverage) => leverage.max(1),
                None => return malformed(format!("invalid leverage {}", v)),
            },
        };

        let tif = match raw.tif.as_deref().map(TimeInForce::from_str) {
            None => self.defaults.tif,
            Some(Ok(tif)) => tif,
            Some(Err(_)) => {
                debug!("Unknown tif {:?}, using default", raw.tif);
                self.defaults.tif
            }
        };

        DecisionParse::Parsed(Decision {
            action,
            size,
            leverage,
            tif,
            confidence,
            reasoning: raw.reasoning.unwrap_or_default().trim().to_string(),
            decided_at: Utc::now(),
        })
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(|v| {
            if s.trim().ends_with('%') {
                v / 100.0
            } else {
                v
            }
        }),
        _ => None,
    }
}

fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, WalterError};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(WalterError::Llm("no reply scripted".to_string())))
        }
    }

    fn engine(llm: Arc<dyn LlmClient>) -> DecisionEngine {
        let config = crate::config::AppConfig::defaults().unwrap();
        DecisionEngine::new(llm, &config.llm, &config.order)
    }

    fn context() -> (MarketSnapshot, AccountSnapshot, NarrativeDigest) {
        let market = crate::services::market_snapshot::tests::sample_snapshot();
        let account = AccountSnapshot::from_clearinghouse(
            "ETH",
            serde_json::json!({"marginSummary": {"accountValue": "1000"}, "withdrawable": "900", "assetPositions": []}),
            Utc::now(),
        )
        .unwrap();
        (market, account, NarrativeDigest::default())
    }

    #[test]
    fn test_parse_well_formed_reply() {
        let engine = engine(ScriptedLlm::new(vec![]));
        let parsed = engine.parse_response(
            r#"{"action": "buy", "confidence": 0.72, "size": 0.25, "leverage": 3, "tif": "Gtc", "reasoning": "EMA cross"}"#,
        );
        let DecisionParse::Parsed(decision) = parsed else {
            panic!("expected parsed decision");
        };
        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.confidence, 0.72);
        assert_eq!(decision.size, dec!(0.25));
        assert_eq!(decision.leverage, 3);
        assert_eq!(decision.tif, TimeInForce::Gtc);
        assert_eq!(decision.reasoning, "EMA cross");
    }

    #[test]
    fn test_parse_fills_defaults_and_clamps() {
        let engine = engine(ScriptedLlm::new(vec![]));
        let parsed = engine.parse_response(
            "Sure!\n```json\n{\"action\": \"SHORT\", \"confidence\": 1.7, \"reasoning\": \"x\"}\n```",
        );
        let DecisionParse::Parsed(decision) = parsed else {
            panic!("expected parsed decision");
        };
        assert_eq!(decision.action, Action::Sell);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.size, dec!(0.5));
        assert_eq!(decision.leverage, 1);
        assert_eq!(decision.tif, TimeInForce::Ioc);
    }

    #[test]
    fn test_parse_accepts_numeric_strings() {
        let engine = engine(ScriptedLlm::new(vec![]));
        let parsed = engine.parse_response(
            r#"{"action": "sell", "confidence": "65%", "size": "1.5", "leverage": "2"}"#,
        );
        let DecisionParse::Parsed(decision) = parsed else {
            panic!("expected parsed decision");
        };
        assert!((decision.confidence - 0.65).abs() < 1e-9);
        assert_eq!(decision.size, dec!(1.5));
        assert_eq!(decision.leverage, 2);
    }

    #[test]
    fn test_malformed_replies_hold() {
        let engine = engine(ScriptedLlm::new(vec![]));
        for reply in [
            "I would buy here",
            r#"{"confidence": 0.9}"#,
            r#"{"action": "moon", "confidence": 0.9}"#,
            r#"{"action": "buy", "confidence": "very"}"#,
            r#"{"action": "buy", "confidence": 0.9, "size": -1}"#,
        ] {
            let parsed = engine.parse_response(reply);
            assert!(!parsed.is_parsed(), "reply should be malformed: {}", reply);
            let decision = parsed.into_decision();
            assert_eq!(decision.action, Action::Hold);
            assert_eq!(decision.reasoning, REASONING_UNAVAILABLE);
        }
    }

    #[tokio::test]
    async fn test_llm_failure_holds_and_history_is_bounded() {
        let llm = ScriptedLlm::new(vec![
            Err(WalterError::Llm("timeout".to_string())),
            Ok(r#"{"action": "buy", "confidence": 0.9}"#.to_string()),
        ]);
        let mut engine = engine(llm.clone());
        let (market, account, digest) = context();

        let first = engine.decide(&market, &account, &digest).await;
        assert_eq!(first.action, Action::Hold);
        assert_eq!(first.reasoning, REASONING_UNAVAILABLE);

        let second = engine.decide(&market, &account, &digest).await;
        assert_eq!(second.action, Action::Buy);
        assert!(second.is_executable(engine.confidence_threshold()));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("None yet."));
        assert!(prompts[1].contains("[1]"));

        for _ in 0..10 {
            engine.remember(Decision::hold("filler"));
        }
        assert_eq!(engine.history().count(), 5);
    }

    #[test]
    fn test_seed_history_keeps_newest() {
        let mut engine = engine(ScriptedLlm::new(vec![]));
        let decisions: Vec<Decision> = (0..8)
            .map(|i| Decision::hold(&format!("d{}", i)))
            .collect();
        engine.seed_history(decisions);

        let reasons: Vec<&str> = engine.history().map(|d| d.reasoning.as_str()).collect();
        assert_eq!(reasons, vec!["d3", "d4", "d5", "d6", "d7"]);
    }

    #[test]
    fn test_prompt_contains_context_sections() {
        let engine = engine(ScriptedLlm::new(vec![]));
        let (market, account, digest) = context();
        let prompt = engine.build_prompt(&market, &account, &digest);
        assert!(prompt.contains("## Market snapshot (ETH"));
        assert!(prompt.contains("## Account"));
        assert!(prompt.contains("No major narratives"));
        assert!(prompt.contains("\"action\""));
    }
}
