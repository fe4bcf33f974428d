//! Prompt context and response schema exchanged with the decision model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

use crate::domain::{AccountSnapshot, Decision, MarketSnapshot, NarrativeDigest};

pub const SYSTEM_PROMPT: &str = "You are a disciplined crypto perpetual-futures trader. \
You receive a market snapshot, the account state, clustered news narratives and your own \
recent decisions. Decide whether to buy, sell or hold. Respond with a single JSON object \
and nothing else.";

pub const RESPONSE_INSTRUCTIONS: &str = r#"Respond with exactly this JSON object:
{
  "action": "buy" | "sell" | "hold",
  "confidence": number between 0 and 1,
  "size": position size in coin units (number),
  "leverage": integer >= 1,
  "tif": "Ioc" | "Gtc" | "Alo",
  "reasoning": short explanation
}"#;

const MAX_BODY_CHARS: usize = 280;
const MAX_REASONING_CHARS: usize = 200;

/// Everything the model sees in one request
#[derive(Debug, Clone)]
pub struct DecisionContext<'a> {
    pub market: &'a MarketSnapshot,
    pub account: &'a AccountSnapshot,
    pub digest: &'a NarrativeDigest,
    /// Oldest first
    pub history: Vec<&'a Decision>,
}

impl<'a> DecisionContext<'a> {
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_market(&mut out);
        self.render_account(&mut out);
        self.render_news(&mut out);
        self.render_history(&mut out);
        out.push('\n');
        out.push_str(RESPONSE_INSTRUCTIONS);
        out
    }

    fn render_market(&self, out: &mut String) {
        let m = self.market;
        let p = &m.trade_pressure;
        let _ = writeln!(out, "## Market snapshot ({}, {})", m.coin, m.captured_at.to_rfc3339());
        let _ = writeln!(
            out,
            "Mid: {:.4} | Mark: {} | Oracle: {}",
            m.mid_price,
            opt(m.mark_price, 4),
            opt(m.oracle_price, 4)
        );
        let _ = writeln!(out, "EMA10: {} | EMA20: {}", opt(m.ema10, 4), opt(m.ema20, 4));
        let _ = writeln!(
            out,
            "24h volatility (std of {} returns): {} | 24h volume: {} | Day notional volume: {}",
            m.candle_interval,
            opt(m.volatility_24h, 6),
            opt(m.volume_24h, 2),
            opt(m.day_notional_volume, 2)
        );
        let _ = writeln!(
            out,
            "Funding latest: {} | Funding avg: {} | Open interest: {}",
            opt(m.funding_rate_latest, 8),
            opt(m.funding_rate_avg, 8),
            opt(m.open_interest, 2)
        );
        let _ = writeln!(
            out,
            "Trade pressure: buy {}% / sell {}% | buys {} sells {} | net volume {:.4} | volume delta {}%",
            opt(p.buy_pressure_pct, 2),
            opt(p.sell_pressure_pct, 2),
            p.buy_count,
            p.sell_count,
            p.net_volume,
            opt(p.volume_delta_pct, 2)
        );
        let closes: Vec<String> = m.closes().iter().map(|c| format!("{:.2}", c)).collect();
        if closes.is_empty() {
            let _ = writeln!(out, "Recent {} closes: unavailable", m.candle_interval);
        } else {
            let _ = writeln!(
                out,
                "Recent {} closes (oldest first): {}",
                m.candle_interval,
                closes.join(", ")
            );
        }
        out.push('\n');
    }

    fn render_account(&self, out: &mut String) {
        let a = self.account;
        let pos = &a.position;
        let _ = writeln!(out, "## Account");
        let _ = writeln!(
            out,
            "Account value: {} | Margin used: {} | Withdrawable: {} | Total notional: {} | Open positions: {}",
            opt_dec(a.account_value),
            opt_dec(a.total_margin_used),
            opt_dec(a.withdrawable),
            opt_dec(a.total_notional),
            a.open_positions
        );
        let _ = writeln!(
            out,
            "Position on {}: {} {} @ entry {} | leverage {} ({}) | unrealized PnL {} | liquidation {}",
            pos.coin,
            pos.side,
            pos.size.abs(),
            opt_dec(pos.entry_price),
            pos.leverage.map_or_else(|| "unavailable".to_string(), |l| format!("{}x", l)),
            pos.leverage_type.as_deref().unwrap_or("n/a"),
            opt_dec(pos.unrealized_pnl),
            opt_dec(pos.liquidation_price)
        );
        out.push('\n');
    }

    fn render_news(&self, out: &mut String) {
        let _ = writeln!(out, "## News narratives");
        if self.digest.narratives.is_empty() {
            let _ = writeln!(out, "No major narratives this cycle.");
        }
        for narrative in &self.digest.narratives {
            let _ = writeln!(
                out,
                "- {}: {}",
                narrative.headline(),
                truncate(&narrative.body, MAX_BODY_CHARS)
            );
        }
        if !self.digest.secondary_signals.is_empty() {
            let _ = writeln!(out, "Secondary signals:");
            for signal in &self.digest.secondary_signals {
                let _ = writeln!(out, "- [Secondary Signal] {}", signal.title);
            }
        }
        out.push('\n');
    }

    fn render_history(&self, out: &mut String) {
        let _ = writeln!(out, "## Your recent decisions (oldest first)");
        if self.history.is_empty() {
            let _ = writeln!(out, "None yet.");
        }
        for (i, decision) in self.history.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{}] {} {} size={} leverage={} tif={} confidence={:.2}: {}",
                i + 1,
                decision.decided_at.format("%Y-%m-%d %H:%M"),
                decision.action,
                decision.size.normalize(),
                decision.leverage,
                decision.tif,
                decision.confidence,
                truncate(&decision.reasoning, MAX_REASONING_CHARS)
            );
        }
    }
}

/// JSON object the model is asked to produce. Numbers are accepted as
/// numbers or numeric strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDecision {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub confidence: Option<Value>,
    #[serde(default)]
    pub size: Option<Value>,
    #[serde(default)]
    pub leverage: Option<Value>,
    #[serde(default)]
    pub tif: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

fn opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "unavailable".to_string(),
    }
}

fn opt_dec(value: Option<rust_decimal::Decimal>) -> String {
    value.map_or_else(|| "unavailable".to_string(), |v| v.normalize().to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
