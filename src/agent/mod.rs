//! LLM-backed trade decisions
//!
//! - `client`: chat-completions transport
//! - `protocol`: prompt rendering and the response schema
//! - `engine`: parsing, defaults and the bounded decision history

pub mod client;
pub mod engine;
pub mod protocol;

pub use client::{extract_json, LlmClient, OpenRouterClient};
pub use engine::{DecisionDefaults, DecisionEngine};
pub use protocol::{DecisionContext, RawDecision};
