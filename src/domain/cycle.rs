use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AccountSnapshot, Decision, MarketSnapshot, NarrativeDigest, OrderAttempt};

/// Scheduler state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Sleeping until the next interval
    Idle,
    /// A decision cycle is in flight
    RunningCycle,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "IDLE",
            SchedulerState::RunningCycle => "RUNNING_CYCLE",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: SchedulerState) -> bool {
        use SchedulerState::*;

        matches!((self, target), (Idle, RunningCycle) | (RunningCycle, Idle))
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sequential steps of one decision cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Market,
    Account,
    News,
    Narratives,
    Decision,
    Order,
    Persist,
}

impl CycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStage::Market => "market",
            CycleStage::Account => "account",
            CycleStage::News => "news",
            CycleStage::Narratives => "narratives",
            CycleStage::Decision => "decision",
            CycleStage::Order => "order",
            CycleStage::Persist => "persist",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything produced by one completed cycle, persisted as a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_at: DateTime<Utc>,
    pub market: MarketSnapshot,
    pub account: AccountSnapshot,
    pub digest: NarrativeDigest,
    pub article_count: usize,
    pub decision: Decision,
    pub order: Option<OrderAttempt>,
}

/// How a cycle ended
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(Box<CycleRecord>),
    Aborted { stage: CycleStage, reason: String },
    Cancelled { stage: CycleStage },
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }

    pub fn record(&self) -> Option<&CycleRecord> {
        match self {
            CycleOutcome::Completed(record) => Some(record),
            _ => None,
        }
    }
}
