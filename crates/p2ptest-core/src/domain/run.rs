//! Aggregate results of one orchestrator run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::process::ProcessOutcome;

/// Result of running one scenario to completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: String,

    /// One entry per peer, in launch order.
    pub outcomes: Vec<ProcessOutcome>,

    pub duration_ms: u64,
}

impl ScenarioReport {
    pub fn failed(&self) -> bool {
        self.outcomes.iter().any(ProcessOutcome::counts_as_failure)
    }
}

/// Result of a complete orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    pub run_id: Uuid,

    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Every supervised process, infrastructure included, in completion order.
    pub outcomes: Vec<ProcessOutcome>,

    /// Scenarios that ran, in order.
    pub scenarios: Vec<ScenarioReport>,

    /// Scenarios never started because an earlier one failed.
    pub skipped: Vec<String>,
}

impl RunResult {
    /// True iff a non-infrastructure process failed, timed out, or never
    /// started.
    pub fn overall_failed(&self) -> bool {
        self.outcomes.iter().any(ProcessOutcome::counts_as_failure)
    }

    /// Process exit code for the whole run.
    pub fn exit_code(&self) -> i32 {
        if self.overall_failed() {
            1
        } else {
            0
        }
    }

    /// Non-infrastructure processes that passed.
    pub fn passed_count(&self) -> usize {
        self.peer_outcomes().filter(|o| o.succeeded()).count()
    }

    /// Non-infrastructure processes that failed.
    pub fn failed_count(&self) -> usize {
        self.peer_outcomes().filter(|o| o.is_failure()).count()
    }

    pub fn peer_outcomes(&self) -> impl Iterator<Item = &ProcessOutcome> {
        self.outcomes.iter().filter(|o| !o.infrastructure)
    }

    pub fn infrastructure_outcomes(&self) -> impl Iterator<Item = &ProcessOutcome> {
        self.outcomes.iter().filter(|o| o.infrastructure)
    }

    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
