//! Pass/fail evaluation of a finished run.

use p2ptest_core::{FailureKind, ProcessOutcome, RunResult};
use serde::{Deserialize, Serialize};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// One line per failed peer (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Run gate rules.
pub struct RunGate;

impl RunGate {
    /// Evaluate a run.
    ///
    /// Gate rule:
    /// - Every non-infrastructure outcome must have exited on its own with code 0
    /// - Infrastructure outcomes are reported elsewhere and never violate the gate
    pub fn evaluate(result: &RunResult) -> GateVerdict {
        let violations: Vec<String> = result
            .outcomes
            .iter()
            .filter(|o| !o.infrastructure)
            .filter_map(violation)
            .collect();

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} peer(s) passed", result.peer_outcomes().count())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

fn violation(outcome: &ProcessOutcome) -> Option<String> {
    let tag = &outcome.tag;
    match outcome.failure_kind()? {
        FailureKind::LaunchError => Some(format!(
            "Peer '{tag}' failed to launch: {}",
            outcome.launch_error.as_deref().unwrap_or("unknown error")
        )),
        FailureKind::TimeoutFailure | FailureKind::ShutdownFailure => {
            Some(format!("Peer '{tag}' timed out and was killed"))
        }
        FailureKind::NonZeroExit => Some(match (outcome.exit_code, outcome.signal) {
            (Some(code), _) => format!("Peer '{tag}' exited with code {code}"),
            (None, Some(signal)) => format!("Peer '{tag}' terminated by signal {signal}"),
            (None, None) => format!("Peer '{tag}' exited with unknown status"),
        }),
    }
}
