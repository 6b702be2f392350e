//! Run-wide failure accounting shared by every supervisor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use p2ptest_core::ProcessOutcome;

/// Collects one outcome per supervised process and latches a failure flag.
///
/// The flag is monotonic: once a non-infrastructure process fails it stays
/// set for the rest of the run. Infrastructure outcomes are recorded but
/// never set it.
#[derive(Debug, Default)]
pub struct FailureAggregator {
    failed: AtomicBool,
    outcomes: Mutex<Vec<ProcessOutcome>>,
}

impl FailureAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: ProcessOutcome) {
        if outcome.counts_as_failure() {
            self.failed.store(true, Ordering::SeqCst);
        }
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(outcome);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Snapshot of every outcome recorded so far, in recording order.
    pub fn outcomes(&self) -> Vec<ProcessOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
