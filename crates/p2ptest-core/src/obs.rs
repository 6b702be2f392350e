//! Structured lifecycle events for orchestrator runs.
//!
//! Every event carries an `event` field so log pipelines can filter on it
//! without parsing messages.

use std::time::Duration;

use tracing::{info, warn, Span};

/// Run-scoped span, attached to async work with
/// [`tracing::Instrument::instrument`].
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("p2ptest.run", run_id = %run_id)
}

pub fn emit_state_transition(from: &str, to: &str) {
    info!(event = "orchestrator.transition", from = %from, to = %to);
}

pub fn emit_process_launched(tag: &str, pid: Option<u32>, infrastructure: bool) {
    info!(
        event = "process.launched",
        tag = %tag,
        pid = pid,
        infrastructure = infrastructure,
    );
}

pub fn emit_process_launch_failed(tag: &str, error: &dyn std::fmt::Display) {
    warn!(event = "process.launch_failed", tag = %tag, error = %error);
}

pub fn emit_process_exited(tag: &str, exit_code: Option<i32>, duration_ms: u64, failed: bool) {
    info!(
        event = "process.exited",
        tag = %tag,
        exit_code = exit_code,
        duration_ms = duration_ms,
        failed = failed,
    );
}

/// A process overran its join window and is about to be killed.
pub fn emit_process_timed_out(tag: &str, timeout: Duration) {
    warn!(
        event = "process.timed_out",
        tag = %tag,
        timeout_ms = timeout.as_millis() as u64,
    );
}

pub fn emit_termination_requested(tag: &str, grace: Duration) {
    info!(
        event = "process.termination_requested",
        tag = %tag,
        grace_ms = grace.as_millis() as u64,
    );
}

pub fn emit_scenario_started(name: &str, peers: usize) {
    info!(event = "scenario.started", scenario = %name, peers = peers);
}

pub fn emit_scenario_finished(name: &str, duration_ms: u64, failed: bool) {
    info!(
        event = "scenario.finished",
        scenario = %name,
        duration_ms = duration_ms,
        failed = failed,
    );
}

pub fn emit_scenarios_skipped(skipped: &[String]) {
    if !skipped.is_empty() {
        warn!(event = "scenario.skipped", scenarios = ?skipped);
    }
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, failed: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        failed = failed,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        span.in_scope(|| emit_state_transition("starting_infra", "running_scenarios"));
    }
}
