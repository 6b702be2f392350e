//! Full test run: signaling server up, scenarios in order, signaling down.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use p2ptest_core::obs;
use p2ptest_core::platform::{self, LIBRARY_PATH_VAR};
use p2ptest_core::{HarnessConfig, ProcessSpec, Result, RunResult, SIGNALING_TAG};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::aggregator::FailureAggregator;
use crate::log_sink::console;
use crate::scenario::{PeerLauncher, ScenarioRunner};
use crate::supervisor::ProcessSupervisor;

const BANNER: &str = "=================================================================";

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    StartingInfra,
    RunningScenarios,
    StoppingInfra,
    Done,
}

impl OrchestratorState {
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorState::StartingInfra => "starting_infra",
            OrchestratorState::RunningScenarios => "running_scenarios",
            OrchestratorState::StoppingInfra => "stopping_infra",
            OrchestratorState::Done => "done",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Drives one run of the configured scenarios.
pub struct Orchestrator {
    config: HarnessConfig,
    state: OrchestratorState,
    aggregator: Arc<FailureAggregator>,
}

impl Orchestrator {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: OrchestratorState::StartingInfra,
            aggregator: Arc::new(FailureAggregator::new()),
        })
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn aggregator(&self) -> Arc<FailureAggregator> {
        Arc::clone(&self.aggregator)
    }

    fn transition(&mut self, next: OrchestratorState) {
        obs::emit_state_transition(self.state.name(), next.name());
        self.state = next;
    }

    /// Run every scenario against one signaling server and return the
    /// aggregate result.
    ///
    /// Scenarios run strictly in sequence and the sequence stops after the
    /// first failing scenario. The signaling server's own exit status never
    /// affects the verdict. Errors are setup failures only: missing
    /// executables, an unusable log directory, or a signaling server that
    /// cannot be started.
    ///
    /// Each call starts from a clean slate: outcomes of earlier runs on the
    /// same orchestrator are not carried over.
    pub async fn run(&mut self) -> Result<RunResult> {
        let run_id = Uuid::new_v4();
        self.aggregator = Arc::new(FailureAggregator::new());
        self.state = OrchestratorState::StartingInfra;
        let span = obs::run_span(&run_id.to_string());
        self.run_in_span(run_id).instrument(span).await
    }

    async fn run_in_span(&mut self, run_id: Uuid) -> Result<RunResult> {
        let started_at = Utc::now();
        let start = Instant::now();

        std::fs::create_dir_all(&self.config.log_dir)?;
        let signaling_exe = self.config.resolve_signaling_executable()?;
        let launcher = PeerLauncher::from_config(&self.config)?;
        let supervisor = ProcessSupervisor::new(&self.config.log_dir, self.aggregator());
        let runner = ScenarioRunner::new(launcher, supervisor.clone(), self.config.peer_timeout());

        // StartingInfra
        let infra_env =
            platform::library_path_overrides(std::env::var_os(LIBRARY_PATH_VAR).as_deref())?;
        let infra_spec = ProcessSpec::infrastructure(
            SIGNALING_TAG,
            vec![signaling_exe.to_string_lossy().into_owned()],
        )
        .with_env(infra_env);
        let infra = match supervisor.launch(&infra_spec, None) {
            Ok(process) => process,
            Err(e) => {
                supervisor.record_launch_failure(&infra_spec, &e, None);
                self.transition(OrchestratorState::Done);
                return Err(e);
            }
        };
        info!(pid = ?infra.pid(), "signaling server started");
        self.transition(OrchestratorState::RunningScenarios);

        // RunningScenarios
        let mut reports = Vec::new();
        let mut skipped = Vec::new();
        let scenarios = self.config.scenarios.clone();
        for (index, scenario) in scenarios.iter().enumerate() {
            console(BANNER);
            console(BANNER);
            console(&format!("Running {}", scenario.display_name()));
            let report = runner.run(scenario).await;
            console(BANNER);
            console(BANNER);
            reports.push(report);

            if self.aggregator.has_failed() {
                skipped = scenarios[index + 1..]
                    .iter()
                    .map(|s| s.name.clone())
                    .collect();
                obs::emit_scenarios_skipped(&skipped);
                break;
            }
        }

        // StoppingInfra
        self.transition(OrchestratorState::StoppingInfra);
        let infra_outcome = infra.terminate_gracefully(self.config.grace_timeout()).await;
        if infra_outcome.is_failure() {
            warn!(
                exit_code = ?infra_outcome.exit_code,
                timed_out = infra_outcome.timed_out,
                "signaling server shutdown was not clean; ignoring"
            );
        }
        self.transition(OrchestratorState::Done);

        let result = RunResult {
            run_id,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            outcomes: self.aggregator.outcomes(),
            scenarios: reports,
            skipped,
        };
        obs::emit_run_finished(&run_id.to_string(), result.duration_ms, result.overall_failed());
        Ok(result)
    }
}
