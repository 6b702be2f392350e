//! Process specifications, lifecycle states and outcomes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Immutable description of one process to launch.
///
/// Built by the caller before launch and never mutated afterwards. The
/// environment map holds only overrides; the child inherits everything else
/// from the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Unique label; also names the `<tag>.log` file.
    pub tag: String,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Environment overrides applied on top of the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Infrastructure processes are excluded from failure aggregation.
    #[serde(default)]
    pub infrastructure: bool,

    /// Working directory for the child, inherited when absent.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    /// Create a spec for a process under test.
    pub fn new(tag: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            tag: tag.into(),
            command,
            env: BTreeMap::new(),
            infrastructure: false,
            working_dir: None,
        }
    }

    /// Create a spec for a long-lived infrastructure process.
    pub fn infrastructure(tag: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            infrastructure: true,
            ..Self::new(tag, command)
        }
    }

    /// Add environment overrides, replacing earlier values for the same key.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Run the child in `dir` instead of the inherited working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or(&[])
    }

    /// The command line joined with spaces, as written to the log.
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }

    /// Reject specs that cannot be launched.
    pub fn validate(&self) -> Result<()> {
        if self.tag.trim().is_empty() {
            return Err(HarnessError::InvalidSpec("tag must not be empty".into()));
        }
        if self.tag.contains(['/', '\\']) {
            return Err(HarnessError::InvalidSpec(format!(
                "tag {:?} must not contain path separators",
                self.tag
            )));
        }
        match self.program() {
            Some(program) if !program.is_empty() => Ok(()),
            _ => Err(HarnessError::EmptyCommand {
                tag: self.tag.clone(),
            }),
        }
    }
}

/// Shutdown state machine of a supervised process.
///
/// `Running -> TerminationRequested -> (Exited | ForceKilled)`, with
/// `Running -> Exited` and `Running -> ForceKilled` for processes that exit
/// on their own or overrun their join timeout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    TerminationRequested,
    Exited,
    ForceKilled,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited | ProcessState::ForceKilled)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Running, TerminationRequested)
                | (Running, Exited)
                | (Running, ForceKilled)
                | (TerminationRequested, Exited)
                | (TerminationRequested, ForceKilled)
        )
    }
}

/// Why a process counts as failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The executable was missing or the OS refused to start it.
    LaunchError,
    /// The process overran its join window and was killed.
    TimeoutFailure,
    /// The process exited on its own with a non-zero status or a signal.
    NonZeroExit,
    /// An infrastructure process ignored its graceful termination request.
    ShutdownFailure,
}

/// The single outcome entry every supervised process contributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub tag: String,

    /// Exit code; absent when killed, signalled, or never started.
    pub exit_code: Option<i32>,

    /// Terminating signal on unix.
    #[serde(default)]
    pub signal: Option<i32>,

    /// Killed after overrunning its join timeout.
    pub timed_out: bool,

    /// Launch error message when the process never started.
    #[serde(default)]
    pub launch_error: Option<String>,

    pub infrastructure: bool,

    /// Scenario the process belonged to, if any.
    #[serde(default)]
    pub scenario: Option<String>,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,
}

impl ProcessOutcome {
    /// Outcome of a process that never started.
    pub fn launch_failed(spec: &ProcessSpec, error: impl ToString) -> Self {
        Self {
            tag: spec.tag.clone(),
            exit_code: None,
            signal: None,
            timed_out: false,
            launch_error: Some(error.to_string()),
            infrastructure: spec.infrastructure,
            scenario: None,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    /// Exited on its own with code 0.
    pub fn succeeded(&self) -> bool {
        self.launch_error.is_none() && !self.timed_out && self.exit_code == Some(0)
    }

    pub fn is_failure(&self) -> bool {
        !self.succeeded()
    }

    /// Classify a failed outcome; `None` for successes.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        if self.succeeded() {
            return None;
        }
        Some(if self.launch_error.is_some() {
            FailureKind::LaunchError
        } else if self.timed_out && self.infrastructure {
            FailureKind::ShutdownFailure
        } else if self.timed_out {
            FailureKind::TimeoutFailure
        } else {
            FailureKind::NonZeroExit
        })
    }

    /// Whether this outcome flips the run verdict.
    pub fn counts_as_failure(&self) -> bool {
        !self.infrastructure && self.is_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: Option<i32>, timed_out: bool, infrastructure: bool) -> ProcessOutcome {
        ProcessOutcome {
            tag: "peer".to_string(),
            exit_code,
            signal: None,
            timed_out,
            launch_error: None,
            infrastructure,
            scenario: None,
            started_at: Utc::now(),
            duration_ms: 10,
        }
    }

    #[test]
    fn test_spec_program_and_args() {
        let spec = ProcessSpec::new(
            "peer_server",
            vec!["./test_p2p".to_string(), "--server".to_string()],
        );
        assert_eq!(spec.program(), Some("./test_p2p"));
        assert_eq!(spec.args(), &["--server".to_string()]);
        assert_eq!(spec.display_command(), "./test_p2p --server");
        assert!(!spec.infrastructure);
    }

    #[test]
    fn test_spec_validate_rejects_empty_command() {
        let spec = ProcessSpec::new("peer", vec![]);
        assert!(matches!(
            spec.validate(),
            Err(HarnessError::EmptyCommand { .. })
        ));

        let spec = ProcessSpec::new("peer", vec![String::new()]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_spec_validate_rejects_bad_tags() {
        assert!(ProcessSpec::new("", vec!["true".into()]).validate().is_err());
        assert!(ProcessSpec::new("../escape", vec!["true".into()])
            .validate()
            .is_err());
        assert!(ProcessSpec::new("ok", vec!["true".into()]).validate().is_ok());
    }

    #[test]
    fn test_with_env_is_per_spec() {
        let base = ProcessSpec::new("a", vec!["true".into()]);
        let a = base.clone().with_env([("ROLE", "server")]);
        let b = base.with_env([("ROLE", "client")]);
        assert_eq!(a.env["ROLE"], "server");
        assert_eq!(b.env["ROLE"], "client");
    }

    #[test]
    fn test_infrastructure_constructor() {
        let spec = ProcessSpec::infrastructure("signaling", vec!["./sig".into()]);
        assert!(spec.infrastructure);
    }

    #[test]
    fn test_state_transitions() {
        use ProcessState::*;
        assert!(Running.can_transition_to(TerminationRequested));
        assert!(Running.can_transition_to(Exited));
        assert!(TerminationRequested.can_transition_to(ForceKilled));
        assert!(!Exited.can_transition_to(Running));
        assert!(!ForceKilled.can_transition_to(Exited));
        assert!(!TerminationRequested.can_transition_to(Running));
        assert!(Exited.is_terminal());
        assert!(!TerminationRequested.is_terminal());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(outcome(Some(0), false, false).failure_kind(), None);
        assert_eq!(
            outcome(Some(1), false, false).failure_kind(),
            Some(FailureKind::NonZeroExit)
        );
        assert_eq!(
            outcome(None, true, false).failure_kind(),
            Some(FailureKind::TimeoutFailure)
        );
        assert_eq!(
            outcome(None, true, true).failure_kind(),
            Some(FailureKind::ShutdownFailure)
        );
        let spec = ProcessSpec::new("x", vec!["missing".into()]);
        assert_eq!(
            ProcessOutcome::launch_failed(&spec, "not found").failure_kind(),
            Some(FailureKind::LaunchError)
        );
    }

    #[test]
    fn test_infrastructure_never_counts() {
        assert!(!outcome(Some(143), false, true).counts_as_failure());
        assert!(!outcome(None, true, true).counts_as_failure());
        assert!(outcome(Some(2), false, false).counts_as_failure());
    }
}
