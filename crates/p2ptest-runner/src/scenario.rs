//! Running one scenario's peers concurrently against the signaling server.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures::future::join_all;
use p2ptest_core::platform::{self, BINARY_PATH_VAR, LIBRARY_PATH_VAR};
use p2ptest_core::{obs, HarnessConfig, PeerRole, ProcessSpec, Result, Scenario, ScenarioReport};
use tracing::{info, warn};

use crate::supervisor::ProcessSupervisor;

/// Builds peer command lines and environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLauncher {
    pub executable: PathBuf,

    /// `host:port` passed as `--signaling-server`.
    pub signaling_address: String,

    /// Pass `--log <local>.verbose.log` to each peer.
    pub verbose_logs: bool,

    /// Overrides shared by every peer spec.
    pub env: BTreeMap<String, String>,

    pub working_dir: Option<PathBuf>,
}

impl PeerLauncher {
    pub fn new(executable: impl Into<PathBuf>, signaling_address: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            signaling_address: signaling_address.into(),
            verbose_logs: false,
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Launcher for `config`, with environment overrides computed from the
    /// current process environment.
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let mut env =
            platform::library_path_overrides(std::env::var_os(LIBRARY_PATH_VAR).as_deref())?;
        if cfg!(windows) {
            env.extend(platform::binary_path_overrides(
                &config.peer_executable,
                &config.shared_library,
                &config.bin_dir,
                std::env::var_os(BINARY_PATH_VAR).as_deref(),
            )?);
        }
        Ok(Self {
            executable: config.peer_executable.clone(),
            signaling_address: config.signaling_address.clone(),
            verbose_logs: config.verbose_peer_logs,
            env,
            working_dir: None,
        })
    }

    /// The command line for one peer:
    ///
    /// ```text
    /// <exe> --<role> --identity-local str:<local> --identity-remote str:<remote>
    ///       --signaling-server <addr> [--log <local>.verbose.log]
    /// ```
    pub fn command_for(&self, peer: &PeerRole) -> Vec<String> {
        let mut command = vec![
            self.executable.to_string_lossy().into_owned(),
            peer.role.flag(),
            "--identity-local".to_string(),
            format!("str:{}", peer.local),
            "--identity-remote".to_string(),
            format!("str:{}", peer.remote),
            "--signaling-server".to_string(),
            self.signaling_address.clone(),
        ];
        if self.verbose_logs {
            command.push("--log".to_string());
            command.push(format!("{}.verbose.log", peer.local));
        }
        command
    }

    /// A fresh spec per peer, tagged with its local identity.
    pub fn spec_for(&self, peer: &PeerRole) -> ProcessSpec {
        let spec = ProcessSpec::new(peer.local.clone(), self.command_for(peer))
            .with_env(self.env.clone());
        match &self.working_dir {
            Some(dir) => spec.with_working_dir(dir.clone()),
            None => spec,
        }
    }
}

/// Executes scenarios one at a time; peers within a scenario run together.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    launcher: PeerLauncher,
    supervisor: ProcessSupervisor,
    peer_timeout: Duration,
}

impl ScenarioRunner {
    pub fn new(launcher: PeerLauncher, supervisor: ProcessSupervisor, peer_timeout: Duration) -> Self {
        Self {
            launcher,
            supervisor,
            peer_timeout,
        }
    }

    /// Launch every peer, then wait on all of them concurrently, each with
    /// its own timeout. Returns once every peer has been reaped.
    ///
    /// Peers that fail to launch are recorded as failures; the others still
    /// run to completion. Nothing is retried.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let start = Instant::now();
        obs::emit_scenario_started(&scenario.name, scenario.peers.len());

        let slots: Vec<_> = scenario
            .peers
            .iter()
            .map(|peer| {
                let spec = self.launcher.spec_for(peer);
                self.supervisor
                    .launch(&spec, Some(scenario.name.as_str()))
                    .map_err(|e| {
                        warn!(scenario = %scenario.name, tag = %spec.tag, error = %e, "peer launch failed");
                        self.supervisor
                            .record_launch_failure(&spec, &e, Some(scenario.name.as_str()))
                    })
            })
            .collect();

        let timeout = self.peer_timeout;
        let outcomes = join_all(slots.into_iter().map(|slot| async move {
            match slot {
                Ok(process) => process.join(timeout).await,
                Err(outcome) => outcome,
            }
        }))
        .await;

        let report = ScenarioReport {
            name: scenario.name.clone(),
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            scenario = %report.name,
            passed = report.outcomes.iter().filter(|o| o.succeeded()).count(),
            total = report.outcomes.len(),
            "scenario complete"
        );
        obs::emit_scenario_finished(&report.name, report.duration_ms, report.failed());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2ptest_core::Role;

    #[test]
    fn test_command_for_server() {
        let mut launcher = PeerLauncher::new("./test_p2p", "localhost:10000");
        launcher.verbose_logs = true;
        let peer = PeerRole::new(Role::Server, "peer_server", "peer_client");
        assert_eq!(
            launcher.command_for(&peer),
            vec![
                "./test_p2p",
                "--server",
                "--identity-local",
                "str:peer_server",
                "--identity-remote",
                "str:peer_client",
                "--signaling-server",
                "localhost:10000",
                "--log",
                "peer_server.verbose.log",
            ]
        );
    }

    #[test]
    fn test_command_without_verbose_log() {
        let launcher = PeerLauncher::new("./test_p2p", "localhost:10000");
        let peer = PeerRole::new(Role::Symmetric, "alice", "bob");
        let command = launcher.command_for(&peer);
        assert_eq!(command[1], "--symmetric");
        assert!(!command.contains(&"--log".to_string()));
    }

    #[test]
    fn test_spec_for_uses_local_identity_as_tag() {
        let mut launcher = PeerLauncher::new("./test_p2p", "localhost:10000");
        launcher.env.insert("LD_LIBRARY_PATH".into(), ".".into());
        launcher.working_dir = Some(PathBuf::from("/tmp"));
        let spec = launcher.spec_for(&PeerRole::new(Role::Client, "peer_client", "peer_server"));
        assert_eq!(spec.tag, "peer_client");
        assert!(!spec.infrastructure);
        assert_eq!(spec.env["LD_LIBRARY_PATH"], ".");
        assert_eq!(spec.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_config_extends_library_path() {
        let config = HarnessConfig::default();
        let launcher = PeerLauncher::from_config(&config).unwrap();
        assert!(launcher.env[LIBRARY_PATH_VAR].ends_with('.'));
        assert!(launcher.verbose_logs);
        assert_eq!(launcher.signaling_address, "localhost:10000");
    }
}
