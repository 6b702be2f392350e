//! Orchestrator configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file) yields the stock two-scenario run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Scenario;
use crate::error::{HarnessError, Result};

/// Default join window for a peer, in seconds.
pub const DEFAULT_PEER_TIMEOUT_SECS: u64 = 20;

/// Default grace period for the signaling server after SIGTERM, in seconds.
pub const DEFAULT_GRACE_TIMEOUT_SECS: u64 = 5;

/// Tag of the signaling server's log.
pub const SIGNALING_TAG: &str = "signaling";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Peer executable launched once per scenario role.
    pub peer_executable: PathBuf,

    /// Signaling server executable (takes no arguments).
    pub signaling_executable: PathBuf,

    /// Used when `signaling_executable` does not exist.
    pub signaling_fallback: Option<PathBuf>,

    /// `host:port` the peers rendezvous on.
    pub signaling_address: String,

    pub peer_timeout_secs: u64,

    pub grace_timeout_secs: u64,

    /// Directory receiving `<tag>.log` files.
    pub log_dir: PathBuf,

    /// Pass `--log <local>.verbose.log` to every peer.
    pub verbose_peer_logs: bool,

    /// Shared library the peer needs; see [`crate::platform::binary_path_overrides`].
    pub shared_library: String,

    /// Where to look for `shared_library` when it is not colocated.
    pub bin_dir: PathBuf,

    /// Scenarios in execution order.
    pub scenarios: Vec<Scenario>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let signaling_fallback = if cfg!(windows) {
            Some(PathBuf::from("../examples/trivial_signaling_server.exe"))
        } else {
            None
        };
        Self {
            peer_executable: PathBuf::from("./test_p2p"),
            signaling_executable: PathBuf::from("./trivial_signaling_server"),
            signaling_fallback,
            signaling_address: "localhost:10000".to_string(),
            peer_timeout_secs: DEFAULT_PEER_TIMEOUT_SECS,
            grace_timeout_secs: DEFAULT_GRACE_TIMEOUT_SECS,
            log_dir: PathBuf::from("."),
            verbose_peer_logs: true,
            shared_library: "steamnetworkingsockets.dll".to_string(),
            bin_dir: PathBuf::from("../../../bin"),
            scenarios: Scenario::builtin(),
        }
    }
}

impl HarnessConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| HarnessError::Config(format!("cannot render configuration: {e}")))
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.grace_timeout_secs)
    }

    /// Keep only the named scenarios, preserving configured order.
    pub fn select_scenarios(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.scenarios.iter().any(|s| &s.name == *n))
        {
            return Err(HarnessError::Config(format!("unknown scenario: {unknown}")));
        }
        self.scenarios.retain(|s| names.contains(&s.name));
        Ok(())
    }

    /// The signaling executable to launch, applying the fallback.
    pub fn resolve_signaling_executable(&self) -> Result<PathBuf> {
        if self.signaling_executable.exists() {
            return Ok(self.signaling_executable.clone());
        }
        match &self.signaling_fallback {
            Some(fallback) if fallback.exists() => Ok(fallback.clone()),
            Some(fallback) => Err(HarnessError::ExecutableNotFound {
                path: fallback.clone(),
            }),
            None => Err(HarnessError::ExecutableNotFound {
                path: self.signaling_executable.clone(),
            }),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.peer_timeout_secs == 0 {
            return Err(HarnessError::Config(
                "peer_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.grace_timeout_secs == 0 {
            return Err(HarnessError::Config(
                "grace_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.signaling_address.trim().is_empty() {
            return Err(HarnessError::Config(
                "signaling_address must not be empty".into(),
            ));
        }
        if self.peer_executable.as_os_str().is_empty() {
            return Err(HarnessError::Config(
                "peer_executable must not be empty".into(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for scenario in &self.scenarios {
            scenario.validate()?;
            if !names.insert(scenario.name.as_str()) {
                return Err(HarnessError::Config(format!(
                    "duplicate scenario name: {}",
                    scenario.name
                )));
            }
            if scenario.peers.iter().any(|p| p.local == SIGNALING_TAG) {
                return Err(HarnessError::Config(format!(
                    "scenario {} uses the reserved identity {SIGNALING_TAG}",
                    scenario.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.peer_timeout(), Duration::from_secs(20));
        assert_eq!(config.grace_timeout(), Duration::from_secs(5));
        assert_eq!(config.signaling_address, "localhost:10000");
        assert_eq!(config.scenarios.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let config = HarnessConfig::from_toml_str(
            r#"
peer_executable = "/opt/p2p/test_p2p"
signaling_address = "127.0.0.1:12000"
peer_timeout_secs = 3

[[scenarios]]
name = "pair"
peers = [
    { role = "symmetric", local = "x", remote = "y" },
    { role = "symmetric", local = "y", remote = "x" },
]
"#,
        )
        .unwrap();
        assert_eq!(config.peer_executable, PathBuf::from("/opt/p2p/test_p2p"));
        assert_eq!(config.peer_timeout_secs, 3);
        assert_eq!(config.grace_timeout_secs, DEFAULT_GRACE_TIMEOUT_SECS);
        assert_eq!(config.scenarios.len(), 1);
        assert_eq!(config.scenarios[0].peers[1].role, Role::Symmetric);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(HarnessConfig::from_toml_str("peer_timeout = 3").is_err());
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let err = HarnessConfig::from_toml_str("peer_timeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("peer_timeout_secs"));
        assert!(HarnessConfig::from_toml_str("grace_timeout_secs = 0").is_err());
    }

    #[test]
    fn test_rejects_reserved_identity() {
        let mut config = HarnessConfig::default();
        config.scenarios[0].peers[0].local = SIGNALING_TAG.to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_select_scenarios() {
        let mut config = HarnessConfig::default();
        config
            .select_scenarios(&["symmetric".to_string()])
            .unwrap();
        assert_eq!(config.scenarios.len(), 1);
        assert_eq!(config.scenarios[0].name, "symmetric");

        let mut config = HarnessConfig::default();
        assert!(config.select_scenarios(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_resolve_signaling_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("sig.exe");
        std::fs::write(&fallback, b"").unwrap();

        let config = HarnessConfig {
            signaling_executable: dir.path().join("missing"),
            signaling_fallback: Some(fallback.clone()),
            ..HarnessConfig::default()
        };
        assert_eq!(config.resolve_signaling_executable().unwrap(), fallback);

        let config = HarnessConfig {
            signaling_executable: dir.path().join("missing"),
            signaling_fallback: None,
            ..HarnessConfig::default()
        };
        assert!(matches!(
            config.resolve_signaling_executable(),
            Err(HarnessError::ExecutableNotFound { .. })
        ));
    }

    #[test]
    fn test_toml_render_roundtrips() {
        let config = HarnessConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(HarnessConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
