//! Scenario definitions: which peer roles run together.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Role a peer plays in a connection test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Listens for the remote identity.
    Server,
    /// Connects to the remote identity.
    Client,
    /// Both sides connect simultaneously.
    Symmetric,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
            Role::Symmetric => "symmetric",
        }
    }

    /// Command-line flag understood by the peer executable.
    pub fn flag(&self) -> String {
        format!("--{}", self.name())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One peer in a scenario: its role and the identities on each end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerRole {
    pub role: Role,
    pub local: String,
    pub remote: String,
}

impl PeerRole {
    pub fn new(role: Role, local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            role,
            local: local.into(),
            remote: remote.into(),
        }
    }
}

/// A named set of peers launched concurrently against the shared signaling
/// server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,

    /// Printed as `Running <description>` when the scenario starts.
    #[serde(default)]
    pub description: String,

    pub peers: Vec<PeerRole>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, description: impl Into<String>, peers: Vec<PeerRole>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            peers,
        }
    }

    /// One peer listens, the other connects.
    pub fn client_server() -> Self {
        Self::new(
            "client_server",
            "basic socket client/server test",
            vec![
                PeerRole::new(Role::Server, "peer_server", "peer_client"),
                PeerRole::new(Role::Client, "peer_client", "peer_server"),
            ],
        )
    }

    /// Both peers connect to each other at the same time.
    pub fn symmetric() -> Self {
        Self::new(
            "symmetric",
            "socket symmetric test",
            vec![
                PeerRole::new(Role::Symmetric, "alice", "bob"),
                PeerRole::new(Role::Symmetric, "bob", "alice"),
            ],
        )
    }

    /// The default sequence: client/server first, then symmetric.
    pub fn builtin() -> Vec<Self> {
        vec![Self::client_server(), Self::symmetric()]
    }

    pub fn display_name(&self) -> &str {
        if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        }
    }

    /// Local identities double as process tags, so they must be unique.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::InvalidScenario(
                "scenario name must not be empty".into(),
            ));
        }
        if self.peers.is_empty() {
            return Err(HarnessError::InvalidScenario(format!(
                "scenario {} has no peers",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.local.trim().is_empty() || peer.remote.trim().is_empty() {
                return Err(HarnessError::InvalidScenario(format!(
                    "scenario {} has a peer with an empty identity",
                    self.name
                )));
            }
            if !seen.insert(peer.local.as_str()) {
                return Err(HarnessError::InvalidScenario(format!(
                    "scenario {} uses local identity {} more than once",
                    self.name, peer.local
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_flags() {
        assert_eq!(Role::Server.flag(), "--server");
        assert_eq!(Role::Client.flag(), "--client");
        assert_eq!(Role::Symmetric.flag(), "--symmetric");
    }

    #[test]
    fn test_builtin_order() {
        let names: Vec<_> = Scenario::builtin().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["client_server", "symmetric"]);
    }

    #[test]
    fn test_client_server_identities_mirror() {
        let scenario = Scenario::client_server();
        assert_eq!(scenario.peers[0].local, "peer_server");
        assert_eq!(scenario.peers[0].remote, "peer_client");
        assert_eq!(scenario.peers[1].local, "peer_client");
        assert_eq!(scenario.peers[1].remote, "peer_server");
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_locals() {
        let scenario = Scenario::new(
            "dup",
            "",
            vec![
                PeerRole::new(Role::Symmetric, "alice", "bob"),
                PeerRole::new(Role::Symmetric, "alice", "bob"),
            ],
        );
        let err = scenario.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(Scenario::new("empty", "", vec![]).validate().is_err());
        let blank = Scenario::new("blank", "", vec![PeerRole::new(Role::Client, "", "x")]);
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_display_name_falls_back_to_name() {
        let scenario = Scenario::new("custom", "", vec![]);
        assert_eq!(scenario.display_name(), "custom");
        assert_eq!(
            Scenario::symmetric().display_name(),
            "socket symmetric test"
        );
    }

    #[test]
    fn test_role_deserializes_snake_case() {
        let peer: PeerRole =
            serde_json::from_str(r#"{"role":"symmetric","local":"a","remote":"b"}"#).unwrap();
        assert_eq!(peer.role, Role::Symmetric);
    }
}
