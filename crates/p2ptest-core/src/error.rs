//! Error taxonomy for the orchestrator.
//!
//! Only setup problems surface as [`HarnessError`]. Failures of the
//! processes under test are captured in [`crate::ProcessOutcome`] instead,
//! so a single misbehaving peer never unwinds out of a scenario.

use std::path::PathBuf;

/// Errors produced while configuring or launching supervised processes.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("process {tag} has an empty command")]
    EmptyCommand { tag: String },

    #[error("invalid process spec: {0}")]
    InvalidSpec(String),

    #[error("failed to launch {tag}: {source}")]
    Launch {
        tag: String,
        #[source]
        source: std::io::Error,
    },

    #[error("executable not found: {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("cannot open log file {}: {source}", path.display())]
    LogSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to signal process: {0}")]
    Signal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for orchestrator setup operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_error_display_names_tag() {
        let err = HarnessError::Launch {
            tag: "peer_client".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let msg = err.to_string();
        assert!(msg.contains("peer_client"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_executable_not_found_display() {
        let err = HarnessError::ExecutableNotFound {
            path: PathBuf::from("./trivial_signaling_server"),
        };
        assert_eq!(
            err.to_string(),
            "executable not found: ./trivial_signaling_server"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: HarnessError = io.into();
        assert!(matches!(err, HarnessError::Io(_)));
    }
}
