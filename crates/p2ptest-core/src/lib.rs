//! p2ptest core library
//!
//! Domain types, configuration, per-launch environment computation and the
//! ambient logging setup shared by the runner and the CLI.

pub mod config;
pub mod domain;
pub mod error;
pub mod obs;
pub mod platform;
pub mod telemetry;

pub use config::{
    HarnessConfig, DEFAULT_GRACE_TIMEOUT_SECS, DEFAULT_PEER_TIMEOUT_SECS, SIGNALING_TAG,
};
pub use domain::{
    FailureKind, PeerRole, ProcessOutcome, ProcessSpec, ProcessState, Role, RunResult, Scenario,
    ScenarioReport,
};
pub use error::{HarnessError, Result};
pub use telemetry::init_tracing;
