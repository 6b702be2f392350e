//! p2ptest runner
//!
//! Drives an end-to-end peer-to-peer connectivity run:
//! - Starts the signaling server as infrastructure
//! - Runs each scenario's peers concurrently under a timeout
//! - Captures every process's output into `<tag>.log`
//! - Aggregates outcomes into a single pass/fail verdict

pub mod aggregator;
pub mod gate;
pub mod log_sink;
pub mod orchestrator;
pub mod scenario;
pub mod supervisor;

// Re-export key types
pub use aggregator::FailureAggregator;
pub use gate::{GateVerdict, RunGate};
pub use log_sink::LogSink;
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use scenario::{PeerLauncher, ScenarioRunner};
pub use supervisor::{ProcessSupervisor, SupervisedProcess, DEFAULT_DRAIN_TIMEOUT};
