//! Domain model: process specs and outcomes, scenarios, run results.

pub mod process;
pub mod run;
pub mod scenario;

pub use process::{FailureKind, ProcessOutcome, ProcessSpec, ProcessState};
pub use run::{RunResult, ScenarioReport};
pub use scenario::{PeerRole, Role, Scenario};
