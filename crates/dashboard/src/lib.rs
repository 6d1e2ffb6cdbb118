#![warn(clippy::unwrap_used)]

pub mod compute;
pub mod guard;
pub mod orchestrator;

pub use compute::{BlockingCompute, ComputeCapability, ComputeError, ComputeOutcome};
pub use guard::ProcessingGuard;
pub use orchestrator::{
    ComputeOrchestrator, DashboardRequest, DashboardResponse, ResponseStatus, StaleStrategy,
};
