//! Persisted operations: the orchestrator, maintenance runs and teardown.

pub mod maintenance;
pub mod orchestrator;
pub mod teardown;

pub use maintenance::{run_maintenance, MaintenanceReport};
pub use orchestrator::{CloseOutcome, Orchestrator, OverdueSweep};
pub use teardown::TeardownReport;
