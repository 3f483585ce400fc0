//! HTTP interface: upload page, background processing and log polling.

pub mod pages;
pub mod run_manager;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use run_manager::{RunManager, RunState, StartError, WorkflowRun};
