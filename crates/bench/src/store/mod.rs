//! Execution store collaborators
//!
//! This module provides:
//! - [`ExecutionStarter`] - starts target executions by idempotent ID
//! - [`ExecutionLister`] - lists open and closed executions of a target type
//! - [`InMemoryExecutionStore`] - simulated store for tests and local runs

mod memory;
#[allow(clippy::module_inception)]
mod store;

pub use memory::InMemoryExecutionStore;
pub use store::{
    saturating_add, saturating_sub, ClosedExecution, ClosedPage, ExecutionLister, ExecutionStarter, ExecutionSummary,
    StartRequest, StoreError, TimingTriple,
};
