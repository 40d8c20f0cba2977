//! Step worker interface.
//!
//! Workers supply the business logic run inside the plan and execute
//! steps. The executor owns sequencing, events and cancellation; a worker
//! only transforms pipeline state.

pub mod simulated;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::ProgressReporter;
use crate::domain::PipelineState;

// Re-export the default worker
pub use simulated::SimulatedWorker;

/// Trait for the work performed inside pipeline steps
#[async_trait]
pub trait StepWorker: Send + Sync {
    /// Human-readable worker name
    fn name(&self) -> &str;

    /// Produce a plan for the run
    async fn plan(&self, state: PipelineState) -> Result<PipelineState>;

    /// Carry out the approved work, reporting progress as it goes.
    ///
    /// Progress values must increase strictly within (0, 1]; the executor
    /// reports the final 1.0 if the worker stops short of it.
    async fn execute(
        &self,
        state: PipelineState,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<PipelineState>;
}
