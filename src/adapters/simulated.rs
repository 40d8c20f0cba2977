//! Placeholder worker that simulates step latency.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use super::StepWorker;
use crate::config::RuntimeConfig;
use crate::core::ProgressReporter;
use crate::domain::PipelineState;

/// Worker that sleeps in place of real planning/execution
#[derive(Debug, Clone)]
pub struct SimulatedWorker {
    plan_delay: Duration,
    progress_delay: Duration,
    execute_delay: Duration,
}

impl Default for SimulatedWorker {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

impl SimulatedWorker {
    pub fn new(plan_delay: Duration, progress_delay: Duration, execute_delay: Duration) -> Self {
        Self {
            plan_delay,
            progress_delay,
            execute_delay,
        }
    }

    /// Build a worker using the configured delays
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            Duration::from_millis(config.plan_delay_ms),
            Duration::from_millis(config.progress_delay_ms),
            Duration::from_millis(config.execute_delay_ms),
        )
    }

    /// Worker with no delays (tests, demos)
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }
}

#[async_trait]
impl StepWorker for SimulatedWorker {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn plan(&self, state: PipelineState) -> Result<PipelineState> {
        sleep(self.plan_delay).await;
        debug!(input_len = state.user_input.len(), "Plan ready");
        Ok(state)
    }

    async fn execute(
        &self,
        mut state: PipelineState,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<PipelineState> {
        progress.report(0.2, "Starting...")?;
        sleep(self.progress_delay).await;
        progress.report(0.6, "Working...")?;
        sleep(self.execute_delay).await;

        state.result = Some(format!(
            "Done. You asked: {}. Approved={}",
            state.user_input,
            state.approved.unwrap_or(false)
        ));
        Ok(state)
    }
}
