//! Orchestrator: the operations exposed to the transport layer.
//!
//! Starts runs, hands out event subscriptions, routes human responses to
//! the right gate, and forwards cancel requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::adapters::{SimulatedWorker, StepWorker};
use crate::config::RuntimeConfig;
use crate::domain::{Run, RunId, UiResponse};

use super::error::{GateError, OrchestratorError};
use super::registry::{spawn_reaper, RunContext, RunRegistry};
use super::stream::Subscription;

/// Entry point for starting and steering runs
pub struct Orchestrator {
    registry: Arc<RunRegistry>,
    worker: Arc<dyn StepWorker>,
    config: RuntimeConfig,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Orchestrator {
    /// Create an orchestrator using the simulated step worker
    pub fn new(config: RuntimeConfig) -> Self {
        let worker = Arc::new(SimulatedWorker::from_config(&config));
        Self::with_worker(config, worker)
    }

    /// Create an orchestrator with custom step work
    pub fn with_worker(config: RuntimeConfig, worker: Arc<dyn StepWorker>) -> Self {
        Self {
            registry: Arc::new(RunRegistry::new()),
            worker,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Create a run and launch its executor; returns immediately
    #[instrument(skip(self, input))]
    pub fn start_run(&self, input: impl Into<String>) -> RunId {
        let run = Run::new(RunId::generate(), self.config.pipeline_name.clone(), input);
        let run_id = run.id.clone();

        let context = RunContext::launch(
            run,
            Arc::clone(&self.worker),
            Duration::from_millis(self.config.approval_timeout_ms),
        );
        self.registry.insert(context);

        info!(%run_id, "Run started");
        run_id
    }

    /// Take the run's event stream.
    ///
    /// Only one subscription may be active at a time; a second concurrent
    /// subscriber gets a conflict.
    pub fn subscribe(&self, run_id: &RunId) -> Result<Subscription, OrchestratorError> {
        let context = self.registry.get(run_id)?;
        let stream = context
            .try_take_stream()
            .ok_or_else(|| OrchestratorError::conflict(run_id, "run already has an active subscriber"))?;
        Ok(Subscription::new(run_id.clone(), stream))
    }

    /// Deliver a human response to the run's pending request
    pub fn respond(&self, run_id: &RunId, response: UiResponse) -> Result<(), OrchestratorError> {
        let context = self.registry.get(run_id)?;
        match context.gate().resolve(response) {
            Ok(request_id) => {
                info!(%run_id, %request_id, "Response accepted");
                Ok(())
            }
            Err(e) => {
                warn!(%run_id, error = %e, "Response rejected");
                let reason = match e {
                    GateError::NotOpen => "no pending ui request".to_string(),
                    other => other.to_string(),
                };
                Err(OrchestratorError::conflict(run_id, reason))
            }
        }
    }

    /// Request cooperative cancellation; ok if the run already finished
    pub fn cancel(&self, run_id: &RunId) -> Result<(), OrchestratorError> {
        self.registry.cancel(run_id).map(|_| ())
    }

    /// Latest snapshot of a run
    pub fn status(&self, run_id: &RunId) -> Result<Run, OrchestratorError> {
        Ok(self.registry.get(run_id)?.snapshot())
    }

    /// Wait for a run to reach a terminal status
    pub async fn wait(&self, run_id: &RunId) -> Result<Run, OrchestratorError> {
        let context = self.registry.get(run_id)?;
        Ok(context.wait_finished().await)
    }

    /// Release a finished run once no more calls are expected for it
    pub fn close(&self, run_id: &RunId) -> Result<(), OrchestratorError> {
        self.registry.close(run_id)
    }

    /// Snapshots of all known runs, most recent first
    pub fn list_runs(&self) -> Vec<Run> {
        self.registry.list()
    }

    /// Start the background reaper, unless disabled in configuration
    pub fn spawn_reaper(&self) -> Option<JoinHandle<()>> {
        if self.config.reaper_interval_seconds == 0 {
            return None;
        }
        Some(spawn_reaper(
            Arc::clone(&self.registry),
            Duration::from_secs(self.config.reaper_interval_seconds),
            Duration::from_secs(self.config.retention_seconds),
        ))
    }
}
