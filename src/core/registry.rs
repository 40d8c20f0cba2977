//! Run contexts and the process-wide registry that owns them.
//!
//! A context is created together with its executor task and stays in the
//! registry until it is closed explicitly or reaped after finishing.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::adapters::StepWorker;
use crate::domain::{Run, RunId, RunStatus};

use super::channel::{event_channel, EventStream};
use super::error::OrchestratorError;
use super::executor::{CancelSignal, PipelineExecutor};
use super::gate::HumanGate;

/// Everything belonging to one run
pub struct RunContext {
    run_id: RunId,
    stream: Arc<Mutex<EventStream>>,
    gate: Arc<HumanGate>,
    cancel_tx: watch::Sender<bool>,
    snapshot: watch::Receiver<Run>,
    task: JoinHandle<()>,
}

impl RunContext {
    /// Create the run's channel, gate and cancel signal and spawn its
    /// executor. Must be called inside a tokio runtime.
    pub fn launch(run: Run, worker: Arc<dyn StepWorker>, approval_timeout: Duration) -> Arc<Self> {
        let run_id = run.id.clone();
        let (sink, stream) = event_channel(run_id.clone());
        let gate = Arc::new(HumanGate::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (snapshot_tx, snapshot) = watch::channel(run.clone());

        let executor = PipelineExecutor::new(
            run,
            sink,
            Arc::clone(&gate),
            CancelSignal::new(cancel_rx),
            snapshot_tx,
            worker,
            approval_timeout,
        );
        let task = tokio::spawn(async move {
            executor.run().await;
        });

        Arc::new(Self {
            run_id,
            stream: Arc::new(Mutex::new(stream)),
            gate,
            cancel_tx,
            snapshot,
            task,
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn gate(&self) -> &HumanGate {
        &self.gate
    }

    /// Latest state published by the executor
    pub fn snapshot(&self) -> Run {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> RunStatus {
        self.snapshot.borrow().status.clone()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.borrow().finished_at
    }

    /// Ask the executor to stop at its next suspension point.
    ///
    /// Returns false if the run was already terminal.
    pub fn request_cancel(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.cancel_tx.send_replace(true);
        true
    }

    /// Take exclusive hold of the event stream, if nobody else has it
    pub fn try_take_stream(&self) -> Option<OwnedMutexGuard<EventStream>> {
        Arc::clone(&self.stream).try_lock_owned().ok()
    }

    /// Wait until the run reaches a terminal status
    pub async fn wait_finished(&self) -> Run {
        let mut rx = self.snapshot.clone();
        let finished = rx.wait_for(|run| run.is_finished()).await.ok().map(|run| run.clone());
        match finished {
            Some(run) => run,
            // Executor gone; its last snapshot is final
            None => rx.borrow().clone(),
        }
    }

    /// Whether the executor task has exited
    pub fn is_task_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Process-wide map from run id to context
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, Arc<RunContext>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, context: Arc<RunContext>) {
        let run_id = context.run_id().clone();
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id.clone(), context);
        debug!(%run_id, "Run registered");
    }

    pub fn get(&self, run_id: &RunId) -> Result<Arc<RunContext>, OrchestratorError> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(run_id.clone()))
    }

    /// Request cooperative stop of a run; a no-op if it already finished.
    ///
    /// Returns whether a cancel was actually requested.
    pub fn cancel(&self, run_id: &RunId) -> Result<bool, OrchestratorError> {
        let context = self.get(run_id)?;
        let requested = context.request_cancel();
        if requested {
            info!(%run_id, "Cancel requested");
        } else {
            debug!(%run_id, "Cancel ignored, run already finished");
        }
        Ok(requested)
    }

    /// Remove a finished run
    pub fn close(&self, run_id: &RunId) -> Result<(), OrchestratorError> {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        let context = runs
            .get(run_id)
            .ok_or_else(|| OrchestratorError::NotFound(run_id.clone()))?;

        if !context.status().is_terminal() {
            return Err(OrchestratorError::conflict(run_id, "run is still running"));
        }

        runs.remove(run_id);
        debug!(%run_id, "Run closed");
        Ok(())
    }

    /// Remove runs that finished at least `retention` ago
    pub fn reap(&self, retention: Duration) -> Vec<RunId> {
        let now = Utc::now();
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);

        let expired: Vec<RunId> = runs
            .values()
            .filter(|context| {
                context
                    .finished_at()
                    .and_then(|finished| (now - finished).to_std().ok())
                    .map(|age| age >= retention)
                    .unwrap_or(false)
            })
            .map(|context| context.run_id().clone())
            .collect();

        for run_id in &expired {
            runs.remove(run_id);
        }
        expired
    }

    /// Snapshots of all registered runs, most recent first
    pub fn list(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|context| context.snapshot())
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodically reap finished runs older than `retention`
pub fn spawn_reaper(
    registry: Arc<RunRegistry>,
    interval: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let reaped = registry.reap(retention);
            if !reaped.is_empty() {
                info!(count = reaped.len(), "Reaped finished runs");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedWorker;

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn launch(input: &str) -> Arc<RunContext> {
        let run = Run::new(RunId::generate(), "test", input);
        RunContext::launch(run, Arc::new(SimulatedWorker::instant()), TIMEOUT)
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_unknown_run() {
        let registry = RunRegistry::new();
        let err = registry.get(&RunId::from("run_missing")).err().unwrap();
        assert!(err.is_not_found());
        assert!(registry.cancel(&RunId::from("run_missing")).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_close() {
        let registry = RunRegistry::new();
        let context = launch("hello");
        let run_id = context.run_id().clone();
        registry.insert(context);

        // Still running: close is refused
        let err = registry.close(&run_id).unwrap_err();
        assert!(err.is_conflict());

        assert!(registry.cancel(&run_id).unwrap());
        let run = registry.get(&run_id).unwrap().wait_finished().await;
        assert_eq!(run.status.label(), "canceled");

        // Terminal: cancel is a no-op
        assert!(!registry.cancel(&run_id).unwrap());

        registry.close(&run_id).unwrap();
        assert!(registry.get(&run_id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_is_exclusive() {
        let context = launch("hello");
        let held = context.try_take_stream();
        assert!(held.is_some());
        assert!(context.try_take_stream().is_none());

        drop(held);
        assert!(context.try_take_stream().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_only_finished_runs() {
        let registry = RunRegistry::new();
        let finished = launch("done");
        let running = launch("waiting");
        let finished_id = finished.run_id().clone();
        let running_id = running.run_id().clone();
        registry.insert(Arc::clone(&finished));
        registry.insert(running);

        finished.request_cancel();
        finished.wait_finished().await;

        let reaped = registry.reap(Duration::ZERO);
        assert_eq!(reaped, vec![finished_id]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&running_id).is_ok());
        assert_eq!(registry.list().len(), 1);
    }
}
