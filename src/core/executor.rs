//! Pipeline executor: drives one run from `run.started` to its end marker.
//!
//! The executor is the only producer on the run's event channel and the
//! only mutator of the run. Every suspension point races the cancel
//! signal, so an external cancel stops the run cooperatively and still
//! ends the stream with `run.canceled` and the end marker.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::StepWorker;
use crate::domain::events::StepProgress;
use crate::domain::{Event, Run, StepId};

use super::channel::EventSink;
use super::error::{GateError, ProgressError};
use super::gate::HumanGate;
use super::pipeline::{self, Emission, Next, StepInput};

/// Receiving side of a run's cancel request
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender gone without a request: never cancelled
            std::future::pending::<()>().await;
        }
    }
}

/// Run `work` unless cancellation is requested first
async fn guard<F: Future>(cancel: &mut CancelSignal, work: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = work => Some(output),
    }
}

/// Run worker code under `guard`, turning a panic into an error
async fn guard_worker<F, T>(cancel: &mut CancelSignal, work: F) -> Option<anyhow::Result<T>>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let work = AssertUnwindSafe(work).catch_unwind();
    guard(cancel, work).await.map(|caught| {
        caught.unwrap_or_else(|payload| {
            Err(anyhow::anyhow!(
                "step worker panicked: {}",
                panic_message(payload.as_ref())
            ))
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Emits `step.progress` for the execute step.
///
/// Rejects values outside (0, 1] or not above the previous report.
pub struct ProgressReporter<'a> {
    sink: &'a mut EventSink,
    step: StepId,
    last: f64,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a mut EventSink, step: StepId) -> Self {
        Self {
            sink,
            step,
            last: 0.0,
        }
    }

    /// Report progress as a fraction in (0, 1]
    pub fn report(&mut self, progress: f64, message: impl Into<String>) -> Result<(), ProgressError> {
        if !(progress > 0.0 && progress <= 1.0) {
            return Err(ProgressError::OutOfRange(progress));
        }
        if progress <= self.last {
            return Err(ProgressError::NotIncreasing {
                last: self.last,
                next: progress,
            });
        }

        self.last = progress;
        let event = Event::StepProgress(StepProgress {
            step_id: self.step,
            progress,
            message: message.into(),
        });
        if let Err(e) = self.sink.emit(Some(self.step), event) {
            warn!(step = %self.step, error = %e, "Progress dropped");
        }
        Ok(())
    }

    /// Last reported value (0 before any report)
    pub fn last(&self) -> f64 {
        self.last
    }

    /// Report 1.0 unless the work already did
    fn complete(&mut self, message: &str) {
        if self.last < 1.0 {
            let _ = self.report(1.0, message);
        }
    }
}

/// Drives the `Plan -> Approval -> Execute` state machine for one run
pub struct PipelineExecutor {
    run: Run,
    sink: EventSink,
    gate: Arc<HumanGate>,
    cancel: CancelSignal,
    snapshots: watch::Sender<Run>,
    worker: Arc<dyn StepWorker>,
    approval_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(
        run: Run,
        sink: EventSink,
        gate: Arc<HumanGate>,
        cancel: CancelSignal,
        snapshots: watch::Sender<Run>,
        worker: Arc<dyn StepWorker>,
        approval_timeout: Duration,
    ) -> Self {
        Self {
            run,
            sink,
            gate,
            cancel,
            snapshots,
            worker,
            approval_timeout,
        }
    }

    /// Execute the run to a terminal status and close the event channel
    #[instrument(skip(self), fields(run_id = %self.run.id, worker = self.worker.name()))]
    pub async fn run(mut self) -> Run {
        info!("Starting run");
        self.emit(pipeline::run_started(&self.run));

        let mut step = StepId::FIRST;
        let status = loop {
            let input = if self.cancel.is_cancelled() {
                StepInput::Canceled
            } else {
                self.run.current_step = Some(step);
                self.publish();
                for emission in pipeline::step_started(step) {
                    self.emit(emission);
                }
                debug!(%step, "Step started");

                match step {
                    StepId::Plan => self.plan().await,
                    StepId::Approval => self.approval().await,
                    StepId::Execute => self.execute().await,
                }
            };

            let outcome = pipeline::transition(self.run.clone(), step, input);
            self.run = outcome.run;
            for emission in outcome.emissions {
                self.emit(emission);
            }
            self.publish();

            match outcome.next {
                Next::Step(next) => step = next,
                Next::Finish(status) => break status,
            }
        };

        self.sink.close();
        info!(status = status.label(), events = self.sink.emitted(), "Run finished");
        self.run
    }

    async fn plan(&mut self) -> StepInput {
        let work = self.worker.plan(self.run.state.clone());
        match guard_worker(&mut self.cancel, work).await {
            None => StepInput::Canceled,
            Some(Ok(state)) => StepInput::Planned(state),
            Some(Err(e)) => {
                error!(step = "plan", error = %e, "Step failed");
                StepInput::Failed {
                    message: format!("{:#}", e),
                }
            }
        }
    }

    async fn approval(&mut self) -> StepInput {
        let ticket = match self.gate.open(self.approval_timeout) {
            Ok(ticket) => ticket,
            Err(e) => {
                error!(step = "approval", error = %e, "Failed to open gate");
                return StepInput::Failed {
                    message: e.to_string(),
                };
            }
        };

        let request_id = ticket.request_id().clone();
        for emission in pipeline::approval_requested(&request_id, ticket.timeout()) {
            self.emit(emission);
        }
        info!(%request_id, "Waiting for approval");

        match guard(&mut self.cancel, ticket.wait()).await {
            None => StepInput::Canceled,
            Some(Ok(response)) => {
                let decision = response.decision();
                info!(%request_id, ?decision, "Approval received");
                StepInput::Decided(decision)
            }
            Some(Err(GateError::TimedOut)) => {
                warn!(%request_id, "Approval timed out");
                StepInput::ApprovalTimedOut
            }
            Some(Err(e)) => StepInput::Failed {
                message: e.to_string(),
            },
        }
    }

    async fn execute(&mut self) -> StepInput {
        let state = self.run.state.clone();
        let mut reporter = ProgressReporter::new(&mut self.sink, StepId::Execute);

        let result = {
            let work = self.worker.execute(state, &mut reporter);
            guard_worker(&mut self.cancel, work).await
        };

        match result {
            None => StepInput::Canceled,
            Some(Ok(state)) => {
                reporter.complete("Done.");
                StepInput::Executed(state)
            }
            Some(Err(e)) => {
                error!(step = "execute", error = %e, "Step failed");
                StepInput::Failed {
                    message: format!("{:#}", e),
                }
            }
        }
    }

    fn emit(&mut self, emission: Emission) {
        if let Err(e) = self.sink.emit(emission.span_id, emission.event) {
            warn!(error = %e, "Event emitted after end marker");
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.run.clone());
    }
}
