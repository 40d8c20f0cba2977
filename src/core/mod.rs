//! Core orchestration logic.
//!
//! This module contains:
//! - Channel: Ordered per-run event channel with an end marker
//! - Gate: Single-slot human-in-the-loop handoff
//! - Pipeline: Pure step transitions
//! - Executor: Drives a run through its steps
//! - Registry: Run contexts and their lifecycle
//! - Stream: Adapter forwarding a run's events to an observer
//! - Orchestrator: Operations exposed to the transport layer

pub mod channel;
pub mod error;
pub mod executor;
pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod stream;

// Re-export commonly used types
pub use channel::{event_channel, EventSink, EventStream, StreamItem};
pub use error::{ChannelClosed, GateError, OrchestratorError, ProgressError};
pub use executor::{CancelSignal, PipelineExecutor, ProgressReporter};
pub use gate::{GateStatus, GateTicket, HumanGate};
pub use orchestrator::Orchestrator;
pub use registry::{RunContext, RunRegistry};
pub use stream::{
    forward, CollectingObserver, Framing, Notification, Observer, StreamSummary, Subscription,
    WriterObserver,
};
