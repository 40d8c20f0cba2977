//! Domain types for the run orchestrator.
//!
//! This module contains the core data structures:
//! - Events: Immutable envelopes describing a run's progress
//! - Run: Lifecycle status and state threaded between steps
//! - UI: Human-in-the-loop requests and responses

pub mod events;
pub mod run;
pub mod ui;

// Re-export commonly used types
pub use events::{Envelope, ErrorInfo, Event, EventType, LogLevel, ENVELOPE_VERSION};
pub use run::{PipelineState, Run, RunId, RunStatus, StepId, StepKind};
pub use ui::{Decision, RequestId, UiDescriptor, UiResponse};
