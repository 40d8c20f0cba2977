//! runstream - Run orchestrator with streamed events and human approval
//!
//! Executes a fixed `Plan -> Approval -> Execute` pipeline per run,
//! streaming every step as an ordered event log to one observer. The
//! approval step blocks on a human gate until someone responds or the
//! deadline passes.
//!
//! # Architecture
//!
//! - Each run gets an event channel, a human gate and an executor task
//! - Events carry a per-run `seq` starting at 1; an end marker closes
//!   the stream after the terminal event
//! - Cancellation is cooperative and still ends the stream cleanly
//!
//! # Modules
//!
//! - `adapters`: Step worker interface and the simulated worker
//! - `core`: Orchestration logic (Channel, Gate, Executor, Registry)
//! - `domain`: Data structures (Envelope, Run, UI request/response)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Stream a run as SSE frames, approving from stdin
//! runstream run "hello"
//!
//! # Approve automatically, JSON lines output
//! runstream run "hello" --decision approve --format json
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::RuntimeConfig;
pub use crate::core::{Orchestrator, OrchestratorError, Subscription};
pub use domain::{Envelope, Event, EventType, Run, RunId, RunStatus, UiResponse};
