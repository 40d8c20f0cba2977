//! Errors returned to callers of the orchestrator.
//!
//! Run-internal failures (step errors, approval timeouts) never show up
//! here; the executor turns them into `run.failed` events instead.

use thiserror::Error;

use crate::domain::{RequestId, RunId};

/// Errors from the transport-facing operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("run not found: {0}")]
    NotFound(RunId),

    #[error("conflict on run {run_id}: {reason}")]
    Conflict { run_id: RunId, reason: String },
}

impl OrchestratorError {
    pub fn conflict(run_id: &RunId, reason: impl Into<String>) -> Self {
        Self::Conflict {
            run_id: run_id.clone(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Errors from the Human Gate state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("gate already has an outstanding request: {0}")]
    AlreadyOpen(RequestId),

    #[error("no pending ui request")]
    NotOpen,

    #[error("response for {got} does not match pending request {expected}")]
    StaleRequest { expected: RequestId, got: RequestId },

    #[error("UI response timeout")]
    TimedOut,

    #[error("gate dropped before a response arrived")]
    Abandoned,
}

/// Invalid progress report from step work
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgressError {
    #[error("progress {0} is outside (0, 1]")]
    OutOfRange(f64),

    #[error("progress {next} does not advance past {last}")]
    NotIncreasing { last: f64, next: f64 },
}

/// The event channel was already terminated with its end marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event channel is closed")]
pub struct ChannelClosed;
