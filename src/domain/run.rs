//! Run state for a single execution of the approval pipeline.
//!
//! A Run is owned by its executor; everyone else sees snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque run identifier (`run_` + 10 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh run identifier
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("run_{}", &hex[..10]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The fixed pipeline steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Plan,
    Approval,
    Execute,
}

impl StepId {
    /// Step the pipeline starts with
    pub const FIRST: StepId = StepId::Plan;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Approval => "approval",
            Self::Execute => "execute",
        }
    }

    /// Human-readable title shown by observers
    pub fn title(&self) -> &'static str {
        match self {
            Self::Plan => "Plan",
            Self::Approval => "Approval",
            Self::Execute => "Execute",
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Self::Plan => StepKind::Planning,
            Self::Approval => StepKind::Custom,
            Self::Execute => StepKind::Generation,
        }
    }

    /// The step that follows this one, if any
    pub fn next(&self) -> Option<StepId> {
        match self {
            Self::Plan => Some(Self::Approval),
            Self::Approval => Some(Self::Execute),
            Self::Execute => None,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of work a step performs (informational for observers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Planning,
    Custom,
    Generation,
}

/// State threaded from step to step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Input the run was started with
    pub user_input: String,

    /// Decision recorded by the approval step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,

    /// Output of the execute step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl PipelineState {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            approved: None,
            result: None,
        }
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Steps are still executing (or waiting on a human)
    #[default]
    Running,

    /// All steps completed
    Completed,

    /// A step failed or the approval deadline elapsed
    Failed { error: String },

    /// Canceled by the human actor or an external cancel request
    Canceled { reason: String },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Canceled { .. } => "canceled",
        }
    }
}

/// One execution of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: RunId,

    /// Pipeline name reported in `run.started`
    pub name: String,

    /// Current status; terminal once it leaves `Running`
    pub status: RunStatus,

    /// Step currently executing (the last one entered once terminal)
    pub current_step: Option<StepId>,

    /// Accumulated state produced by prior steps
    pub state: PipelineState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new run in the `Running` status
    pub fn new(id: RunId, name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: RunStatus::Running,
            current_step: None,
            state: PipelineState::new(input),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn input(&self) -> &str {
        &self.state.user_input
    }

    /// Move the run to a terminal status.
    ///
    /// Returns false (and changes nothing) if the run is already terminal;
    /// status never regresses.
    pub fn finish(&mut self, status: RunStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Running)
    }

    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }
}
