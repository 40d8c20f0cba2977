//! Event envelopes streamed to the observer of a run.
//!
//! Every observable occurrence in a run is one immutable [`Envelope`].
//! Within a run, `seq` gives the total order of its history.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::run::{PipelineState, RunId, StepId, StepKind};
use super::ui::{RequestId, UiDescriptor};

/// Schema version stamped on every envelope
pub const ENVELOPE_VERSION: u32 = 1;

/// One emitted occurrence.
///
/// Wire shape: `{v, runId, seq, ts, type, spanId, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Fixed schema version
    #[serde(rename = "v")]
    pub version: u32,

    /// Run this envelope belongs to
    #[serde(rename = "runId")]
    pub run_id: RunId,

    /// Position in the run's history, starting at 1
    pub seq: u64,

    /// Milliseconds since the Unix epoch at emission
    #[serde(rename = "ts")]
    pub timestamp: i64,

    /// Step this event belongs to; `None` for run-level events
    #[serde(rename = "spanId")]
    pub span_id: Option<StepId>,

    /// Type tag and payload
    #[serde(flatten)]
    pub event: Event,
}

impl Envelope {
    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }
}

/// Typed event, serialized as `"type"` + `"payload"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    #[serde(rename = "run.started")]
    RunStarted(RunStarted),

    #[serde(rename = "step.started")]
    StepStarted(StepStarted),

    #[serde(rename = "step.progress")]
    StepProgress(StepProgress),

    #[serde(rename = "step.completed")]
    StepCompleted(StepCompleted),

    #[serde(rename = "step.failed")]
    StepFailed(StepFailed),

    #[serde(rename = "log.appended")]
    LogAppended(LogAppended),

    #[serde(rename = "ui.request")]
    UiRequest(UiRequest),

    #[serde(rename = "run.completed")]
    RunCompleted(RunCompleted),

    #[serde(rename = "run.failed")]
    RunFailed(RunFailed),

    #[serde(rename = "run.canceled")]
    RunCanceled(RunCanceled),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::RunStarted(_) => EventType::RunStarted,
            Self::StepStarted(_) => EventType::StepStarted,
            Self::StepProgress(_) => EventType::StepProgress,
            Self::StepCompleted(_) => EventType::StepCompleted,
            Self::StepFailed(_) => EventType::StepFailed,
            Self::LogAppended(_) => EventType::LogAppended,
            Self::UiRequest(_) => EventType::UiRequest,
            Self::RunCompleted(_) => EventType::RunCompleted,
            Self::RunFailed(_) => EventType::RunFailed,
            Self::RunCanceled(_) => EventType::RunCanceled,
        }
    }

    /// Whether this event ends the run
    pub fn is_terminal(&self) -> bool {
        self.event_type().is_terminal()
    }

    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::LogAppended(LogAppended {
            level,
            message: message.into(),
        })
    }
}

/// The closed set of event types observers can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    RunStarted,
    StepStarted,
    StepProgress,
    StepCompleted,
    StepFailed,
    LogAppended,
    UiRequest,
    RunCompleted,
    RunFailed,
    RunCanceled,
}

impl EventType {
    /// Dotted wire name (e.g. `step.progress`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run.started",
            Self::StepStarted => "step.started",
            Self::StepProgress => "step.progress",
            Self::StepCompleted => "step.completed",
            Self::StepFailed => "step.failed",
            Self::LogAppended => "log.appended",
            Self::UiRequest => "ui.request",
            Self::RunCompleted => "run.completed",
            Self::RunFailed => "run.failed",
            Self::RunCanceled => "run.canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted | Self::RunFailed | Self::RunCanceled
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStarted {
    pub name: String,
    pub input: RunInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInput {
    pub user_input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStarted {
    pub step_id: StepId,
    pub title: String,
    pub kind: StepKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgress {
    pub step_id: StepId,
    /// Fraction complete, in (0, 1]
    pub progress: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompleted {
    pub step_id: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailed {
    pub step_id: StepId,
    pub error: ErrorInfo,
}

/// Error details carried by failure events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub retriable: bool,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>, retriable: bool) -> Self {
        Self {
            message: message.into(),
            retriable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogAppended {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiRequest {
    pub request_id: RequestId,
    pub ui: UiDescriptor,
    /// Whether the run is blocked until a response arrives
    pub blocking: bool,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompleted {
    pub output: PipelineState,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailed {
    pub error: ErrorInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCanceled {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(span_id: Option<StepId>, event: Event) -> Envelope {
        Envelope {
            version: ENVELOPE_VERSION,
            run_id: RunId::from("run_0123456789"),
            seq: 3,
            timestamp: 1_700_000_000_000,
            span_id,
            event,
        }
    }

    #[test]
    fn test_envelope_wire_shape() {
        let env = envelope(
            Some(StepId::Execute),
            Event::StepProgress(StepProgress {
                step_id: StepId::Execute,
                progress: 0.6,
                message: "Working...".to_string(),
            }),
        );

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["v"], 1);
        assert_eq!(json["runId"], "run_0123456789");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["ts"], 1_700_000_000_000i64);
        assert_eq!(json["type"], "step.progress");
        assert_eq!(json["spanId"], "execute");
        assert_eq!(json["payload"]["stepId"], "execute");
        assert_eq!(json["payload"]["progress"], 0.6);
    }

    #[test]
    fn test_run_level_event_has_null_span() {
        let env = envelope(
            None,
            Event::RunFailed(RunFailed {
                error: ErrorInfo::new("UI response timeout", false),
            }),
        );

        let json = serde_json::to_value(&env).unwrap();
        assert!(json["spanId"].is_null());
        assert_eq!(json["type"], "run.failed");
        assert_eq!(json["payload"]["error"]["retriable"], false);
    }

    #[test]
    fn test_event_type_names() {
        let started = Event::RunStarted(RunStarted {
            name: "Approval Pipeline".to_string(),
            input: RunInput {
                user_input: "hello".to_string(),
            },
        });
        assert_eq!(started.event_type().as_str(), "run.started");
        assert!(!started.is_terminal());

        let canceled = Event::RunCanceled(RunCanceled {
            reason: "User canceled".to_string(),
        });
        assert_eq!(canceled.event_type().to_string(), "run.canceled");
        assert!(canceled.is_terminal());
        assert!(EventType::RunCompleted.is_terminal());
        assert!(!EventType::StepFailed.is_terminal());
    }

    #[test]
    fn test_ui_request_payload() {
        let event = Event::UiRequest(UiRequest {
            request_id: RequestId::from("rq_00c0ffee"),
            ui: UiDescriptor::approval_prompt(),
            blocking: true,
            timeout_ms: 60_000,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ui.request");
        assert_eq!(json["payload"]["requestId"], "rq_00c0ffee");
        assert_eq!(json["payload"]["timeoutMs"], 60_000);
        assert_eq!(json["payload"]["blocking"], true);
    }
}
