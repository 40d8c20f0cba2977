//! Step transitions for the fixed `Plan -> Approval -> Execute` pipeline.
//!
//! Each transition is a pure function `(Run, StepInput) -> StepOutcome`:
//! it takes the run by value and hands back the updated run, the events
//! to emit, and where the executor goes next. The executor does the I/O.

use std::time::Duration;

use serde_json::json;

use crate::domain::events::{
    RunCanceled, RunCompleted, RunFailed, RunInput, RunStarted, StepCompleted, StepFailed,
    StepStarted, UiRequest,
};
use crate::domain::{
    Decision, ErrorInfo, Event, LogLevel, RequestId, Run, RunStatus, StepId, UiDescriptor,
};

/// Reason reported when the human actor cancels at the approval step
pub const USER_CANCEL_REASON: &str = "User canceled";

/// Reason reported when an external cancel request stops the run
pub const EXTERNAL_CANCEL_REASON: &str = "Run canceled by request";

/// Failure message when nobody answers the approval request in time
pub const APPROVAL_TIMEOUT_MESSAGE: &str = "UI response timeout";

/// An event plus the step span it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub span_id: Option<StepId>,
    pub event: Event,
}

impl Emission {
    pub fn run(event: Event) -> Self {
        Self {
            span_id: None,
            event,
        }
    }

    pub fn step(step: StepId, event: Event) -> Self {
        Self {
            span_id: Some(step),
            event,
        }
    }
}

/// What a step's work produced
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    /// Plan work finished with this state
    Planned(crate::domain::PipelineState),

    /// The human actor answered the approval request
    Decided(Decision),

    /// Nobody answered before the deadline
    ApprovalTimedOut,

    /// Execute work finished with this state
    Executed(crate::domain::PipelineState),

    /// Step work raised an error
    Failed { message: String },

    /// An external cancel request arrived
    Canceled,
}

/// Where the executor goes after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Step(StepId),
    Finish(RunStatus),
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub run: Run,
    pub emissions: Vec<Emission>,
    pub next: Next,
}

/// `run.started` for a freshly created run
pub fn run_started(run: &Run) -> Emission {
    Emission::run(Event::RunStarted(RunStarted {
        name: run.name.clone(),
        input: RunInput {
            user_input: run.input().to_string(),
        },
    }))
}

/// Events announcing that `step` has begun
pub fn step_started(step: StepId) -> Vec<Emission> {
    let mut emissions = vec![Emission::step(
        step,
        Event::StepStarted(StepStarted {
            step_id: step,
            title: step.title().to_string(),
            kind: step.kind(),
        }),
    )];

    if step == StepId::Plan {
        emissions.push(Emission::step(step, Event::log(LogLevel::Info, "Planning...")));
    }

    emissions
}

/// Events telling the observer a response is needed
pub fn approval_requested(request_id: &RequestId, timeout: Duration) -> Vec<Emission> {
    vec![
        Emission::step(
            StepId::Approval,
            Event::UiRequest(UiRequest {
                request_id: request_id.clone(),
                ui: UiDescriptor::approval_prompt(),
                blocking: true,
                timeout_ms: timeout.as_millis() as u64,
            }),
        ),
        Emission::step(
            StepId::Approval,
            Event::log(LogLevel::Info, "Waiting for user action..."),
        ),
    ]
}

/// Apply the result of `step`'s work to the run
pub fn transition(mut run: Run, step: StepId, input: StepInput) -> StepOutcome {
    run.current_step = Some(step);

    match (step, input) {
        (_, StepInput::Canceled) => canceled(run, EXTERNAL_CANCEL_REASON, Vec::new()),

        (_, StepInput::Failed { message }) => failed(run, step, message),

        (StepId::Plan, StepInput::Planned(state)) => {
            run.state = state;
            advance(run, step, None)
        }

        (StepId::Approval, StepInput::Decided(Decision::Cancel)) => {
            run.state.approved = Some(false);
            let completed = step_completed(step, Some(json!({ "approved": false })));
            canceled(run, USER_CANCEL_REASON, vec![completed])
        }

        (StepId::Approval, StepInput::Decided(decision)) => {
            let approved = decision == Decision::Approve;
            run.state.approved = Some(approved);
            advance(run, step, Some(json!({ "approved": approved })))
        }

        (StepId::Approval, StepInput::ApprovalTimedOut) => {
            failed(run, step, APPROVAL_TIMEOUT_MESSAGE.to_string())
        }

        (StepId::Execute, StepInput::Executed(state)) => {
            run.state = state;
            let result = run.state.result.clone();
            let summary = result.clone().unwrap_or_default();

            let emissions = vec![
                step_completed(step, Some(json!({ "result": result }))),
                Emission::run(Event::RunCompleted(RunCompleted {
                    output: run.state.clone(),
                    summary,
                })),
            ];
            finish(run, emissions, RunStatus::Completed)
        }

        (step, input) => failed(
            run,
            step,
            format!("step '{}' cannot accept {:?}", step, input),
        ),
    }
}

fn step_completed(step: StepId, output: Option<serde_json::Value>) -> Emission {
    Emission::step(
        step,
        Event::StepCompleted(StepCompleted {
            step_id: step,
            output,
        }),
    )
}

fn advance(run: Run, step: StepId, output: Option<serde_json::Value>) -> StepOutcome {
    let emissions = vec![step_completed(step, output)];
    let next = match step.next() {
        Some(next) => Next::Step(next),
        // Execute is handled explicitly; nothing else is last
        None => Next::Finish(RunStatus::Completed),
    };
    StepOutcome {
        run,
        emissions,
        next,
    }
}

fn failed(run: Run, step: StepId, message: String) -> StepOutcome {
    // No retry mechanism exists, so failures are never retriable
    let error = ErrorInfo::new(message.clone(), false);
    let emissions = vec![
        Emission::step(
            step,
            Event::StepFailed(StepFailed {
                step_id: step,
                error: error.clone(),
            }),
        ),
        Emission::run(Event::RunFailed(RunFailed { error })),
    ];
    finish(run, emissions, RunStatus::Failed { error: message })
}

fn canceled(run: Run, reason: &str, mut emissions: Vec<Emission>) -> StepOutcome {
    emissions.push(Emission::run(Event::RunCanceled(RunCanceled {
        reason: reason.to_string(),
    })));
    finish(
        run,
        emissions,
        RunStatus::Canceled {
            reason: reason.to_string(),
        },
    )
}

fn finish(mut run: Run, emissions: Vec<Emission>, status: RunStatus) -> StepOutcome {
    run.finish(status.clone());
    StepOutcome {
        run,
        emissions,
        next: Next::Finish(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, PipelineState, RunId};

    fn new_run() -> Run {
        Run::new(RunId::from("run_test"), "Approval Pipeline", "hello")
    }

    fn types(outcome: &StepOutcome) -> Vec<EventType> {
        outcome
            .emissions
            .iter()
            .map(|e| e.event.event_type())
            .collect()
    }

    #[test]
    fn test_run_started_carries_input() {
        let emission = run_started(&new_run());
        assert_eq!(emission.span_id, None);
        let json = serde_json::to_value(&emission.event).unwrap();
        assert_eq!(json["payload"]["input"]["user_input"], "hello");
        assert_eq!(json["payload"]["name"], "Approval Pipeline");
    }

    #[test]
    fn test_plan_started_logs() {
        let emissions = step_started(StepId::Plan);
        assert_eq!(emissions.len(), 2);
        assert_eq!(emissions[0].event.event_type(), EventType::StepStarted);
        assert_eq!(emissions[1].event.event_type(), EventType::LogAppended);
        assert!(emissions.iter().all(|e| e.span_id == Some(StepId::Plan)));

        assert_eq!(step_started(StepId::Approval).len(), 1);
    }

    #[test]
    fn test_plan_advances_to_approval() {
        let outcome = transition(
            new_run(),
            StepId::Plan,
            StepInput::Planned(PipelineState::new("hello")),
        );
        assert_eq!(types(&outcome), vec![EventType::StepCompleted]);
        assert_eq!(outcome.next, Next::Step(StepId::Approval));
        assert!(outcome.run.is_running());
    }

    #[test]
    fn test_approval_approve() {
        let outcome = transition(
            new_run(),
            StepId::Approval,
            StepInput::Decided(Decision::Approve),
        );
        assert_eq!(outcome.next, Next::Step(StepId::Execute));
        assert_eq!(outcome.run.state.approved, Some(true));

        let json = serde_json::to_value(&outcome.emissions[0].event).unwrap();
        assert_eq!(json["payload"]["output"]["approved"], true);
    }

    #[test]
    fn test_approval_decline_still_executes() {
        let outcome = transition(
            new_run(),
            StepId::Approval,
            StepInput::Decided(Decision::Decline),
        );
        assert_eq!(outcome.next, Next::Step(StepId::Execute));
        assert_eq!(outcome.run.state.approved, Some(false));
    }

    #[test]
    fn test_approval_cancel() {
        let outcome = transition(
            new_run(),
            StepId::Approval,
            StepInput::Decided(Decision::Cancel),
        );
        assert_eq!(
            types(&outcome),
            vec![EventType::StepCompleted, EventType::RunCanceled]
        );
        assert_eq!(
            outcome.run.status,
            RunStatus::Canceled {
                reason: USER_CANCEL_REASON.to_string()
            }
        );
        assert!(matches!(outcome.next, Next::Finish(RunStatus::Canceled { .. })));
    }

    #[test]
    fn test_approval_timeout_is_not_retriable() {
        let outcome = transition(new_run(), StepId::Approval, StepInput::ApprovalTimedOut);
        assert_eq!(
            types(&outcome),
            vec![EventType::StepFailed, EventType::RunFailed]
        );

        let json = serde_json::to_value(&outcome.emissions[1].event).unwrap();
        assert_eq!(json["payload"]["error"]["message"], APPROVAL_TIMEOUT_MESSAGE);
        assert_eq!(json["payload"]["error"]["retriable"], false);
        assert_eq!(outcome.run.status.label(), "failed");
    }

    #[test]
    fn test_execute_completes_run() {
        let mut state = PipelineState::new("hello");
        state.approved = Some(true);
        state.result = Some("Done. You asked: hello. Approved=true".to_string());

        let outcome = transition(new_run(), StepId::Execute, StepInput::Executed(state));
        assert_eq!(
            types(&outcome),
            vec![EventType::StepCompleted, EventType::RunCompleted]
        );
        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert_eq!(outcome.next, Next::Finish(RunStatus::Completed));

        let json = serde_json::to_value(&outcome.emissions[1].event).unwrap();
        assert_eq!(json["payload"]["summary"], "Done. You asked: hello. Approved=true");
        assert_eq!(json["payload"]["output"]["approved"], true);
    }

    #[test]
    fn test_external_cancel_from_any_step() {
        for step in [StepId::Plan, StepId::Approval, StepId::Execute] {
            let outcome = transition(new_run(), step, StepInput::Canceled);
            assert_eq!(types(&outcome), vec![EventType::RunCanceled]);
            assert_eq!(outcome.run.status.label(), "canceled");
        }
    }

    #[test]
    fn test_mismatched_input_fails_step() {
        let outcome = transition(
            new_run(),
            StepId::Plan,
            StepInput::Decided(Decision::Approve),
        );
        assert_eq!(
            types(&outcome),
            vec![EventType::StepFailed, EventType::RunFailed]
        );
    }

    #[test]
    fn test_terminal_run_status_is_kept() {
        let mut run = new_run();
        run.finish(RunStatus::Completed);

        let outcome = transition(run, StepId::Execute, StepInput::Canceled);
        assert_eq!(outcome.run.status, RunStatus::Completed);
    }
}
