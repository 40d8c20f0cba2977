//! Streaming Integration Tests
//!
//! Tests for subscribing to a run's event stream: late subscribers,
//! reconnects, forwarding and wire framing.

use anyhow::Result;
use async_trait::async_trait;

use runstream::core::{forward, CollectingObserver, Framing, Notification, Observer, WriterObserver};
use runstream::{Envelope, Event, EventType, Orchestrator, RunStatus, RuntimeConfig, UiResponse};

fn short_deadline() -> RuntimeConfig {
    RuntimeConfig {
        approval_timeout_ms: 1_000,
        ..Default::default()
    }
}

/// Observer that disconnects after a fixed number of events
struct FlakyObserver {
    remaining: usize,
    received: Vec<Envelope>,
}

#[async_trait]
impl Observer for FlakyObserver {
    async fn notify(&mut self, notification: Notification) -> Result<()> {
        if let Notification::Event(envelope) = notification {
            if self.remaining == 0 {
                anyhow::bail!("connection reset");
            }
            self.remaining -= 1;
            self.received.push(envelope);
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_late_subscriber_gets_buffered_history() {
    let orchestrator = Orchestrator::new(short_deadline());
    let run_id = orchestrator.start_run("hello");

    // Let the run finish before anyone listens
    let run = orchestrator.wait(&run_id).await.unwrap();
    assert!(matches!(run.status, RunStatus::Failed { .. }));

    let events = orchestrator.subscribe(&run_id).unwrap().collect().await;
    assert_eq!(events.first().unwrap().event_type(), EventType::RunStarted);
    assert_eq!(events.last().unwrap().event_type(), EventType::RunFailed);
    for (i, envelope) in events.iter().enumerate() {
        assert_eq!(envelope.seq, i as u64 + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_continues_without_duplicates() {
    let orchestrator = Orchestrator::new(short_deadline());
    let run_id = orchestrator.start_run("hello");

    let mut first = orchestrator.subscribe(&run_id).unwrap();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(first.next().await.unwrap().seq);
    }
    drop(first);

    let rest = orchestrator.subscribe(&run_id).unwrap().collect().await;
    seen.extend(rest.iter().map(|e| e.seq));

    let expected: Vec<u64> = (1..=seen.len() as u64).collect();
    assert_eq!(seen, expected);
    assert!(rest.last().unwrap().event_type().is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_after_end_yields_nothing() {
    let orchestrator = Orchestrator::new(short_deadline());
    let run_id = orchestrator.start_run("hello");

    let events = orchestrator.subscribe(&run_id).unwrap().collect().await;
    assert!(!events.is_empty());

    let mut again = orchestrator.subscribe(&run_id).unwrap();
    assert!(again.next().await.is_none());
    assert!(again.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_forward_to_collecting_observer() {
    let orchestrator = Orchestrator::new(short_deadline());
    let run_id = orchestrator.start_run("hello");

    let subscription = orchestrator.subscribe(&run_id).unwrap();
    let mut observer = CollectingObserver::default();
    let summary = forward(subscription, &mut observer).await.unwrap();

    assert!(observer.connected);
    assert!(observer.ended);
    assert_eq!(summary.delivered, observer.envelopes.len() as u64);

    let terminal: Vec<EventType> = observer
        .envelopes
        .iter()
        .map(|e| e.event_type())
        .filter(|t| t.is_terminal())
        .collect();
    assert_eq!(terminal, vec![EventType::RunFailed]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_observer_releases_subscription() {
    let orchestrator = Orchestrator::new(short_deadline());
    let run_id = orchestrator.start_run("hello");

    let mut flaky = FlakyObserver {
        remaining: 2,
        received: Vec::new(),
    };
    let subscription = orchestrator.subscribe(&run_id).unwrap();
    assert!(forward(subscription, &mut flaky).await.is_err());
    assert_eq!(flaky.received.len(), 2);

    // The third envelope was handed to the failed observer and is gone
    let rest = orchestrator.subscribe(&run_id).unwrap().collect().await;
    assert_eq!(rest.first().unwrap().seq, 4);
    assert_eq!(rest.last().unwrap().event_type(), EventType::RunFailed);
}

#[tokio::test(start_paused = true)]
async fn test_sse_frames_for_full_run() {
    let orchestrator = Orchestrator::default();
    let run_id = orchestrator.start_run("hello");

    // Read up to the approval request, answer it, then hand off
    let mut subscription = orchestrator.subscribe(&run_id).unwrap();
    let mut head = Vec::new();
    while let Some(envelope) = subscription.next().await {
        let request = match &envelope.event {
            Event::UiRequest(request) => Some(request.request_id.clone()),
            _ => None,
        };
        head.push(envelope);
        if let Some(request_id) = request {
            orchestrator
                .respond(&run_id, UiResponse::approve(request_id))
                .unwrap();
            break;
        }
    }
    drop(subscription);

    let mut observer = WriterObserver::new(Vec::new(), Framing::Sse);
    let subscription = orchestrator.subscribe(&run_id).unwrap();
    forward(subscription, &mut observer).await.unwrap();
    let output = String::from_utf8(observer.into_inner()).unwrap();

    assert!(output.starts_with(": connected\n\n"));
    assert!(output.ends_with(": end\n\n"));

    let tail: Vec<Envelope> = output
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|json| serde_json::from_str(json).unwrap())
        .collect();

    assert_eq!(tail.first().unwrap().seq, head.len() as u64 + 1);
    assert_eq!(tail.last().unwrap().event_type(), EventType::RunCompleted);
    assert_eq!(
        output.matches("event: message\n").count(),
        tail.len()
    );

    let value: serde_json::Value = serde_json::from_str(
        output
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(value["v"], 1);
    assert_eq!(value["runId"], run_id.as_str());
    assert!(value["ts"].is_i64());
    assert!(value.get("payload").is_some());
}
