//! Ordered per-run event channel.
//!
//! One producer (the run's executor) appends envelopes; one consumer
//! drains them in order. The end marker is always the last item.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{Envelope, Event, RunId, StepId, ENVELOPE_VERSION};

use super::error::ChannelClosed;

/// Item carried by the channel
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(Envelope),
    /// No further envelopes will be produced
    End,
}

/// Create the channel for a run
pub fn event_channel(run_id: RunId) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = EventSink {
        run_id,
        tx,
        next_seq: 1,
        closed: false,
    };
    let stream = EventStream {
        rx,
        finished: false,
    };
    (sink, stream)
}

/// Producer half; stamps sequence numbers in emission order
pub struct EventSink {
    run_id: RunId,
    tx: mpsc::UnboundedSender<StreamItem>,
    next_seq: u64,
    closed: bool,
}

impl EventSink {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Append an event to the tail, returning its `seq`
    pub fn emit(&mut self, span_id: Option<StepId>, event: Event) -> Result<u64, ChannelClosed> {
        if self.closed {
            return Err(ChannelClosed);
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            run_id: self.run_id.clone(),
            seq,
            timestamp: Utc::now().timestamp_millis(),
            span_id,
            event,
        };
        debug!(run_id = %self.run_id, seq, event_type = %envelope.event_type(), "Emitting event");

        // The consumer may be gone (run closed); ordering is unaffected
        if self.tx.send(StreamItem::Event(envelope)).is_err() {
            debug!(run_id = %self.run_id, seq, "Event stream dropped, event discarded");
        }

        Ok(seq)
    }

    /// Append the end marker. Returns false if it was already appended.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        let _ = self.tx.send(StreamItem::End);
        debug!(run_id = %self.run_id, emitted = self.emitted(), "Event channel closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of envelopes emitted so far
    pub fn emitted(&self) -> u64 {
        self.next_seq - 1
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        if !self.closed {
            warn!(run_id = %self.run_id, "Event sink dropped before end marker, closing");
            self.close();
        }
    }
}

/// Consumer half
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StreamItem>,
    finished: bool,
}

impl EventStream {
    /// Wait for the next envelope.
    ///
    /// Returns `None` once the end marker is received, and on every call
    /// after that.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(StreamItem::Event(envelope)) => Some(envelope),
            Some(StreamItem::End) | None => {
                self.finished = true;
                None
            }
        }
    }

    /// Whether the end marker has been consumed
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, LogLevel};

    fn log(message: &str) -> Event {
        Event::log(LogLevel::Info, message)
    }

    #[tokio::test]
    async fn test_seq_starts_at_one_without_gaps() {
        let (mut sink, mut stream) = event_channel(RunId::from("run_test"));

        for i in 0..5 {
            let seq = sink.emit(None, log(&format!("line {}", i))).unwrap();
            assert_eq!(seq, i + 1);
        }
        sink.close();

        let mut seen = Vec::new();
        while let Some(env) = stream.recv().await {
            assert_eq!(env.run_id.as_str(), "run_test");
            seen.push(env.seq);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert!(stream.is_finished());
    }

    #[tokio::test]
    async fn test_end_marker_is_last() {
        let (mut sink, mut stream) = event_channel(RunId::from("run_test"));

        sink.emit(Some(StepId::Plan), log("planning")).unwrap();
        assert!(sink.close());
        assert!(!sink.close());
        assert_eq!(sink.emit(None, log("too late")), Err(ChannelClosed));
        assert_eq!(sink.emitted(), 1);

        let env = stream.recv().await.unwrap();
        assert_eq!(env.event_type(), EventType::LogAppended);
        assert_eq!(env.span_id, Some(StepId::Plan));
        assert!(stream.recv().await.is_none());
        // Still none; the marker is never replayed
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_sink_appends_end() {
        let (mut sink, mut stream) = event_channel(RunId::from("run_test"));
        sink.emit(None, log("only")).unwrap();
        drop(sink);

        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
        assert!(stream.is_finished());
    }

    #[test]
    fn test_emit_without_consumer_keeps_counting() {
        let (mut sink, stream) = event_channel(RunId::from("run_test"));
        drop(stream);

        assert_eq!(sink.emit(None, log("a")), Ok(1));
        assert_eq!(sink.emit(None, log("b")), Ok(2));
    }
}
