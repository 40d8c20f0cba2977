//! Stream adapter: drains a run's event channel into an observer.
//!
//! The adapter forwards envelopes in order, exactly once each, and stops
//! for good after the end marker. It never affects production: events
//! emitted before a subscriber arrives wait in the channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::domain::{Envelope, RunId};

use super::channel::EventStream;

/// Exclusive consumer handle on one run's event stream.
///
/// Dropping it lets a later subscriber continue from whatever is still
/// buffered; already-consumed envelopes are not replayed.
pub struct Subscription {
    run_id: RunId,
    stream: OwnedMutexGuard<EventStream>,
}

impl Subscription {
    pub(crate) fn new(run_id: RunId, stream: OwnedMutexGuard<EventStream>) -> Self {
        Self { run_id, stream }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Next envelope, or `None` once the end marker has been reached
    pub async fn next(&mut self) -> Option<Envelope> {
        self.stream.recv().await
    }

    pub fn is_finished(&self) -> bool {
        self.stream.is_finished()
    }

    /// Drain the remaining envelopes up to the end marker
    pub async fn collect(mut self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Some(envelope) = self.next().await {
            envelopes.push(envelope);
        }
        envelopes
    }
}

/// Outward notification delivered to an observer
#[derive(Debug, Clone)]
pub enum Notification {
    /// Stream opened for this run
    Connected(RunId),
    Event(Envelope),
    /// End marker reached; nothing follows
    End,
}

/// Receiver of a run's notifications (an SSE connection, a terminal...)
#[async_trait]
pub trait Observer: Send {
    /// Deliver one notification. An error means the observer went away.
    async fn notify(&mut self, notification: Notification) -> Result<()>;
}

/// Result of forwarding a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Envelopes delivered to the observer
    pub delivered: u64,
}

/// Forward every envelope to `observer` until the end marker.
///
/// Returns an error if the observer fails; the subscription is released
/// so another observer can pick up the remaining envelopes.
pub async fn forward<O>(mut subscription: Subscription, observer: &mut O) -> Result<StreamSummary>
where
    O: Observer + ?Sized,
{
    let run_id = subscription.run_id().clone();
    observer
        .notify(Notification::Connected(run_id.clone()))
        .await
        .context("Observer rejected connection")?;

    let mut delivered = 0u64;
    while let Some(envelope) = subscription.next().await {
        let seq = envelope.seq;
        observer
            .notify(Notification::Event(envelope))
            .await
            .with_context(|| format!("Failed to deliver event {} of run {}", seq, run_id))?;
        delivered += 1;
    }

    observer
        .notify(Notification::End)
        .await
        .context("Failed to deliver end of stream")?;
    debug!(%run_id, delivered, "Stream finished");

    Ok(StreamSummary { delivered })
}

/// Wire framing for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Server-sent events: `event: message` + `data: <json>`
    Sse,
    /// One JSON envelope per line; connection markers are omitted
    JsonLines,
}

impl Framing {
    /// Encode a notification, or `None` if this framing has no form for it
    pub fn encode(&self, notification: &Notification) -> Result<Option<String>> {
        let frame = match (self, notification) {
            (Self::Sse, Notification::Connected(_)) => Some(": connected\n\n".to_string()),
            (Self::Sse, Notification::Event(envelope)) => Some(format!(
                "event: message\ndata: {}\n\n",
                serde_json::to_string(envelope).context("Failed to serialize envelope")?
            )),
            (Self::Sse, Notification::End) => Some(": end\n\n".to_string()),
            (Self::JsonLines, Notification::Event(envelope)) => Some(format!(
                "{}\n",
                serde_json::to_string(envelope).context("Failed to serialize envelope")?
            )),
            (Self::JsonLines, _) => None,
        };
        Ok(frame)
    }
}

/// Observer writing framed notifications to any async writer
pub struct WriterObserver<W> {
    writer: W,
    framing: Framing,
}

impl<W> WriterObserver<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, framing: Framing) -> Self {
        Self { writer, framing }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> Observer for WriterObserver<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn notify(&mut self, notification: Notification) -> Result<()> {
        if let Some(frame) = self.framing.encode(&notification)? {
            self.writer
                .write_all(frame.as_bytes())
                .await
                .context("Failed to write frame")?;
            self.writer.flush().await.context("Failed to flush frame")?;
        }
        Ok(())
    }
}

/// Observer that keeps everything in memory
#[derive(Debug, Default)]
pub struct CollectingObserver {
    pub connected: bool,
    pub envelopes: Vec<Envelope>,
    pub ended: bool,
}

#[async_trait]
impl Observer for CollectingObserver {
    async fn notify(&mut self, notification: Notification) -> Result<()> {
        match notification {
            Notification::Connected(_) => self.connected = true,
            Notification::Event(envelope) => {
                if self.ended {
                    anyhow::bail!("event {} delivered after end of stream", envelope.seq);
                }
                self.envelopes.push(envelope);
            }
            Notification::End => self.ended = true,
        }
        Ok(())
    }
}
