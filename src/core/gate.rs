//! Single-slot handoff delivering one external response to a blocked step.
//!
//! ```text
//!   Closed --open--> Open --resolve--> Resolved --wait returns--> Closed
//!                     |
//!                     +--deadline--> Closed (wait returns TimedOut)
//! ```
//!
//! Every transition happens under the slot mutex, so a resolve racing the
//! deadline is decided by whichever takes the lock first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::domain::{RequestId, UiResponse};

use super::error::GateError;

enum Slot {
    Closed,
    Open {
        request_id: RequestId,
        responder: oneshot::Sender<UiResponse>,
    },
    Resolved {
        request_id: RequestId,
    },
}

/// Observable state of a gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStatus {
    Closed,
    Open(RequestId),
    Resolved(RequestId),
}

/// Human-in-the-loop gate for one run
pub struct HumanGate {
    slot: Mutex<Slot>,
}

impl Default for HumanGate {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanGate {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Closed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the gate for one response, waiting at most `timeout`
    pub fn open(self: &Arc<Self>, timeout: Duration) -> Result<GateTicket, GateError> {
        let mut slot = self.lock();
        if let Slot::Open { request_id, .. } = &*slot {
            return Err(GateError::AlreadyOpen(request_id.clone()));
        }

        let request_id = RequestId::generate();
        let (responder, rx) = oneshot::channel();
        *slot = Slot::Open {
            request_id: request_id.clone(),
            responder,
        };
        debug!(%request_id, timeout_ms = timeout.as_millis() as u64, "Gate opened");

        Ok(GateTicket {
            gate: Arc::clone(self),
            request_id,
            rx,
            timeout,
        })
    }

    /// Deliver a response to the waiting step.
    ///
    /// Succeeds at most once per opening.
    pub fn resolve(&self, response: UiResponse) -> Result<RequestId, GateError> {
        let mut slot = self.lock();

        match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Open {
                request_id,
                responder,
            } => {
                if response.request_id != request_id {
                    let err = GateError::StaleRequest {
                        expected: request_id.clone(),
                        got: response.request_id,
                    };
                    *slot = Slot::Open {
                        request_id,
                        responder,
                    };
                    return Err(err);
                }

                if responder.send(response).is_err() {
                    // Awaiter already gone; leave the gate closed
                    return Err(GateError::NotOpen);
                }

                info!(%request_id, "Gate resolved");
                *slot = Slot::Resolved {
                    request_id: request_id.clone(),
                };
                Ok(request_id)
            }
            other => {
                *slot = other;
                Err(GateError::NotOpen)
            }
        }
    }

    pub fn status(&self) -> GateStatus {
        match &*self.lock() {
            Slot::Closed => GateStatus::Closed,
            Slot::Open { request_id, .. } => GateStatus::Open(request_id.clone()),
            Slot::Resolved { request_id } => GateStatus::Resolved(request_id.clone()),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status(), GateStatus::Open(_))
    }

    /// Return to Closed if the slot still belongs to `request_id`
    fn release(&self, request_id: &RequestId) {
        let mut slot = self.lock();
        let owned = match &*slot {
            Slot::Open { request_id: id, .. } | Slot::Resolved { request_id: id } => {
                id == request_id
            }
            Slot::Closed => false,
        };
        if owned {
            *slot = Slot::Closed;
        }
    }

    /// Deadline elapsed: close the opening unless a resolve got there first
    fn expire(&self, request_id: &RequestId) -> bool {
        let mut slot = self.lock();
        let still_open =
            matches!(&*slot, Slot::Open { request_id: id, .. } if id == request_id);
        if still_open {
            *slot = Slot::Closed;
        }
        still_open
    }
}

/// Handle held by the step that opened the gate.
///
/// Dropping it closes the gate, so a canceled waiter never leaves a stale
/// request behind.
pub struct GateTicket {
    gate: Arc<HumanGate>,
    request_id: RequestId,
    rx: oneshot::Receiver<UiResponse>,
    timeout: Duration,
}

impl GateTicket {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until a response arrives or the deadline elapses
    pub async fn wait(mut self) -> Result<UiResponse, GateError> {
        match tokio::time::timeout(self.timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(GateError::Abandoned),
            Err(_) => {
                if self.gate.expire(&self.request_id) {
                    info!(request_id = %self.request_id, "Gate timed out");
                    return Err(GateError::TimedOut);
                }
                // A resolve won the race at the deadline
                self.rx.try_recv().map_err(|_| GateError::TimedOut)
            }
        }
    }
}

impl std::fmt::Debug for GateTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateTicket")
            .field("request_id", &self.request_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Drop for GateTicket {
    fn drop(&mut self) {
        self.gate.release(&self.request_id);
    }
}
