//! The single reply slot that correlates a request with its reply.
//!
//! The wire format carries no request ids, so the slot is the correlation:
//! the worker arms it before sending, and the next inbound frame resolves it.
//! Arming while armed is rejected rather than silently overwriting the
//! previous waiter.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use super::error::{ActionError, ProtocolViolation, TransportError};

struct PendingReply {
    verb: &'static str,
    tx: oneshot::Sender<Value>,
}

#[derive(Default)]
struct SlotState {
    awaiting: Option<PendingReply>,
    closed: Option<TransportError>,
}

/// Shared between the socket task (which delivers) and the job worker
/// (which arms and waits).
#[derive(Default)]
pub struct ReplySlot {
    state: Mutex<SlotState>,
}

impl ReplySlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // Nothing inside the lock can panic half-way, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers interest in the next inbound message.
    pub fn arm(&self, verb: &'static str) -> Result<oneshot::Receiver<Value>, ActionError> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(reason.clone().into());
        }
        if let Some(pending) = &state.awaiting {
            return Err(ProtocolViolation::RequestInFlight {
                pending: pending.verb,
                attempted: verb,
            }
            .into());
        }
        let (tx, rx) = oneshot::channel();
        state.awaiting = Some(PendingReply { verb, tx });
        Ok(rx)
    }

    /// Withdraws an armed request that never made it onto the wire.
    pub fn disarm(&self) {
        self.lock().awaiting = None;
    }

    /// Resolves the outstanding request with `value`.
    pub fn deliver(&self, value: Value) -> Result<(), ProtocolViolation> {
        let pending = self
            .lock()
            .awaiting
            .take()
            .ok_or(ProtocolViolation::UnsolicitedMessage)?;
        // The worker may have given up waiting (cancellation); the reply is then moot.
        let _ = pending.tx.send(value);
        Ok(())
    }

    /// Marks the slot dead and releases any waiter. The first reason wins.
    pub fn close(&self, reason: TransportError) {
        let mut state = self.lock();
        if state.closed.is_none() {
            state.closed = Some(reason);
        }
        state.awaiting = None;
    }

    pub fn closed_reason(&self) -> Option<TransportError> {
        self.lock().closed.clone()
    }

    /// The verb whose reply is outstanding, if any.
    pub fn awaiting(&self) -> Option<&'static str> {
        self.lock().awaiting.as_ref().map(|p| p.verb)
    }
}
