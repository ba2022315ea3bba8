//! Write-once response sink.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::error::{DoubleFinalize, StageError};
use crate::response::{IntoResponse, Response};
use crate::stage::Flow;

/// Finalization handle for one dispatch.
///
/// Clones share the same slot. The first [`send`](Sink::send) stores the
/// response; any further `send` in the same dispatch is a protocol
/// violation: it returns an error wrapping [`DoubleFinalize`] and the
/// pipeline ends the dispatch as unresolved.
#[derive(Clone)]
pub struct Sink {
    slot: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct Slot {
    response: Option<Response>,
    finalized: bool,
    violated: bool,
}

impl Sink {
    pub(crate) fn new() -> Self {
        Self { slot: Arc::new(Mutex::new(Slot::default())) }
    }

    /// Finalizes the response and halts the chain.
    ///
    /// Return the `Flow` from the stage. Dropping it and calling
    /// [`Next::run`](crate::Next::run) instead keeps the chain going with
    /// the response already finalized.
    pub fn send(&self, response: impl IntoResponse) -> Result<Flow, StageError> {
        let mut slot = self.lock();
        if slot.finalized {
            slot.violated = true;
            warn!("response finalized twice in one dispatch");
            return Err(DoubleFinalize.into());
        }
        slot.response = Some(response.into_response());
        slot.finalized = true;
        Ok(Flow::halt())
    }

    /// Whether a response has been finalized in this dispatch.
    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    pub(crate) fn violated(&self) -> bool {
        self.lock().violated
    }

    pub(crate) fn take(&self) -> Option<Response> {
        self.lock().response.take()
    }

    // A stage panicking mid-send cannot leave the slot half-written.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
