use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::ids::ThreadId;
use crate::messages::Message;

/// Conversation history shared by every agent attached to a flow.
///
/// At most one model round-trip may be in flight per thread; providers claim
/// the thread for the duration of a round-trip via `try_begin_round_trip`.
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    history: Mutex<Vec<Message>>,
    in_flight: AtomicBool,
}

impl Thread {
    pub fn new() -> Self {
        Self {
            id: ThreadId::new(),
            history: Mutex::new(Vec::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ThreadId {
        &self.id
    }

    pub fn append(&self, message: Message) {
        self.history.lock().push(message);
    }

    pub fn extend(&self, messages: impl IntoIterator<Item = Message>) {
        self.history.lock().extend(messages);
    }

    /// Snapshot of the history at this moment, oldest first.
    pub fn history(&self) -> Vec<Message> {
        self.history.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    /// Claim the thread for a round-trip. Returns false if one is already
    /// in flight.
    pub fn try_begin_round_trip(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_round_trip(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn round_trip_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}
