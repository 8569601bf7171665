//! Tracking of accepted but unfinished operations.
//!
//! Every operation registers under its segment name when it is accepted and
//! deregisters when its task finishes, fails, times out or is cancelled.
//! Tickets increase monotonically across the store, so "everything accepted
//! before this call" is simply every ticket at or below a barrier.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct PendingState {
    last_ticket: u64,
    by_segment: HashMap<String, BTreeSet<u64>>,
}

/// Registry of in-flight operations per segment name.
#[derive(Debug, Default)]
pub struct PendingOps {
    state: Mutex<PendingState>,
    finished: Notify,
}

/// Registration of one operation. Deregisters on drop.
#[derive(Debug)]
pub struct PendingGuard {
    ops: Arc<PendingOps>,
    name: String,
    ticket: u64,
}

impl PendingGuard {
    /// The registration ticket.
    #[must_use]
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        {
            let mut state = self.ops.state.lock();
            if let Some(tickets) = state.by_segment.get_mut(&self.name) {
                tickets.remove(&self.ticket);
                if tickets.is_empty() {
                    state.by_segment.remove(&self.name);
                }
            }
        }
        self.ops.finished.notify_waiters();
    }
}

impl PendingOps {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation on `name`.
    pub fn register(self: &Arc<Self>, name: &str) -> PendingGuard {
        let mut state = self.state.lock();
        state.last_ticket += 1;
        let ticket = state.last_ticket;
        state
            .by_segment
            .entry(name.to_string())
            .or_default()
            .insert(ticket);
        PendingGuard {
            ops: Arc::clone(self),
            name: name.to_string(),
            ticket,
        }
    }

    /// Ticket of the most recently accepted operation.
    #[must_use]
    pub fn barrier(&self) -> u64 {
        self.state.lock().last_ticket
    }

    /// Number of in-flight operations on `name`.
    #[must_use]
    pub fn pending(&self, name: &str) -> usize {
        self.state.lock().by_segment.get(name).map_or(0, BTreeSet::len)
    }

    fn has_pending_before(&self, name: &str, barrier: u64) -> bool {
        self.state
            .lock()
            .by_segment
            .get(name)
            .and_then(|tickets| tickets.first())
            .is_some_and(|&first| first <= barrier)
    }

    /// Waits until no operation on `name` with a ticket at or below
    /// `barrier` is still in flight.
    pub async fn wait_for(&self, name: &str, barrier: u64) {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.has_pending_before(name, barrier) {
                return;
            }
            notified.await;
        }
    }
}
