//! Per-segment operation ordering.
//!
//! Conditional appends and lifecycle transitions take a turn before entering
//! the segment's critical section. Turns are granted in arrival order, so an
//! operation accepted earlier is never overtaken by a later one that
//! depends on the same state. Unconditional appends and attribute updates do
//! not take a turn.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};

/// FIFO turn-taking for one segment.
#[derive(Debug, Default)]
pub struct OrderingSequencer {
    turn: Mutex<()>,
    issued: AtomicU64,
    waiting: AtomicUsize,
}

/// Exclusive turn on a segment. Released on drop.
#[derive(Debug)]
pub struct SequencerTurn<'a> {
    _guard: MutexGuard<'a, ()>,
    ticket: u64,
}

impl SequencerTurn<'_> {
    /// Arrival order of the turn, starting at 1.
    #[must_use]
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl OrderingSequencer {
    /// Creates a sequencer with no turns issued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for this caller's turn.
    ///
    /// Cancel-safe: dropping the future before it resolves gives up the
    /// place in line without blocking later callers.
    pub async fn acquire(&self) -> SequencerTurn<'_> {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let guard = WaitingGuard(&self.waiting);
        let turn = self.turn.lock().await;
        drop(guard);
        SequencerTurn {
            _guard: turn,
            ticket,
        }
    }

    /// Number of callers currently waiting for a turn.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
