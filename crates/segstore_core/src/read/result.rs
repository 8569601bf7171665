use crate::error::{SegmentError, SegmentResult};
use crate::segment::{SegmentEntry, TailState};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Lazy handle over a range of segment bytes.
///
/// Chunks are produced on demand by [`ReadResult::next`]. When the reader
/// has caught up with an unsealed segment, `next` waits for more data to be
/// appended. The result ends once `max_length` bytes were delivered or the
/// sealed end is reached.
///
/// The handle fails with `Cancelled` if the store shuts down or the segment
/// is evicted after the read started, `SegmentNotFound` if the segment is
/// deleted, `SegmentTruncated` if truncation passes the read position, and
/// `SegmentMerged` if the segment is merged before the data was consumed.
/// After an error, `next` returns `None`.
pub struct ReadResult {
    entry: Arc<SegmentEntry>,
    position: u64,
    remaining: u64,
    chunk_size: usize,
    eviction_epoch: u64,
    tail: watch::Receiver<TailState>,
    shutdown: watch::Receiver<bool>,
    done: bool,
}

impl ReadResult {
    pub(crate) fn new(
        entry: Arc<SegmentEntry>,
        offset: u64,
        max_length: u64,
        chunk_size: usize,
        eviction_epoch: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        entry.reader_opened();
        let tail = entry.subscribe();
        Self {
            entry,
            position: offset,
            remaining: max_length,
            chunk_size: chunk_size.max(1),
            eviction_epoch,
            tail,
            shutdown,
            done: false,
        }
    }

    /// Offset of the next byte to be returned.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes still to be delivered before `max_length` is reached.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Returns true once no more chunks will be produced.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the next chunk, waiting for data on an unsealed segment.
    pub async fn next(&mut self) -> Option<SegmentResult<Bytes>> {
        if self.done {
            return None;
        }
        if self.remaining == 0 {
            self.done = true;
            return None;
        }

        loop {
            let state = *self.tail.borrow_and_update();
            match self.check(&state) {
                Ok(Some(chunk)) => return Some(Ok(chunk)),
                Ok(None) if state.sealed => {
                    self.done = true;
                    return None;
                }
                Ok(None) => {}
                Err(e) => return Some(Err(self.fail(e))),
            }

            tokio::select! {
                changed = self.tail.changed() => {
                    if changed.is_err() {
                        return Some(Err(self.fail(SegmentError::not_found(self.entry.name()))));
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return Some(Err(self.fail(SegmentError::cancelled("segment store dropped"))));
                    }
                }
            }
        }
    }

    /// Validates the read position against `state` and reads what is
    /// available. `Ok(None)` means the reader has caught up.
    fn check(&mut self, state: &TailState) -> SegmentResult<Option<Bytes>> {
        let name = self.entry.name();
        if *self.shutdown.borrow() {
            return Err(SegmentError::cancelled("segment store shut down"));
        }
        if state.deleted {
            return Err(SegmentError::not_found(name));
        }
        if state.eviction_epoch != self.eviction_epoch {
            return Err(SegmentError::cancelled(format!("segment {name} was evicted")));
        }
        if state.merged {
            return Err(SegmentError::merged(name));
        }
        if self.position < state.truncation_offset {
            return Err(SegmentError::SegmentTruncated {
                name: name.to_string(),
                offset: self.position,
                truncation_offset: state.truncation_offset,
            });
        }
        if self.position >= state.length {
            return Ok(None);
        }

        let available = state.length - self.position;
        let want = available.min(self.remaining).min(self.chunk_size as u64) as usize;
        let chunk = match self.entry.data().read(self.position, want) {
            Ok(chunk) => chunk,
            // Merge drops the source bytes after publishing.
            Err(_) if self.entry.tail().merged => return Err(SegmentError::merged(name)),
            Err(e) => return Err(e),
        };
        if chunk.is_empty() {
            return Ok(None);
        }
        self.position += chunk.len() as u64;
        self.remaining -= chunk.len() as u64;
        if self.remaining == 0 {
            self.done = true;
        }
        Ok(Some(chunk))
    }

    fn fail(&mut self, error: SegmentError) -> SegmentError {
        debug!(
            segment = %self.entry.name(),
            position = self.position,
            error = %error,
            "read ended with error"
        );
        self.done = true;
        error
    }

    /// Collects every remaining chunk into one buffer.
    ///
    /// On an unsealed segment this only returns once `max_length` bytes have
    /// arrived, so callers tailing a live segment should bound it with a
    /// timeout.
    pub async fn read_to_end(&mut self) -> SegmentResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Releases the handle.
    pub fn close(self) {}
}

impl Drop for ReadResult {
    fn drop(&mut self) {
        self.entry.reader_closed();
    }
}

impl std::fmt::Debug for ReadResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadResult")
            .field("segment", &self.entry.name())
            .field("position", &self.position)
            .field("remaining", &self.remaining)
            .field("done", &self.done)
            .finish()
    }
}
