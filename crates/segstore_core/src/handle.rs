//! Operation handles.

use crate::error::{SegmentError, SegmentResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// Handle to an accepted operation.
///
/// Awaiting the handle yields the operation's result. [`OpHandle::cancel`]
/// stops the operation at its next suspension point; if it had already
/// committed, the commit stands and only the notification is lost.
/// Dropping the handle does not cancel the operation.
#[must_use = "operations run in the background; await the handle to observe the result"]
pub struct OpHandle<T> {
    operation: &'static str,
    task: JoinHandle<SegmentResult<T>>,
}

impl<T> OpHandle<T> {
    pub(crate) fn new(operation: &'static str, task: JoinHandle<SegmentResult<T>>) -> Self {
        Self { operation, task }
    }

    /// Name of the operation.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Requests cancellation. The handle then resolves to `Cancelled`
    /// unless the operation already finished.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Returns true once the operation has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for OpHandle<T> {
    type Output = SegmentResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let operation = self.operation;
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                Err(SegmentError::cancelled(format!("{operation} was cancelled")))
            }
            Err(e) => Err(SegmentError::internal(format!("{operation} failed: {e}"))),
        })
    }
}

impl<T> std::fmt::Debug for OpHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpHandle")
            .field("operation", &self.operation)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
