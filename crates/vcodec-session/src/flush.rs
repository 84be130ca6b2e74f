// crates/vcodec-session/src/flush.rs
//
// FlushFuture / FlushPromise: a tokio oneshot between the Session's
// pending-flush table and whoever called `flush()`.
//
// A promise settles exactly once. `settle` consumes it; dropping it
// unsettled closes the channel, which the future reports as
// `FlushError::Closed`, so a future can never be left hanging.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot::{self, error::TryRecvError};

use vcodec_core::{BarrierId, FlushError};

pub type FlushResult = Result<(), FlushError>;

enum Outcome {
    Waiting(oneshot::Receiver<FlushResult>),
    Ready(FlushResult),
    /// Polled to completion.
    Taken,
}

impl Outcome {
    /// Move a delivered result out of the channel without blocking.
    fn refresh(&mut self) {
        if let Outcome::Waiting(rx) = self {
            let received = rx.try_recv();
            match received {
                Ok(result)                => *self = Outcome::Ready(result),
                Err(TryRecvError::Closed) => *self = Outcome::Ready(Err(FlushError::Closed)),
                Err(TryRecvError::Empty)  => {}
            }
        }
    }
}

/// Settles when every command enqueued before the flush has been processed
/// and its events dispatched on the caller thread.
#[must_use = "a flush result is only observable through its future"]
pub struct FlushFuture {
    outcome:    Mutex<Outcome>,
    barrier_id: Option<BarrierId>,
}

impl FlushFuture {
    /// A future that is already rejected; the flush was never enqueued.
    pub fn rejected(err: FlushError) -> Self {
        Self { outcome: Mutex::new(Outcome::Ready(Err(err))), barrier_id: None }
    }

    /// `None` when the flush was rejected before it got a barrier.
    pub fn barrier_id(&self) -> Option<BarrierId> {
        self.barrier_id
    }

    pub fn is_settled(&self) -> bool {
        let mut outcome = self.outcome.lock();
        outcome.refresh();
        !matches!(*outcome, Outcome::Waiting(_))
    }

    /// Peek at the outcome without consuming it. `None` while pending or
    /// after the future has already been polled to completion.
    pub fn try_result(&self) -> Option<FlushResult> {
        let mut outcome = self.outcome.lock();
        outcome.refresh();
        match &*outcome {
            Outcome::Ready(result) => Some(result.clone()),
            _ => None,
        }
    }
}

impl Future for FlushFuture {
    type Output = FlushResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<FlushResult> {
        let mut outcome = self.outcome.lock();
        if let Outcome::Waiting(rx) = &mut *outcome {
            let polled = Pin::new(rx).poll(cx);
            match polled {
                Poll::Ready(received) => {
                    *outcome = Outcome::Ready(received.unwrap_or(Err(FlushError::Closed)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
        match std::mem::replace(&mut *outcome, Outcome::Taken) {
            Outcome::Ready(result) => Poll::Ready(result),
            _ => Poll::Pending,
        }
    }
}

pub(crate) struct FlushPromise {
    tx: oneshot::Sender<FlushResult>,
}

impl FlushPromise {
    pub(crate) fn settle(self, result: FlushResult) {
        // Err means the caller dropped the future; nobody is left to tell.
        let _ = self.tx.send(result);
    }
}

pub(crate) fn pair(barrier_id: BarrierId) -> (FlushPromise, FlushFuture) {
    let (tx, rx) = oneshot::channel();
    (
        FlushPromise { tx },
        FlushFuture { outcome: Mutex::new(Outcome::Waiting(rx)), barrier_id: Some(barrier_id) },
    )
}

// ── Pending table ─────────────────────────────────────────────────────────────

/// Flushes enqueued but not yet completed, keyed by barrier id.
#[derive(Default)]
pub(crate) struct PendingFlushes {
    map: BTreeMap<BarrierId, FlushPromise>,
}

impl PendingFlushes {
    pub(crate) fn register(&mut self, barrier_id: BarrierId, promise: FlushPromise) {
        let prev = self.map.insert(barrier_id, promise);
        debug_assert!(prev.is_none(), "barrier {barrier_id} registered twice");
    }

    /// Settle one barrier. Returns false if it was unknown (already failed
    /// by a reset/close).
    pub(crate) fn resolve(&mut self, barrier_id: BarrierId, result: FlushResult) -> bool {
        match self.map.remove(&barrier_id) {
            Some(promise) => {
                promise.settle(result);
                true
            }
            None => false,
        }
    }

    /// Reject every outstanding flush with `err`. Returns how many.
    pub(crate) fn fail_all(&mut self, err: FlushError) -> usize {
        let n = self.map.len();
        for (_, promise) in std::mem::take(&mut self.map) {
            promise.settle(Err(err.clone()));
        }
        n
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}
