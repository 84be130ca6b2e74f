// crates/vcodec-session/src/delivery.rs
//
// Worker → caller event path.
//
//   EventSender   — owned by the worker thread. Never blocks: if the channel
//                   is full the event waits in a local backlog and is retried
//                   before the worker next goes to sleep. Order is kept
//                   because nothing bypasses a non-empty backlog.
//   ResultChannel — owned by the Session on the caller thread. Checks the
//                   liveness flag before handing an event out; once the flag
//                   is cleared every event is dropped on arrival.
//
// Each Output event travels with a PendingGuard. The guard bumps the shared
// pending counter when the event is created and decrements it when dropped,
// whichever side drops it (delivered, discarded, or lost with a closed
// channel), so the count can neither leak nor go negative.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use vcodec_core::SessionEvent;

// ── Shared state ──────────────────────────────────────────────────────────────

struct Shared {
    alive:             AtomicBool,
    pending:           AtomicUsize,
    /// A Dequeued event is in flight; further ones are coalesced into it.
    dequeue_scheduled: AtomicBool,
}

struct PendingGuard(Arc<Shared>);

impl PendingGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.pending.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(shared))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let prev = self.0.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "pending output count underflow");
    }
}

struct Delivery {
    event:    SessionEvent,
    _pending: Option<PendingGuard>,
}

/// Build a connected sender/receiver pair for one worker generation.
pub fn channel(capacity: usize) -> (EventSender, ResultChannel) {
    let (tx, rx) = bounded(capacity);
    let shared = Arc::new(Shared {
        alive:             AtomicBool::new(true),
        pending:           AtomicUsize::new(0),
        dequeue_scheduled: AtomicBool::new(false),
    });
    (
        EventSender { tx, shared: Arc::clone(&shared), backlog: VecDeque::new() },
        ResultChannel { rx, shared },
    )
}

// ── Worker side ───────────────────────────────────────────────────────────────

pub struct EventSender {
    tx:      Sender<Delivery>,
    shared:  Arc<Shared>,
    backlog: VecDeque<Delivery>,
}

impl EventSender {
    /// Queue `event` for the caller thread. Never blocks.
    pub fn deliver(&mut self, event: SessionEvent) {
        if !self.is_alive() {
            return;
        }
        let guard = event.is_output().then(|| PendingGuard::new(&self.shared));
        self.backlog.push_back(Delivery { event, _pending: guard });
        self.pump();
    }

    /// Report that the queue shrank. Coalesced: while one Dequeued event is
    /// still undelivered, further notifications are dropped.
    pub fn notify_dequeue(&mut self, queue_size: usize) {
        if self.shared.dequeue_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.deliver(SessionEvent::Dequeued { queue_size });
    }

    /// Move as much of the backlog into the channel as fits.
    /// Returns true when the backlog is empty afterwards.
    pub fn pump(&mut self) -> bool {
        while let Some(delivery) = self.backlog.pop_front() {
            match self.tx.try_send(delivery) {
                Ok(()) => {}
                Err(TrySendError::Full(delivery)) => {
                    self.backlog.push_front(delivery);
                    return false;
                }
                // Caller dropped its end (reset/close): nobody will ever read these.
                Err(TrySendError::Disconnected(_)) => {
                    self.backlog.clear();
                    return true;
                }
            }
        }
        true
    }

    #[cfg(test)]
    fn has_backlog(&self) -> bool {
        !self.backlog.is_empty()
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }
}

// ── Caller side ───────────────────────────────────────────────────────────────

pub struct ResultChannel {
    rx:     Receiver<Delivery>,
    shared: Arc<Shared>,
}

impl ResultChannel {
    /// Next live event, if one is ready.
    pub fn try_recv(&self) -> Option<SessionEvent> {
        while let Ok(delivery) = self.rx.try_recv() {
            if let Some(event) = self.accept(delivery) {
                return Some(event);
            }
        }
        None
    }

    /// Wait up to `timeout` for the next live event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(delivery) => {
                    if let Some(event) = self.accept(delivery) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    // Liveness guard: the single point where a worker event becomes caller-owned.
    fn accept(&self, delivery: Delivery) -> Option<SessionEvent> {
        if !self.is_alive() {
            return None;
        }
        let Delivery { event, _pending } = delivery;
        if matches!(event, SessionEvent::Dequeued { .. }) {
            self.shared.dequeue_scheduled.store(false, Ordering::Release);
        }
        Some(event)
    }

    /// Clear the liveness flag. Irreversible; later events are discarded.
    pub fn kill(&self) {
        self.shared.alive.store(false, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Drop everything already in the channel. Returns how many were dropped.
    pub fn discard_all(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Output events created by the worker and not yet handed to the caller.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }
}
