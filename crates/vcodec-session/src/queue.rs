// crates/vcodec-session/src/queue.rs
//
// CommandQueue: the only structure both threads mutate.
//
// Caller thread: enqueue / push_control / clear_process_commands / shutdown.
// Worker thread: dequeue_blocking / dequeue_timeout.
//
// All mutation happens under one lock; the worker sleeps on a Condvar tied
// to that lock, so there is no window between "queue looked empty" and
// "started waiting" in which an enqueue can be missed.
//
// `size` and `saturated` are mirrored into atomics after every mutation so
// the caller can read them without taking the lock. `size` counts commands
// the worker has not started yet.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use vcodec_core::{Command, CommandKind, SequenceNo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// `hard_limit` unstarted commands are already queued.
    Full { hard_limit: usize },
    /// `shutdown()` has been called.
    ShutDown,
}

#[derive(Debug, PartialEq)]
pub enum Dequeued {
    Command(Command),
    /// Queue is shut down and empty.
    Shutdown,
    /// Only from `dequeue_timeout`.
    TimedOut,
}

struct Inner {
    items:     VecDeque<Command>,
    next_seq:  SequenceNo,
    shut_down: bool,
}

pub struct CommandQueue {
    inner:      Mutex<Inner>,
    ready:      Condvar,
    size:       AtomicUsize,
    saturated:  AtomicBool,
    soft_limit: usize,
    hard_limit: usize,
}

impl CommandQueue {
    /// `first_seq` lets a Session keep sequence numbers monotonic across the
    /// queues it creates after each reset.
    pub fn new(soft_limit: usize, hard_limit: usize, first_seq: SequenceNo) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items:     VecDeque::new(),
                next_seq:  first_seq,
                shut_down: false,
            }),
            ready:     Condvar::new(),
            size:      AtomicUsize::new(0),
            saturated: AtomicBool::new(false),
            soft_limit,
            hard_limit,
        }
    }

    /// Append a command and return the sequence number it was stamped with.
    /// Fails without side effects at `hard_limit`. Never blocks on the worker.
    pub fn enqueue(&self, kind: CommandKind) -> Result<SequenceNo, EnqueueError> {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return Err(EnqueueError::ShutDown);
        }
        if inner.items.len() >= self.hard_limit {
            return Err(EnqueueError::Full { hard_limit: self.hard_limit });
        }
        Ok(self.push_locked(&mut inner, kind))
    }

    /// Reset/Shutdown path: ignores `hard_limit`, still refused after shutdown.
    pub fn push_control(&self, kind: CommandKind) -> Result<SequenceNo, EnqueueError> {
        debug_assert!(kind.is_control(), "push_control used for {}", kind.name());
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return Err(EnqueueError::ShutDown);
        }
        Ok(self.push_locked(&mut inner, kind))
    }

    fn push_locked(&self, inner: &mut Inner, kind: CommandKind) -> SequenceNo {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.items.push_back(Command::new(kind, seq));
        self.publish(inner.items.len());
        self.ready.notify_one();
        seq
    }

    /// Block until a command is available or the queue is shut down and
    /// drained. Commands queued before `shutdown()` are still handed out.
    pub fn dequeue_blocking(&self) -> Dequeued {
        let mut inner = self.inner.lock();
        loop {
            if let Some(cmd) = self.pop_locked(&mut inner) {
                return Dequeued::Command(cmd);
            }
            if inner.shut_down {
                return Dequeued::Shutdown;
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Like `dequeue_blocking` but gives up after `timeout`. The worker uses
    /// this while it still has undelivered events to retry.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Dequeued {
        let deadline  = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(cmd) = self.pop_locked(&mut inner) {
                return Dequeued::Command(cmd);
            }
            if inner.shut_down {
                return Dequeued::Shutdown;
            }
            if self.ready.wait_until(&mut inner, deadline).timed_out() {
                return match self.pop_locked(&mut inner) {
                    Some(cmd)                => Dequeued::Command(cmd),
                    None if inner.shut_down  => Dequeued::Shutdown,
                    None                     => Dequeued::TimedOut,
                };
            }
        }
    }

    fn pop_locked(&self, inner: &mut Inner) -> Option<Command> {
        let cmd = inner.items.pop_front()?;
        self.publish(inner.items.len());
        Some(cmd)
    }

    /// Drop every queued Configure, Process and Flush without running it.
    /// Control commands stay in place. Returns how many were dropped.
    pub fn clear_process_commands(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.items.len();
        inner.items.retain(|cmd| cmd.kind.is_control());
        self.publish(inner.items.len());
        before - inner.items.len()
    }

    /// Idempotent. Wakes a blocked dequeue; later enqueues fail.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shut_down = true;
        self.ready.notify_all();
    }

    #[cfg(test)]
    fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated.load(Ordering::Acquire)
    }

    /// Sequence number the next enqueue would receive.
    pub fn next_sequence(&self) -> SequenceNo {
        self.inner.lock().next_seq
    }

    fn publish(&self, len: usize) {
        self.size.store(len, Ordering::Release);
        self.saturated.store(len >= self.soft_limit, Ordering::Release);
    }
}
