// crates/vcodec-session/src/session.rs
//
// Session: the caller-thread object. Owns one worker generation at a time
// (queue + worker thread + result channel), the state machine, and the
// table of pending flushes.
//
// Threading contract:
//   • Every public method runs on the caller thread and never waits for the
//     worker, except close() (bounded by SessionConfig::close_timeout) and
//     configure() right after a reset, which first retires the previous
//     worker with the same bound.
//   • Handler callbacks only run inside dispatch()/dispatch_timeout(), on
//     the caller thread, in the order the worker produced the events.
//
// Generations: reset() and close() cut the current generation loose. Its
// result channel is killed and dropped, so nothing it produced afterwards
// can reach the handler; the next configure() builds a fresh generation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use vcodec_core::{
    BarrierId, CodecConfig, CommandKind, ConfigError, ErrorEvent, FlushError, MediaUnit,
    SequenceNo, SessionConfig, SessionError, SessionEvent, SessionState, UnitMetadata,
};

use crate::delivery::{self, ResultChannel};
use crate::engine::EngineFactory;
use crate::flush::{self, FlushFuture, PendingFlushes};
use crate::queue::{CommandQueue, EnqueueError};
use crate::worker::{self, WorkerHandle};

// ── Handler ───────────────────────────────────────────────────────────────────

/// Caller-side callbacks. Invoked only from `Session::dispatch*`.
pub trait SessionHandler {
    fn on_output(&mut self, metadata: UnitMetadata, payload: Vec<u8>);

    fn on_error(&mut self, error: ErrorEvent);

    /// Runs before the matching `FlushFuture` settles.
    fn on_flush_complete(&mut self, _barrier_id: BarrierId, _success: bool, _message: Option<&str>) {}

    /// The worker started queued work; `queue_size` is what remained then.
    fn on_dequeue(&mut self, _queue_size: usize) {}
}

// ── Session ───────────────────────────────────────────────────────────────────

struct Generation {
    queue:  Arc<CommandQueue>,
    worker: WorkerHandle,
    events: ResultChannel,
}

pub struct Session<F: EngineFactory> {
    id:           Uuid,
    config:       SessionConfig,
    factory:      F,
    handler:      Box<dyn SessionHandler>,
    state:        SessionState,
    active:       Option<Generation>,
    /// Worker cut loose by reset(), joined by the next configure()/close().
    retired:      Option<WorkerHandle>,
    flushes:      PendingFlushes,
    next_barrier: BarrierId,
    next_seq:     SequenceNo,
}

impl<F: EngineFactory> Session<F> {
    pub fn new(
        config:  SessionConfig,
        factory: F,
        handler: Box<dyn SessionHandler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            factory,
            handler,
            state: SessionState::Unconfigured,
            active: None,
            retired: None,
            flushes: PendingFlushes::default(),
            next_barrier: 1,
            next_seq: 0,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Start a worker if none is running and enqueue a Configure.
    /// Legal in Unconfigured and Configured (reconfigure). Engine failures
    /// arrive later as an `ErrorCode::Configure` error event; the session
    /// can be configured again after that.
    pub fn configure(&mut self, codec: CodecConfig) -> Result<(), SessionError> {
        if !self.state.can_configure() {
            return Err(self.invalid("configure"));
        }
        if self.active.is_none() {
            self.start_generation()?;
        }
        self.enqueue(CommandKind::Configure(codec))?;
        self.transition(SessionState::Configured);
        Ok(())
    }

    pub fn process(&mut self, unit: MediaUnit) -> Result<(), SessionError> {
        if !self.state.accepts_work() {
            return Err(self.invalid("process"));
        }
        self.enqueue(CommandKind::Process(unit)).map(|_| ())
    }

    /// Enqueue a barrier. The returned future settles once everything
    /// enqueued before it has been processed and dispatched. It is rejected
    /// immediately when the flush cannot be enqueued.
    pub fn flush(&mut self) -> FlushFuture {
        if !self.state.accepts_work() {
            return FlushFuture::rejected(self.invalid("flush").into());
        }
        let barrier_id = self.next_barrier;
        if let Err(e) = self.enqueue(CommandKind::Flush(barrier_id)) {
            return FlushFuture::rejected(e.into());
        }
        self.next_barrier += 1;
        let (promise, future) = flush::pair(barrier_id);
        self.flushes.register(barrier_id, promise);
        future
    }

    /// Drop all queued and in-flight work, reject pending flushes and go back
    /// to Unconfigured. Does not wait for the worker. No-op once closed.
    pub fn reset(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(generation) = self.active.take() {
            debug_assert!(self.retired.is_none(), "reset with a worker already retired");
            self.retired = Some(self.retire(generation, CommandKind::Reset));
        }
        let failed = self.flushes.fail_all(FlushError::ResetInvalidated);
        if failed > 0 {
            debug!(session = %self.id, failed, "pending flushes rejected by reset");
        }
        self.transition(SessionState::Unconfigured);
    }

    /// Tear everything down and join the worker (bounded). Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::Closed);

        let timeout = self.config.close_timeout();
        if let Some(generation) = self.active.take() {
            let worker = self.retire(generation, CommandKind::Shutdown);
            worker.join_within(timeout);
        }
        if let Some(worker) = self.retired.take() {
            worker.join_within(timeout);
        }
        self.flushes.fail_all(FlushError::Closed);
    }

    // ── Caller-thread delivery ────────────────────────────────────────────────

    /// Run callbacks for every event that is ready now. Returns how many.
    pub fn dispatch(&mut self) -> usize {
        let mut n = 0;
        loop {
            let next = self.active.as_ref().and_then(|g| g.events.try_recv());
            let Some(event) = next else { break };
            self.deliver(event);
            n += 1;
        }
        n
    }

    /// Wait up to `timeout` for at least one event, then dispatch everything
    /// that is ready. Returns how many events were dispatched.
    pub fn dispatch_timeout(&mut self, timeout: Duration) -> usize {
        let first = self.active.as_ref().and_then(|g| g.events.recv_timeout(timeout));
        match first {
            Some(event) => {
                self.deliver(event);
                1 + self.dispatch()
            }
            None => 0,
        }
    }

    /// Dispatch events until `flush` settles or `timeout` passes.
    /// Returns whether it settled.
    pub fn run_until_settled(&mut self, flush: &FlushFuture, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !flush.is_settled() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.dispatch_timeout((deadline - now).min(Duration::from_millis(10)));
        }
        true
    }

    fn deliver(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Output { metadata, payload } => self.handler.on_output(metadata, payload),
            SessionEvent::Error(error) => self.handler.on_error(error),
            SessionEvent::FlushComplete { barrier_id, success, message } => {
                self.handler.on_flush_complete(barrier_id, success, message.as_deref());
                let result = if success {
                    Ok(())
                } else {
                    Err(FlushError::DrainFailed(message.unwrap_or_default()))
                };
                if !self.flushes.resolve(barrier_id, result) {
                    debug!(session = %self.id, barrier_id, "completion for unknown barrier");
                }
            }
            SessionEvent::Dequeued { queue_size } => self.handler.on_dequeue(queue_size),
        }
    }

    // ── Backpressure / diagnostics ────────────────────────────────────────────

    /// Commands the worker has not started yet.
    pub fn queue_size(&self) -> u32 {
        self.active.as_ref().map_or(0, |g| saturating_u32(g.queue.size()))
    }

    /// True while `queue_size() >= soft_limit`. Advisory.
    pub fn is_saturated(&self) -> bool {
        self.active.as_ref().is_some_and(|g| g.queue.is_saturated())
    }

    /// Outputs produced by the worker and not yet dispatched.
    pub fn pending_outputs(&self) -> u32 {
        self.active.as_ref().map_or(0, |g| saturating_u32(g.events.pending()))
    }

    pub fn pending_flushes(&self) -> usize {
        self.flushes.len()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn start_generation(&mut self) -> Result<(), SessionError> {
        if let Some(old) = self.retired.take() {
            old.join_within(self.config.close_timeout());
        }
        let queue = Arc::new(CommandQueue::new(
            self.config.soft_limit,
            self.config.hard_limit,
            self.next_seq,
        ));
        let (sender, events) = delivery::channel(self.config.event_capacity);
        let name = format!("{}-{}", self.config.thread_name, &self.id.simple().to_string()[..8]);
        let worker = worker::spawn(self.factory.create(), Arc::clone(&queue), sender, name, self.id)
            .map_err(|e| SessionError::WorkerSpawn(e.to_string()))?;
        debug!(session = %self.id, first_seq = self.next_seq, "worker generation started");
        self.active = Some(Generation { queue, worker, events });
        Ok(())
    }

    /// Cut a generation loose: silence its events, drop its queued work and
    /// tell the worker to stop with `last` (Reset or Shutdown).
    fn retire(&mut self, generation: Generation, last: CommandKind) -> WorkerHandle {
        let Generation { queue, worker, events } = generation;
        events.kill();
        let dropped = queue.clear_process_commands();
        if let Err(e) = queue.push_control(last) {
            warn!(session = %self.id, "control command refused: {e:?}");
        }
        queue.shutdown();
        let discarded = events.discard_all();
        self.next_seq = queue.next_sequence();
        debug!(session = %self.id, dropped, discarded, "worker generation retired");
        worker
    }

    fn enqueue(&self, kind: CommandKind) -> Result<SequenceNo, SessionError> {
        let op = kind.name();
        let Some(generation) = self.active.as_ref() else {
            return Err(self.invalid(op));
        };
        generation.queue.enqueue(kind).map_err(|e| match e {
            EnqueueError::Full { hard_limit } => SessionError::QueueFull { hard_limit },
            EnqueueError::ShutDown => SessionError::InvalidState { operation: op, state: self.state },
        })
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState { operation, state: self.state }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(session = %self.id, from = %self.state, to = %next, "session state");
            self.state = next;
        }
    }
}

impl<F: EngineFactory> Drop for Session<F> {
    fn drop(&mut self) {
        self.close();
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use anyhow::Result;
    use vcodec_core::{OutputUnit, UnitKind};

    use super::*;
    use crate::engine::CodecEngine;

    #[derive(Default)]
    struct Passthrough(VecDeque<OutputUnit>);

    impl CodecEngine for Passthrough {
        fn open(&mut self, _: &CodecConfig) -> Result<()> { Ok(()) }
        fn submit(&mut self, unit: MediaUnit, tag: SequenceNo) -> Result<()> {
            self.0.push_back(OutputUnit::new(unit.kind, unit.data).tagged(tag));
            Ok(())
        }
        fn receive(&mut self) -> Result<Option<OutputUnit>> { Ok(self.0.pop_front()) }
        fn drain(&mut self) -> Result<Option<OutputUnit>> { Ok(None) }
        fn discard(&mut self) -> Result<()> { self.0.clear(); Ok(()) }
        fn close(&mut self) {}
    }

    #[derive(Clone, Default)]
    struct Collector(Rc<RefCell<Vec<String>>>);

    impl SessionHandler for Collector {
        fn on_output(&mut self, metadata: UnitMetadata, _payload: Vec<u8>) {
            self.0.borrow_mut().push(format!("out:{}", metadata.timestamp));
        }
        fn on_error(&mut self, error: ErrorEvent) {
            self.0.borrow_mut().push(format!("err:{}", error.code));
        }
        fn on_flush_complete(&mut self, barrier_id: BarrierId, success: bool, _: Option<&str>) {
            self.0.borrow_mut().push(format!("flush:{barrier_id}:{success}"));
        }
    }

    fn session() -> (Session<fn() -> Passthrough>, Collector) {
        let collector = Collector::default();
        let factory: fn() -> Passthrough = Passthrough::default;
        let s = Session::new(SessionConfig::default(), factory, Box::new(collector.clone())).unwrap();
        (s, collector)
    }

    #[test]
    fn process_before_configure_is_invalid_state() {
        let (mut s, _) = session();
        let err = s.process(MediaUnit::key(0, vec![1])).unwrap_err();
        assert_eq!(err, SessionError::InvalidState {
            operation: "process",
            state:     SessionState::Unconfigured,
        });
        assert_eq!(s.queue_size(), 0);
    }

    #[test]
    fn flush_before_configure_is_rejected_future() {
        let (mut s, _) = session();
        let f = s.flush();
        assert!(matches!(
            f.try_result(),
            Some(Err(FlushError::Rejected(SessionError::InvalidState { .. })))
        ));
        assert_eq!(s.pending_flushes(), 0);
    }

    #[test]
    fn flush_resolves_after_outputs_are_dispatched() {
        let (mut s, log) = session();
        s.configure(CodecConfig::new("pcm")).unwrap();
        s.process(MediaUnit::key(10, vec![1])).unwrap();
        s.process(MediaUnit::delta(20, vec![2])).unwrap();
        let f = s.flush();
        assert!(s.run_until_settled(&f, Duration::from_secs(5)));
        assert_eq!(f.try_result(), Some(Ok(())));
        assert_eq!(*log.0.borrow(), vec!["out:10", "out:20", "flush:1:true"]);
        assert_eq!(s.pending_outputs(), 0);
    }

    #[test]
    fn close_is_idempotent_and_rejects_everything_after() {
        let (mut s, _) = session();
        s.configure(CodecConfig::new("pcm")).unwrap();
        s.close();
        s.close();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(s.configure(CodecConfig::new("pcm")).is_err());
        assert!(matches!(
            s.process(MediaUnit::key(0, vec![])),
            Err(SessionError::InvalidState { state: SessionState::Closed, .. })
        ));
        s.reset();
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn sequence_numbers_continue_across_reset() {
        let (mut s, _) = session();
        s.configure(CodecConfig::new("pcm")).unwrap();
        s.process(MediaUnit::key(0, vec![])).unwrap();
        s.reset();
        let before = s.next_seq;
        assert!(before >= 2);
        s.configure(CodecConfig::new("pcm")).unwrap();
        let seq = s.active.as_ref().unwrap().queue.next_sequence();
        assert_eq!(seq, before + 1);
    }

    #[test]
    fn unit_kind_passes_through() {
        let (mut s, _) = session();
        struct Kinds(Rc<RefCell<Vec<UnitKind>>>);
        impl SessionHandler for Kinds {
            fn on_output(&mut self, m: UnitMetadata, _: Vec<u8>) { self.0.borrow_mut().push(m.kind); }
            fn on_error(&mut self, _: ErrorEvent) {}
        }
        let kinds = Rc::new(RefCell::new(Vec::new()));
        s.handler = Box::new(Kinds(Rc::clone(&kinds)));
        s.configure(CodecConfig::new("pcm")).unwrap();
        s.process(MediaUnit::key(0, vec![])).unwrap();
        s.process(MediaUnit::delta(1, vec![])).unwrap();
        let f = s.flush();
        assert!(s.run_until_settled(&f, Duration::from_secs(5)));
        assert_eq!(*kinds.borrow(), vec![UnitKind::Key, UnitKind::Delta]);
    }
}
