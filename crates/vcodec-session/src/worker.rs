// crates/vcodec-session/src/worker.rs
//
// Worker loop: the one thread that owns the codec engine.
//
// Pulls commands from the CommandQueue in sequence order, applies them to
// the engine, and turns everything the engine produces (outputs, failures,
// flush completions) into SessionEvents on the EventSender.
//
// Engine failures are per-command: they become Error events and the loop
// moves on to the next command. The loop only ends on a Shutdown command or
// when the queue is shut down and empty.
//
// Exit signal: the thread holds the only Sender of a zero-capacity channel.
// When the thread returns the Sender drops and `WorkerHandle` sees the
// channel disconnect, which gives close() a bounded wait on top of a plain
// JoinHandle.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};
use uuid::Uuid;

use vcodec_core::{
    BarrierId, CodecConfig, Command, CommandKind, ErrorCode, ErrorEvent, MediaUnit, OutputUnit,
    SequenceNo, SessionEvent, UnitMetadata,
};

use crate::delivery::EventSender;
use crate::engine::CodecEngine;
use crate::queue::{CommandQueue, Dequeued};

// ── Constants ─────────────────────────────────────────────────────────────────

/// How long the worker waits for new commands before retrying a backlog of
/// undelivered events.
const BACKLOG_RETRY: Duration = Duration::from_millis(5);

/// Upper bound on the timing side table. Engines that never echo tags would
/// otherwise grow it until the next flush.
const MAX_TIMING_ENTRIES: usize = 1024;

// ── Handle ────────────────────────────────────────────────────────────────────

pub struct WorkerHandle {
    join:   Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl WorkerHandle {
    /// Wait up to `timeout` for the thread to finish, then join it.
    /// On timeout the thread is detached and `false` is returned; it only
    /// holds its own engine, queue and event sender, so it cannot reach
    /// anything the caller is about to free.
    pub fn join_within(mut self, timeout: Duration) -> bool {
        let Some(join) = self.join.take() else { return true };
        match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "worker did not exit in time; detaching");
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if join.join().is_err() {
                    warn!("worker thread panicked");
                }
                true
            }
        }
    }
}

/// Start the worker thread for one queue generation.
pub fn spawn<E: CodecEngine>(
    engine:     E,
    queue:      Arc<CommandQueue>,
    events:     EventSender,
    name:       String,
    session_id: Uuid,
) -> io::Result<WorkerHandle> {
    let (exit_tx, exited) = bounded::<()>(0);
    let join = thread::Builder::new()
        .name(name)
        .spawn(move || {
            let _exit_tx: Sender<()> = exit_tx;
            Worker::new(engine, queue, events, session_id).run();
        })?;
    Ok(WorkerHandle { join: Some(join), exited })
}

// ── Worker ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct UnitTiming {
    timestamp: i64,
    duration:  Option<u64>,
}

struct Worker<E> {
    engine:           E,
    open:             bool,
    queue:            Arc<CommandQueue>,
    events:           EventSender,
    session_id:       Uuid,
    /// Submitted-unit timing keyed by the tag passed to `submit`.
    timings:          BTreeMap<SequenceNo, UnitTiming>,
    /// Last engine description surfaced to the caller.
    last_description: Option<Vec<u8>>,
    last_output_seq:  SequenceNo,
}

impl<E: CodecEngine> Worker<E> {
    fn new(engine: E, queue: Arc<CommandQueue>, events: EventSender, session_id: Uuid) -> Self {
        Self {
            engine,
            open: false,
            queue,
            events,
            session_id,
            timings: BTreeMap::new(),
            last_description: None,
            last_output_seq: 0,
        }
    }

    fn run(mut self) {
        debug!(session = %self.session_id, "worker started");
        loop {
            let next = if self.events.pump() {
                self.queue.dequeue_blocking()
            } else {
                self.queue.dequeue_timeout(BACKLOG_RETRY)
            };
            let cmd = match next {
                Dequeued::Command(cmd) => cmd,
                Dequeued::TimedOut     => continue,
                Dequeued::Shutdown     => break,
            };
            if !cmd.kind.is_control() {
                self.events.notify_dequeue(self.queue.size());
            }
            if !self.handle(cmd) {
                break;
            }
        }
        self.close_engine();
        debug!(session = %self.session_id, "worker stopped");
    }

    /// Apply one command. Returns false when the loop should exit.
    fn handle(&mut self, cmd: Command) -> bool {
        let seq = cmd.sequence_no;
        match cmd.kind {
            CommandKind::Configure(config) => self.configure(&config, seq),
            CommandKind::Process(unit)     => self.process(unit, seq),
            CommandKind::Flush(barrier_id) => self.flush(barrier_id, seq),
            CommandKind::Reset => {
                debug!(session = %self.session_id, seq, "reset");
                if self.open {
                    if let Err(e) = self.engine.discard() {
                        debug!("discard during reset failed: {e:#}");
                    }
                }
                self.close_engine();
                self.timings.clear();
                self.last_description = None;
            }
            CommandKind::Shutdown => {
                debug!(session = %self.session_id, seq, "shutdown");
                return false;
            }
        }
        true
    }

    fn configure(&mut self, config: &CodecConfig, seq: SequenceNo) {
        self.close_engine();
        self.timings.clear();
        self.last_description = None;
        match self.engine.open(config) {
            Ok(()) => {
                self.open = true;
                debug!(session = %self.session_id, codec = %config.codec, "engine opened");
            }
            Err(e) => {
                warn!(session = %self.session_id, codec = %config.codec, "engine open failed: {e:#}");
                self.report(ErrorCode::Configure, format!("{e:#}"), seq);
            }
        }
    }

    fn process(&mut self, unit: MediaUnit, seq: SequenceNo) {
        if !self.open {
            self.report(ErrorCode::NotConfigured, "codec is not configured".into(), seq);
            return;
        }
        let timing = UnitTiming { timestamp: unit.timestamp, duration: unit.duration };
        self.remember(seq, timing);

        if let Err(e) = self.engine.submit(unit, seq) {
            self.timings.remove(&seq);
            warn!(session = %self.session_id, seq, "submit failed: {e:#}");
            self.report(ErrorCode::Submit, format!("{e:#}"), seq);
            return;
        }
        loop {
            match self.engine.receive() {
                Ok(Some(out)) => self.emit(out, seq, Some(timing)),
                Ok(None)      => break,
                Err(e) => {
                    warn!(session = %self.session_id, seq, "receive failed: {e:#}");
                    self.report(ErrorCode::Receive, format!("{e:#}"), seq);
                    break;
                }
            }
        }
    }

    fn flush(&mut self, barrier_id: BarrierId, seq: SequenceNo) {
        let failure = if self.open {
            self.drain_all(seq)
        } else {
            Some("codec is not configured".to_string())
        };
        self.timings.clear();
        debug!(session = %self.session_id, barrier_id, ok = failure.is_none(), "flush complete");
        self.events.deliver(SessionEvent::FlushComplete {
            barrier_id,
            success: failure.is_none(),
            message: failure,
        });
    }

    /// Drain until exhausted. Returns the failure message, if any.
    fn drain_all(&mut self, seq: SequenceNo) -> Option<String> {
        loop {
            match self.engine.drain() {
                Ok(Some(out)) => self.emit(out, seq, None),
                Ok(None)      => return None,
                Err(e) => {
                    warn!(session = %self.session_id, seq, "drain failed: {e:#}");
                    let message = format!("{e:#}");
                    self.report(ErrorCode::Drain, message.clone(), seq);
                    return Some(message);
                }
            }
        }
    }

    // ── Events ────────────────────────────────────────────────────────────────

    fn emit(&mut self, out: OutputUnit, seq: SequenceNo, fallback: Option<UnitTiming>) {
        let OutputUnit { tag, timestamp, duration, kind, data, description } = out;

        let recorded  = tag.and_then(|t| self.timings.remove(&t)).or(fallback);
        let timestamp = timestamp.or(recorded.map(|t| t.timestamp)).unwrap_or(0);
        let duration  = duration.or(recorded.and_then(|t| t.duration));

        let description = match description {
            Some(d) if self.last_description.as_ref() != Some(&d) => {
                self.last_description = Some(d.clone());
                Some(d)
            }
            _ => None,
        };

        debug_assert!(seq >= self.last_output_seq, "output sequence went backwards");
        self.last_output_seq = seq;

        self.events.deliver(SessionEvent::Output {
            metadata: UnitMetadata { sequence_no: seq, timestamp, duration, kind, description },
            payload:  data,
        });
    }

    fn report(&mut self, code: ErrorCode, message: String, sequence_no: SequenceNo) {
        self.events.deliver(SessionEvent::Error(ErrorEvent { code, message, sequence_no }));
    }

    fn remember(&mut self, seq: SequenceNo, timing: UnitTiming) {
        if self.timings.len() >= MAX_TIMING_ENTRIES {
            self.timings.pop_first();
        }
        self.timings.insert(seq, timing);
    }

    fn close_engine(&mut self) {
        if self.open {
            self.engine.close();
            self.open = false;
        }
    }
}
