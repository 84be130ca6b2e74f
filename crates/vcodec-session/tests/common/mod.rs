// crates/vcodec-session/tests/common/mod.rs
//
// Shared fixtures for the integration tests:
//   • ScriptedEngine — one output per submitted unit, with knobs shared
//     through `Controls` so the test can steer the engine on the worker thread.
//   • Gate           — blocks engine calls until the test releases them.
//   • Collector      — SessionHandler that records everything in order.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use vcodec_session::{
    BarrierId, CodecConfig, CodecEngine, ErrorCode, ErrorEvent, MediaUnit, OutputUnit,
    SequenceNo, Session, SessionConfig, SessionHandler, UnitMetadata,
};

/// Payloads starting with this byte fail in `submit`.
pub const POISON: u8 = 0xEE;

pub const WAIT: Duration = Duration::from_secs(5);

// ── Gate ──────────────────────────────────────────────────────────────────────

/// Each gated engine call consumes one token. Dropping the Gate opens it
/// for good.
pub struct Gate(Sender<()>);

impl Gate {
    pub fn release(&self, n: usize) {
        for _ in 0..n {
            let _ = self.0.send(());
        }
    }
}

// ── Controls ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Controls {
    pub opens:        AtomicUsize,
    pub closes:       AtomicUsize,
    pub discards:     AtomicUsize,
    pub submits:      AtomicUsize,
    pub fail_open:    AtomicBool,
    pub fail_drain:   AtomicBool,
    /// One-shot: the next `receive` loses its ready output and fails.
    pub fail_receive: AtomicBool,
    open_gate:        Mutex<Option<Receiver<()>>>,
    submit_gate:      Mutex<Option<Receiver<()>>>,
}

impl Controls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gate_opens(&self) -> Gate {
        let (tx, rx) = unbounded();
        *self.open_gate.lock() = Some(rx);
        Gate(tx)
    }

    pub fn gate_submits(&self) -> Gate {
        let (tx, rx) = unbounded();
        *self.submit_gate.lock() = Some(rx);
        Gate(tx)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn wait(gate: &Mutex<Option<Receiver<()>>>) {
        let rx = gate.lock().clone();
        if let Some(rx) = rx {
            // Err means the Gate was dropped: open for good.
            let _ = rx.recv();
        }
    }
}

// ── ScriptedEngine ────────────────────────────────────────────────────────────

pub struct ScriptedEngine {
    controls: Arc<Controls>,
    ready: VecDeque<OutputUnit>,
}

impl ScriptedEngine {
    pub fn factory(controls: &Arc<Controls>) -> impl Fn() -> ScriptedEngine + Send + 'static {
        let controls = Arc::clone(controls);
        move || ScriptedEngine { controls: Arc::clone(&controls), ready: VecDeque::new() }
    }
}

impl CodecEngine for ScriptedEngine {
    fn open(&mut self, config: &CodecConfig) -> Result<()> {
        Controls::wait(&self.controls.open_gate);
        self.controls.opens.fetch_add(1, Ordering::SeqCst);
        if self.controls.fail_open.load(Ordering::SeqCst) {
            bail!("codec {} not supported", config.codec);
        }
        Ok(())
    }

    fn submit(&mut self, unit: MediaUnit, tag: SequenceNo) -> Result<()> {
        Controls::wait(&self.controls.submit_gate);
        self.controls.submits.fetch_add(1, Ordering::SeqCst);
        if unit.data.first() == Some(&POISON) {
            bail!("corrupt unit at {}", unit.timestamp);
        }
        self.ready.push_back(OutputUnit::new(unit.kind, unit.data).tagged(tag));
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<OutputUnit>> {
        if self.controls.fail_receive.swap(false, Ordering::SeqCst) {
            self.ready.pop_front();
            bail!("decoder lost its output");
        }
        Ok(self.ready.pop_front())
    }

    fn drain(&mut self) -> Result<Option<OutputUnit>> {
        if self.controls.fail_drain.load(Ordering::SeqCst) {
            bail!("drain failed");
        }
        Ok(self.ready.pop_front())
    }

    fn discard(&mut self) -> Result<()> {
        self.controls.discards.fetch_add(1, Ordering::SeqCst);
        self.ready.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.controls.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Collector ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum Seen {
    Output  { seq: SequenceNo, timestamp: i64, payload: Vec<u8> },
    Error   { code: ErrorCode, seq: SequenceNo },
    Flush   { barrier_id: BarrierId, success: bool },
    Dequeue { queue_size: usize },
}

#[derive(Clone, Default)]
pub struct Collector(Rc<RefCell<Vec<Seen>>>);

impl Collector {
    pub fn seen(&self) -> Vec<Seen> {
        self.0.borrow().clone()
    }

    /// Everything except dequeue notifications.
    pub fn results(&self) -> Vec<Seen> {
        self.0.borrow().iter().filter(|s| !matches!(s, Seen::Dequeue { .. })).cloned().collect()
    }

    pub fn output_payloads(&self) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .iter()
            .filter_map(|s| match s {
                Seen::Output { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SessionHandler for Collector {
    fn on_output(&mut self, metadata: UnitMetadata, payload: Vec<u8>) {
        self.0.borrow_mut().push(Seen::Output {
            seq:       metadata.sequence_no,
            timestamp: metadata.timestamp,
            payload,
        });
    }

    fn on_error(&mut self, error: ErrorEvent) {
        self.0.borrow_mut().push(Seen::Error { code: error.code, seq: error.sequence_no });
    }

    fn on_flush_complete(&mut self, barrier_id: BarrierId, success: bool, _message: Option<&str>) {
        self.0.borrow_mut().push(Seen::Flush { barrier_id, success });
    }

    fn on_dequeue(&mut self, queue_size: usize) {
        self.0.borrow_mut().push(Seen::Dequeue { queue_size });
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

pub type TestSession = Session<Box<dyn Fn() -> ScriptedEngine + Send>>;

/// Route worker/session logs to the test harness. `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn new_session(config: SessionConfig, controls: &Arc<Controls>) -> (TestSession, Collector) {
    init_tracing();
    let collector = Collector::default();
    let factory: Box<dyn Fn() -> ScriptedEngine + Send> = Box::new(ScriptedEngine::factory(controls));
    let session = Session::new(config, factory, Box::new(collector.clone())).unwrap();
    (session, collector)
}

pub fn unit(timestamp: i64, byte: u8) -> MediaUnit {
    MediaUnit::key(timestamp, vec![byte])
}

pub fn codec() -> CodecConfig {
    CodecConfig::new("mock").with_option("bitrate", 250_000)
}

/// Poll `cond` until it holds or `WAIT` passes.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
