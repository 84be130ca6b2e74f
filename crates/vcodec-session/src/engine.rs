// crates/vcodec-session/src/engine.rs
//
// The codec engine is an external capability: something that can encode or
// decode one unit at a time. The session never implements codec logic; it
// only drives an engine from the worker thread.
//
// Ownership: the factory runs on the caller thread, the engine it returns is
// moved into the worker thread and never touched by any other thread.

use anyhow::Result;

use vcodec_core::{CodecConfig, MediaUnit, OutputUnit, SequenceNo};

pub trait CodecEngine: Send + 'static {
    /// Open (or re-open after `close`) with an opaque config.
    fn open(&mut self, config: &CodecConfig) -> Result<()>;

    /// Hand one unit to the engine. `tag` should be echoed on the outputs it
    /// produces (`OutputUnit::tag`) when the engine can correlate them.
    fn submit(&mut self, unit: MediaUnit, tag: SequenceNo) -> Result<()>;

    /// Non-blocking: the next output that is ready now, or `None`.
    fn receive(&mut self) -> Result<Option<OutputUnit>>;

    /// End-of-stream drain: called repeatedly until it returns `None`.
    fn drain(&mut self) -> Result<Option<OutputUnit>>;

    /// Drop buffered input and output without emitting it.
    fn discard(&mut self) -> Result<()>;

    /// Release the handle. Must tolerate being called when not open.
    fn close(&mut self);
}

/// Builds a fresh engine for each worker thread a Session starts.
pub trait EngineFactory: Send + 'static {
    type Engine: CodecEngine;

    fn create(&self) -> Self::Engine;
}

impl<F, E> EngineFactory for F
where
    F: Fn() -> E + Send + 'static,
    E: CodecEngine,
{
    type Engine = E;

    fn create(&self) -> E {
        self()
    }
}
