// crates/vcodec-session/src/lib.rs
//
// Asynchronous codec session: the caller thread enqueues commands, one
// worker thread per session drives the codec engine, and results come back
// in order through Session::dispatch.
//
// To plug in a real codec:
//   1. Implement `CodecEngine` for it (engine.rs)
//   2. Hand `Session::new` a factory closure that builds one
//   3. Implement `SessionHandler` for whatever consumes the outputs

pub mod delivery;
pub mod engine;
pub mod flush;
pub mod queue;
pub mod session;
pub mod worker;

// Re-export the main public API so callers rarely need a deep import path.
pub use engine::{CodecEngine, EngineFactory};
pub use flush::{FlushFuture, FlushResult};
pub use session::{Session, SessionHandler};

pub use vcodec_core::{
    BarrierId, CodecConfig, ConfigError, ErrorCode, ErrorEvent, FlushError, MediaUnit,
    OutputUnit, SequenceNo, SessionConfig, SessionError, SessionState, UnitKind, UnitMetadata,
};
