// crates/vcodec-core/src/commands.rs
//
// Every unit of work a Session hands to its worker thread is a Command.
// The Session stamps a sequence number at enqueue time; the worker applies
// commands strictly in that order.
// Adding a new command = add a variant here + one match arm in worker.rs.

use crate::config::CodecConfig;
use crate::media_types::MediaUnit;

/// Monotonic per-session ordering key assigned at enqueue time.
pub type SequenceNo = u64;

/// Identifies one `flush()` call. Unique within a Session.
pub type BarrierId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    // ── Lifecycle ────────────────────────────────────────────────────────────
    /// Open (or re-open) the codec engine with an opaque config.
    Configure(CodecConfig),
    /// Drop queued and in-flight work and close the engine.
    Reset,
    /// Close the engine if open and exit the worker loop.
    Shutdown,

    // ── Data ─────────────────────────────────────────────────────────────────
    /// Submit one unit of media and drain whatever the engine emits for it.
    Process(MediaUnit),

    // ── Barriers ─────────────────────────────────────────────────────────────
    /// Drain the engine completely, then report `FlushComplete(barrier_id)`.
    Flush(BarrierId),
}

impl CommandKind {
    /// Short lowercase name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Configure(_) => "configure",
            CommandKind::Reset        => "reset",
            CommandKind::Shutdown     => "shutdown",
            CommandKind::Process(_)   => "process",
            CommandKind::Flush(_)     => "flush",
        }
    }

    /// Reset and Shutdown bypass the queue's hard limit and survive
    /// `clear_process_commands`.
    pub fn is_control(&self) -> bool {
        matches!(self, CommandKind::Reset | CommandKind::Shutdown)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind:        CommandKind,
    pub sequence_no: SequenceNo,
}

impl Command {
    pub fn new(kind: CommandKind, sequence_no: SequenceNo) -> Self {
        Self { kind, sequence_no }
    }
}
