// crates/vcodec-core/src/error.rs
//
// Typed errors returned synchronously to the caller thread.
// Engine failures never appear here: they are turned into ErrorEvents on
// the worker thread and delivered in order with the outputs.

use thiserror::Error;

use crate::state::SessionState;

/// Errors from Session calls that are rejected before anything is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The queue already holds `hard_limit` unstarted commands.
    /// Retry once the worker has caught up, or drop the unit.
    #[error("command queue full ({hard_limit} commands pending)")]
    QueueFull {
        hard_limit: usize,
    },
    /// The operation is not legal in the session's current state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state:     SessionState,
    },
    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

/// Why a `flush()` future was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlushError {
    /// `reset()` ran before the barrier was reached.
    #[error("flush aborted by reset")]
    ResetInvalidated,
    /// `close()` ran before the barrier was reached.
    #[error("flush aborted by close")]
    Closed,
    /// The engine failed while draining.
    #[error("flush failed: {0}")]
    DrainFailed(String),
    /// The flush was never enqueued.
    #[error(transparent)]
    Rejected(#[from] SessionError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid session config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid session config: {0}")]
    Invalid(String),
}
