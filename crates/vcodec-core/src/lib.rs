// crates/vcodec-core/src/lib.rs
//
// Plain data shared by the session crate and its callers.
// No threads, no channels, no engine code.

pub mod commands;
pub mod config;
pub mod error;
pub mod media_types;
pub mod state;

pub use commands::{BarrierId, Command, CommandKind, SequenceNo};
pub use config::{CodecConfig, SessionConfig};
pub use error::{ConfigError, FlushError, SessionError};
pub use media_types::{
    ErrorCode, ErrorEvent, MediaUnit, OutputUnit, SessionEvent, UnitKind, UnitMetadata,
};
pub use state::SessionState;
