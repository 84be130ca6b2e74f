// crates/vcodec-core/src/media_types.rs
//
// Types that flow between the caller thread, the worker thread and the
// codec engine. No threads, no channels — just plain data.
//
// Timestamps and durations are in microseconds.

use std::fmt;

use crate::commands::{BarrierId, SequenceNo};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Key,
    Delta,
}

/// One unit of media handed to the engine: an encoded chunk for decoders,
/// a raw frame for encoders. The core never looks inside `data`.
#[derive(Clone, PartialEq)]
pub struct MediaUnit {
    pub timestamp: i64,
    pub duration:  Option<u64>,
    pub kind:      UnitKind,
    pub data:      Vec<u8>,
}

impl MediaUnit {
    pub fn key(timestamp: i64, data: Vec<u8>) -> Self {
        Self { timestamp, duration: None, kind: UnitKind::Key, data }
    }

    pub fn delta(timestamp: i64, data: Vec<u8>) -> Self {
        Self { timestamp, duration: None, kind: UnitKind::Delta, data }
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }
}

// Payloads can be megabytes; keep Debug output to the length.
impl fmt::Debug for MediaUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaUnit")
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("kind", &self.kind)
            .field("len", &self.data.len())
            .finish()
    }
}

/// What the engine hands back from `receive`/`drain`.
///
/// `tag` echoes the sequence number the unit was submitted with, when the
/// engine can correlate it. Missing `timestamp`/`duration` are restored from
/// the worker's side table using that tag.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputUnit {
    pub tag:         Option<SequenceNo>,
    pub timestamp:   Option<i64>,
    pub duration:    Option<u64>,
    pub kind:        UnitKind,
    pub data:        Vec<u8>,
    /// Codec extradata (e.g. avcC / SPS+PPS) current at this output.
    pub description: Option<Vec<u8>>,
}

impl OutputUnit {
    pub fn new(kind: UnitKind, data: Vec<u8>) -> Self {
        Self { tag: None, timestamp: None, duration: None, kind, data, description: None }
    }

    pub fn tagged(mut self, tag: SequenceNo) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_description(mut self, description: Vec<u8>) -> Self {
        self.description = Some(description);
        self
    }
}

/// Metadata delivered alongside every output payload.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitMetadata {
    /// Sequence number of the command that was running when the output
    /// was produced (a Process, or the Flush that drained it).
    pub sequence_no: SequenceNo,
    pub timestamp:   i64,
    pub duration:    Option<u64>,
    pub kind:        UnitKind,
    /// Present only when the engine's description changed since the last
    /// one delivered.
    pub description: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Engine `open` failed. The session can be configured again.
    Configure,
    /// A Process ran while no engine handle was open.
    NotConfigured,
    /// Engine `submit` failed for one unit.
    Submit,
    /// Engine `receive` failed while draining a unit's outputs.
    Receive,
    /// Engine `drain` failed during a flush. The flush is rejected too.
    Drain,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Configure     => "configure",
            ErrorCode::NotConfigured => "not-configured",
            ErrorCode::Submit        => "submit",
            ErrorCode::Receive       => "receive",
            ErrorCode::Drain         => "drain",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorEvent {
    pub code:        ErrorCode,
    pub message:     String,
    pub sequence_no: SequenceNo,
}

/// Events sent from the worker thread to the caller thread, in order.
#[derive(Debug, PartialEq)]
pub enum SessionEvent {
    Output        { metadata: UnitMetadata, payload: Vec<u8> },
    Error(ErrorEvent),
    FlushComplete { barrier_id: BarrierId, success: bool, message: Option<String> },
    Dequeued      { queue_size: usize },
}

impl SessionEvent {
    pub fn is_output(&self) -> bool {
        matches!(self, SessionEvent::Output { .. })
    }
}
