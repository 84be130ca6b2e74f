// crates/vcodec-core/src/config.rs
//
// SessionConfig: queue limits and teardown timing for one Session.
// CodecConfig:   opaque payload handed unmodified to the engine's `open`.
//
// Both deserialize from JSON so hosts can keep them next to their own
// settings. Missing SessionConfig fields fall back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

// ── Defaults ──────────────────────────────────────────────────────────────────

const DEFAULT_SOFT_LIMIT:       usize = 16;
const DEFAULT_HARD_LIMIT:       usize = 64;
const DEFAULT_EVENT_CAPACITY:   usize = 256;
const DEFAULT_CLOSE_TIMEOUT_MS: u64   = 100;
const DEFAULT_THREAD_NAME:      &str  = "vcodec-worker";

// ── SessionConfig ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Queue size at which `is_saturated()` turns true. Advisory only.
    pub soft_limit:       usize,
    /// Queue size at which enqueue is refused with `QueueFull`.
    pub hard_limit:       usize,
    /// Worker → caller channel capacity. Events beyond it wait in the
    /// worker's backlog; they are delayed, never dropped.
    pub event_capacity:   usize,
    /// How long `close()` waits for the worker to exit before detaching it.
    pub close_timeout_ms: u64,
    /// Worker thread name prefix. The session id is appended.
    pub thread_name:      String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            soft_limit:       DEFAULT_SOFT_LIMIT,
            hard_limit:       DEFAULT_HARD_LIMIT,
            event_capacity:   DEFAULT_EVENT_CAPACITY,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            thread_name:      DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn with_limits(soft_limit: usize, hard_limit: usize) -> Self {
        Self { soft_limit, hard_limit, ..Self::default() }
    }

    /// Parse and validate a JSON object. Unknown keys are ignored.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hard_limit == 0 {
            return Err(ConfigError::Invalid("hard_limit must be at least 1".into()));
        }
        if self.soft_limit == 0 {
            return Err(ConfigError::Invalid("soft_limit must be at least 1".into()));
        }
        if self.soft_limit > self.hard_limit {
            return Err(ConfigError::Invalid(format!(
                "soft_limit ({}) exceeds hard_limit ({})",
                self.soft_limit, self.hard_limit,
            )));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

// ── CodecConfig ───────────────────────────────────────────────────────────────

/// Engine configuration. The session never reads past `codec` (for logs);
/// `description` and `options` belong to the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    pub codec:       String,
    #[serde(default)]
    pub description: Option<Vec<u8>>,
    #[serde(default)]
    pub options:     Map<String, Value>,
}

impl CodecConfig {
    pub fn new(codec: impl Into<String>) -> Self {
        Self { codec: codec.into(), ..Self::default() }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: Vec<u8>) -> Self {
        self.description = Some(description);
        self
    }
}
