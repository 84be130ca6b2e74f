// crates/vcodec-core/src/state.rs
//
// Session lifecycle. Closed is terminal.
//
//   Unconfigured ──configure──▶ Configured ──reset──▶ Unconfigured
//        └──────────────close──────────┴──────────────▶ Closed

use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Unconfigured,
    Configured,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unconfigured => "unconfigured",
            SessionState::Configured   => "configured",
            SessionState::Closed       => "closed",
        }
    }

    pub fn can_configure(self) -> bool {
        self != SessionState::Closed
    }

    /// Process and Flush need an engine config to have been requested.
    pub fn accepts_work(self) -> bool {
        self == SessionState::Configured
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
