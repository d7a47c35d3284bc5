//! Session lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Capture session lifecycle state
///
/// `Closed` is both the initial state and the re-entrant terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Closed,
    Opening,
    Configuring,
    Ready,
    Active,
    Closing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Configuring => "configuring",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Closing => "closing",
        }
    }

    /// A device handle exists (or is being acquired) in this state
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Closed | Self::Closing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session is being closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Caller asked for it
    Requested,
    /// Open was refused synchronously
    OpenFailed,
    /// Device went away
    Disconnected,
    /// Session setup was rejected
    ConfigureFailed,
    /// Device reported an error code
    DeviceError(i32),
    /// A request was rejected at submit time
    SubmissionFailed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::OpenFailed => f.write_str("open_failed"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::ConfigureFailed => f.write_str("configure_failed"),
            Self::DeviceError(code) => write!(f, "device_error({code})"),
            Self::SubmissionFailed => f.write_str("submission_failed"),
        }
    }
}
