//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// The pipeline task is gone
    #[error("capture pipeline stopped")]
    PipelineStopped,

    /// Waited too long for a pipeline condition
    #[error("timed out waiting for {what}")]
    Timeout { what: String },

    /// Contract-level failure (not ready, submission rejected, ...)
    #[error(transparent)]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout { what: what.into() }
    }

    /// Reprocess/capture was triggered with nothing to work on
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::Contract(e) if e.is_not_ready())
    }
}
