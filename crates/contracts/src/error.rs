//! Layered error definitions
//!
//! Categorized by source: config / device / capture / sink

use thiserror::Error;

use crate::{BufferId, RequestId};

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Device / Session Errors =====
    /// Device could not be opened (permission, busy, driver error)
    #[error("camera '{camera_id}' unavailable: {message}")]
    DeviceUnavailable { camera_id: String, message: String },

    /// Session setup rejected by the device
    #[error("session configuration failed: {message}")]
    ConfigurationFailed { message: String },

    /// Request rejected at submit time
    #[error("{kind} submission failed: {message}")]
    CaptureSubmissionFailed { kind: String, message: String },

    // ===== Per-frame Errors =====
    /// Asynchronous per-frame failure reported by the device
    #[error("capture failed for request {request_id} frame {frame_number}: {reason}")]
    CaptureFailed {
        request_id: RequestId,
        frame_number: u64,
        reason: String,
    },

    /// Output buffer for a frame was lost by the device
    #[error("buffer lost for request {request_id} frame {frame_number}")]
    BufferLost {
        request_id: RequestId,
        frame_number: u64,
    },

    /// Reprocess or capture triggered with nothing to work on
    #[error("not ready: {reason}")]
    NotReady { reason: String },

    /// Buffer released twice or never acquired
    #[error("invalid release of buffer {buffer_id}: {message}")]
    InvalidRelease { buffer_id: BufferId, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn device_unavailable(camera_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            camera_id: camera_id.into(),
            message: message.into(),
        }
    }

    pub fn configuration_failed(message: impl Into<String>) -> Self {
        Self::ConfigurationFailed {
            message: message.into(),
        }
    }

    pub fn submission_failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CaptureSubmissionFailed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady {
            reason: reason.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Whether this failure compromises the whole session
    ///
    /// Session-fatal errors move the session to `Closing`; everything else
    /// is recorded and the session continues.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable { .. }
                | Self::ConfigurationFailed { .. }
                | Self::CaptureSubmissionFailed { .. }
        )
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_classification() {
        assert!(ContractError::submission_failed("reprocess", "rejected").is_session_fatal());
        assert!(ContractError::configuration_failed("bad surfaces").is_session_fatal());
        assert!(!ContractError::not_ready("no pair").is_session_fatal());
        assert!(!ContractError::BufferLost {
            request_id: RequestId(3),
            frame_number: 7
        }
        .is_session_fatal());
    }

    #[test]
    fn test_error_messages_carry_identifiers() {
        let err = ContractError::CaptureFailed {
            request_id: RequestId(12),
            frame_number: 40,
            reason: "flushed".into(),
        };
        let text = err.to_string();
        assert!(text.contains("12"));
        assert!(text.contains("40"));
    }
}
