//! Device-layer capability interface
//!
//! The device produces frames and performs reprocessing; the pipeline only
//! submits work and reacts to `DeviceEvent`s. Every call here is
//! fire-and-forget: completion is delivered later as a fresh event through
//! the registered callback, never waited upon.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{BufferFormat, BufferHandle, ContractError, MetadataRecord, StreamKind};

/// Device-assigned request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Request tag, echoed back on every completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Repeating preview request
    Preview,
    /// One-shot still capture
    Still,
    /// Reprocess of a previously captured buffer
    Reprocess,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Still => "still",
            Self::Reprocess => "reprocess",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capture request description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub kind: RequestKind,
    pub targets: Vec<StreamKind>,
}

impl CaptureRequest {
    pub fn new(kind: RequestKind, targets: impl Into<Vec<StreamKind>>) -> Self {
        Self {
            kind,
            targets: targets.into(),
        }
    }

    pub fn targets(&self, stream: StreamKind) -> bool {
        self.targets.contains(&stream)
    }
}

/// Reprocess input stream description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub format: BufferFormat,
}

/// Session configuration handed to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub outputs: Vec<StreamKind>,
    pub reprocess_input: Option<InputSpec>,
}

/// Asynchronous event emitted by the device layer
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Device open completed
    Opened,
    /// Device went away
    Disconnected,
    /// Device-level error
    Error { code: i32 },
    /// Device close completed
    Closed,
    /// Session configured
    Configured,
    /// Session configuration rejected
    ConfigureFailed,
    /// Session reached steady-state streaming
    Active,
    /// Exposure started for a frame
    CaptureStarted {
        request_id: RequestId,
        kind: RequestKind,
        frame_number: u64,
        timestamp_ns: u64,
    },
    /// Metadata for a frame is available
    CaptureCompleted {
        request_id: RequestId,
        kind: RequestKind,
        metadata: MetadataRecord,
    },
    /// Frame failed; no buffer will be produced for it
    CaptureFailed {
        request_id: RequestId,
        kind: RequestKind,
        frame_number: u64,
        reason: String,
    },
    /// One output buffer of a frame was lost
    BufferLost {
        request_id: RequestId,
        kind: RequestKind,
        frame_number: u64,
        stream: StreamKind,
    },
    /// A buffer can be acquired from the given stream
    ImageAvailable { stream: StreamKind },
}

impl DeviceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Disconnected => "disconnected",
            Self::Error { .. } => "error",
            Self::Closed => "closed",
            Self::Configured => "configured",
            Self::ConfigureFailed => "configure_failed",
            Self::Active => "active",
            Self::CaptureStarted { .. } => "capture_started",
            Self::CaptureCompleted { .. } => "capture_completed",
            Self::CaptureFailed { .. } => "capture_failed",
            Self::BufferLost { .. } => "buffer_lost",
            Self::ImageAvailable { .. } => "image_available",
        }
    }
}

/// Device event callback type
///
/// Invoked from arbitrary device threads/tasks; implementations must not block.
pub type DeviceEventCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Explicit buffer release
///
/// Split from `DeviceLayer` so bookkeeping code can hold only the release
/// capability.
pub trait BufferReleaser: Send + Sync {
    /// Return a buffer to the device. Must be called exactly once per handle
    /// unless the handle was queued as reprocess input instead.
    fn release_buffer(&self, buffer: BufferHandle) -> Result<(), ContractError>;
}

/// Camera device capability
pub trait DeviceLayer: BufferReleaser {
    /// Register the event callback. Repeated calls replace the callback.
    fn listen(&self, callback: DeviceEventCallback);

    /// Begin opening a device. Completes with `Opened`, `Disconnected` or `Error`.
    fn open_device(&self, camera_id: &str) -> Result<(), ContractError>;

    /// Begin configuring a session. Completes with `Configured` or `ConfigureFailed`.
    fn configure_session(&self, spec: &SessionSpec) -> Result<(), ContractError>;

    /// Start a repeating request; completions arrive once per frame
    fn submit_repeating(&self, request: CaptureRequest) -> Result<RequestId, ContractError>;

    /// Submit a one-shot capture
    fn submit_capture(&self, request: CaptureRequest) -> Result<RequestId, ContractError>;

    /// Submit a reprocess request parameterized by earlier metadata; the
    /// input buffer must have been queued with `queue_reprocess_input`.
    fn submit_reprocess(
        &self,
        metadata: &MetadataRecord,
        request: CaptureRequest,
    ) -> Result<RequestId, ContractError>;

    /// Acquire the next available buffer of a stream
    fn acquire_buffer(&self, stream: StreamKind) -> Option<BufferHandle>;

    /// Hand a buffer to the reprocess input; ownership ends here
    fn queue_reprocess_input(&self, buffer: BufferHandle) -> Result<(), ContractError>;

    /// Begin closing the device. Completes with `Closed`.
    fn close_device(&self);
}
