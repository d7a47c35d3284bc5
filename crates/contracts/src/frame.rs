//! Frame-level data model: metadata records, buffer handles and pairs.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::RequestId;

/// Device-assigned buffer identifier (unique per device instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Output streams a session can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// On-screen preview surface (never acquired by the pipeline)
    Preview,
    /// Opaque private buffers kept for reprocessing
    Private,
    /// Encoded final output
    Final,
}

/// Buffer pixel format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferFormat {
    /// Implementation-defined opaque layout
    Private,
    /// Encoded JPEG
    Jpeg,
    /// Planar YUV 4:2:0
    Yuv420,
}

/// Immutable snapshot of per-frame capture results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Frame sequence number (monotonic, unique per session)
    pub frame_number: u64,
    /// Request that produced this frame
    pub request_id: RequestId,
    /// Sensor timestamp (nanoseconds)
    pub timestamp_ns: u64,
}

/// Exclusive-ownership handle to one hardware image buffer
///
/// Not `Clone`: the handle moves from the device into the pairing queue and
/// from there either back to the device via `release_buffer` or into the
/// reprocess input via `queue_reprocess_input`.
#[derive(Debug)]
#[must_use = "buffer handles must be released or queued as reprocess input"]
pub struct BufferHandle {
    id: BufferId,
    stream: StreamKind,
    format: BufferFormat,
    timestamp_ns: u64,
    data: Bytes,
}

impl BufferHandle {
    pub fn new(
        id: BufferId,
        stream: StreamKind,
        format: BufferFormat,
        timestamp_ns: u64,
        data: Bytes,
    ) -> Self {
        Self {
            id,
            stream,
            format,
            timestamp_ns,
            data,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn format(&self) -> BufferFormat {
        self.format
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Byte length (format dependent)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Buffer contents; cloning the `Bytes` does not copy
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// A metadata record joined with the buffer of the same position
#[derive(Debug)]
#[must_use = "paired buffers must be released or queued as reprocess input"]
pub struct PairedUnit {
    pub metadata: MetadataRecord,
    pub buffer: BufferHandle,
}

impl PairedUnit {
    pub fn into_parts(self) -> (MetadataRecord, BufferHandle) {
        (self.metadata, self.buffer)
    }
}

/// Encoded output handed to the output sinks
#[derive(Debug, Clone)]
pub struct FinalImage {
    /// Frame number reported by the producing request
    pub frame_number: u64,
    pub request_id: RequestId,
    pub format: BufferFormat,
    pub timestamp_ns: u64,
    pub data: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_handle_accessors() {
        let handle = BufferHandle::new(
            BufferId(9),
            StreamKind::Private,
            BufferFormat::Private,
            1_000,
            Bytes::from_static(&[1, 2, 3, 4]),
        );
        assert_eq!(handle.id(), BufferId(9));
        assert_eq!(handle.len(), 4);
        assert_eq!(handle.stream(), StreamKind::Private);
        assert_eq!(handle.id().to_string(), "buf#9");
        drop(handle);
    }

    #[test]
    fn test_stream_kind_serde() {
        let json = serde_json::to_string(&StreamKind::Private).unwrap();
        assert_eq!(json, "\"private\"");
    }
}
