//! # Dispatcher
//!
//! Request side of a capture session and delivery of its output.
//!
//! - `ReprocessDispatcher` issues repeating, still and reprocess requests
//!   and routes their completions
//! - `CapturePipeline` serializes device events and caller commands onto one
//!   actor task
//! - `OutputFanout` hands finished images to isolated sinks so a slow sink
//!   never stalls the capture path

pub mod error;
pub mod fanout;
pub mod handle;
pub mod metrics;
pub mod pipeline;
pub mod reprocess;
pub mod sinks;

pub use contracts::{FinalImage, OutputSink};
pub use error::DispatcherError;
pub use fanout::{create_sink_handle, OutputFanout};
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use pipeline::{CapturePipeline, PipelineCommand, PipelineHandle, PipelineReport};
pub use reprocess::ReprocessDispatcher;
pub use sinks::{ChannelSink, FileSink, FileSinkConfig, LogSink};
