//! Sink implementations
//!
//! Contains LogSink, FileSink, and ChannelSink.

mod channel;
mod file;
mod log;

pub use self::channel::ChannelSink;
pub use self::file::{FileSink, FileSinkConfig};
pub use self::log::LogSink;
