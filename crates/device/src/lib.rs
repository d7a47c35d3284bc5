//! # Device
//!
//! Simulated camera device implementing `contracts::DeviceLayer`.
//!
//! - `MockDevice`: open/configure/active sequencing, one-shot and reprocess
//!   requests, injectable failures
//! - `FrameSource`: repeating-request frame loop emitting metadata and
//!   buffers from independent tasks
//! - `BufferLedger`: per-buffer acquisition/release accounting

mod frame_source;
mod ledger;
mod mock_device;

pub use frame_source::FrameSource;
pub use ledger::{BufferLedger, LedgerReport};
pub use mock_device::{MockDevice, MockDeviceConfig};
