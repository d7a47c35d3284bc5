//! # Contracts
//!
//! Shared data model, device capability traits, configuration and errors.
//! `contracts` sits at the bottom of the crate graph and depends on no other
//! workspace crate; `device`, `capture_engine`, `dispatcher` and the binaries
//! all build on it.
//!
//! ## Ownership Model
//! - `BufferHandle` is not `Clone`: whoever holds it must either release it
//!   through `BufferReleaser` or queue it as reprocess input
//! - `MetadataRecord` is plain data and may be copied freely

mod config;
mod device;
mod error;
mod frame;
mod session;
mod sink;

pub use config::*;
pub use device::*;
pub use error::*;
pub use frame::*;
pub use session::*;
pub use sink::*;
