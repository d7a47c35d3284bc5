//! # Capture Engine
//!
//! Pure bookkeeping core of the capture pipeline.
//!
//! - `PairingQueue`: positional join of metadata and buffers with bounded
//!   retention
//! - `SessionStateMachine`: session lifecycle and capture/reprocess gating
//!
//! Neither type performs I/O. Buffer release is delegated to a
//! `contracts::BufferReleaser`; session side effects are returned as
//! `SessionAction`s for the caller to carry out.

mod pairing;
mod session;

pub use pairing::{JoinOutcome, PairingQueue, PairingStats, SharedPairingQueue};
pub use session::{SessionAction, SessionStateMachine};
