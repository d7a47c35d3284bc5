//! Capture run orchestration.

mod orchestrator;
mod stats;

pub use orchestrator::{Exerciser, ExerciserSettings};
pub use stats::{RunSummary, ShotCounts};
