//! OutputSink trait - final image delivery interface

use crate::{ContractError, FinalImage};

/// Final image consumer
///
/// All sink implementations must implement this trait. The sink owns the
/// bytes it receives; the hardware buffer they came from is already released.
#[trait_variant::make(OutputSink: Send)]
pub trait LocalOutputSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Consume one final image
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, image: &FinalImage) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
