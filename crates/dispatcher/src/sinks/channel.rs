//! ChannelSink - forwards final images to an in-process receiver

use contracts::{ContractError, FinalImage, OutputSink};
use tokio::sync::mpsc;

/// Sink that hands each image to an unbounded channel
///
/// Used by embedding code (and tests) that wants the images themselves.
pub struct ChannelSink {
    name: String,
    tx: mpsc::UnboundedSender<FinalImage>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<FinalImage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl OutputSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, image: &FinalImage) -> Result<(), ContractError> {
        self.tx
            .send(image.clone())
            .map_err(|_| ContractError::sink_write(&self.name, "receiver dropped"))
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}
