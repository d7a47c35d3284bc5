//! LogSink - logs a final image summary via tracing

use contracts::{ContractError, FinalImage, OutputSink};
use tracing::{info, instrument};

/// Sink that logs image summaries for debugging
pub struct LogSink {
    name: String,
    images: u64,
    bytes: u64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            images: 0,
            bytes: 0,
        }
    }
}

impl OutputSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, image),
        fields(sink = %self.name, frame_number = image.frame_number)
    )]
    async fn write(&mut self, image: &FinalImage) -> Result<(), ContractError> {
        self.images += 1;
        self.bytes += image.data.len() as u64;
        info!(
            sink = %self.name,
            frame_number = image.frame_number,
            request_id = %image.request_id,
            format = ?image.format,
            bytes = image.data.len(),
            "Final image received"
        );
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, images = self.images, bytes = self.bytes, "LogSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{BufferFormat, RequestId};

    #[tokio::test]
    async fn test_log_sink_write() {
        let mut sink = LogSink::new("test_log");
        let image = FinalImage {
            frame_number: 1,
            request_id: RequestId(4),
            format: BufferFormat::Jpeg,
            timestamp_ns: 0,
            data: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
        };

        assert!(sink.write(&image).await.is_ok());
        assert_eq!(sink.images, 1);
        assert_eq!(sink.bytes, 4);
        assert_eq!(sink.name(), "test_log");
    }
}
