//! OutputFanout - delivers final images to every configured sink

use tracing::{debug, instrument};

use contracts::{FinalImage, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{FileSink, LogSink};

/// Fan-out over isolated sink workers
///
/// Delivery never waits on a sink: a full sink queue drops the image for
/// that sink only.
#[derive(Default)]
pub struct OutputFanout {
    handles: Vec<SinkHandle>,
}

impl OutputFanout {
    pub fn with_handles(handles: Vec<SinkHandle>) -> Self {
        Self { handles }
    }

    /// Build sink workers from configuration
    #[instrument(
        name = "fanout_from_configs",
        skip(configs),
        fields(sink_count = configs.len())
    )]
    pub async fn from_configs(configs: &[SinkConfig]) -> Result<Self, DispatcherError> {
        let mut handles = Vec::with_capacity(configs.len());
        for config in configs {
            handles.push(create_sink_handle(config).await?);
        }
        Ok(Self { handles })
    }

    pub fn push(&mut self, handle: SinkHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Offer an image to every sink; returns how many accepted it
    pub fn deliver(&self, image: &FinalImage) -> usize {
        if self.handles.is_empty() {
            debug!(frame_number = image.frame_number, "no sinks configured, image discarded");
            return 0;
        }
        self.handles
            .iter()
            .filter(|handle| handle.try_send(image.clone()))
            .count()
    }

    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Shut every sink down, returning final metrics
    pub async fn shutdown(self) -> Vec<(String, MetricsSnapshot)> {
        let mut report = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            let name = handle.name().to_string();
            let metrics = handle.metrics().clone();
            handle.shutdown().await;
            report.push((name, metrics.snapshot()));
        }
        report
    }
}

/// Create a SinkHandle from configuration
#[instrument(
    name = "fanout_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
pub async fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::new(&config.name);
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}
