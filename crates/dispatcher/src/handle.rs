//! SinkHandle - runs one output sink behind an isolated queue and worker task

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{FinalImage, OutputSink};
use observability::metrics;

use crate::metrics::SinkMetrics;

/// Handle to a running sink worker
pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<FinalImage>,
    metrics: Arc<SinkMetrics>,
    worker_handle: JoinHandle<()>,
}

impl SinkHandle {
    /// Spawn the worker task for `sink`
    pub fn spawn<S: OutputSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker = SinkWorker {
            sink,
            name: name.clone(),
            stats: Arc::clone(&metrics),
        };
        let worker_handle = tokio::spawn(worker.run(rx));

        Self {
            name,
            tx,
            metrics,
            worker_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue an image without waiting
    ///
    /// Returns false if the queue is full (image dropped) or the worker is gone.
    pub fn try_send(&self, image: FinalImage) -> bool {
        match self.tx.try_send(image) {
            Ok(()) => {
                self.metrics
                    .set_queued(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(image)) => {
                self.metrics.record_drop();
                metrics::record_final_image(&self.name, false);
                warn!(
                    sink = %self.name,
                    frame_number = image.frame_number,
                    "Queue full, final image dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "Sink worker closed unexpectedly");
                false
            }
        }
    }

    /// Drain the queue, flush and close the sink
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(sink = %self.name, "SinkHandle shutdown complete");
    }
}

struct SinkWorker<S> {
    sink: S,
    name: String,
    stats: Arc<SinkMetrics>,
}

impl<S: OutputSink> SinkWorker<S> {
    #[instrument(name = "sink_worker_loop", skip_all, fields(sink = %self.name))]
    async fn run(mut self, mut rx: mpsc::Receiver<FinalImage>) {
        debug!("Sink worker started");
        while let Some(image) = rx.recv().await {
            self.stats.set_queued(rx.len());
            self.write_one(&image).await;
        }
        self.finish().await;
        debug!("Sink worker stopped");
    }

    async fn write_one(&mut self, image: &FinalImage) {
        let outcome = self.sink.write(image).await;
        metrics::record_final_image(&self.name, outcome.is_ok());
        match outcome {
            Ok(()) => self.stats.record_write(image.data.len()),
            Err(e) => {
                self.stats.record_failure();
                error!(frame_number = image.frame_number, error = %e, "Write failed");
            }
        }
    }

    async fn finish(&mut self) {
        if let Err(e) = self.sink.flush().await {
            error!(error = %e, "Flush failed on shutdown");
        }
        if let Err(e) = self.sink.close().await {
            error!(error = %e, "Close failed on shutdown");
        }
    }
}
