//! Repeating-request frame source
//!
//! The frame loop hands metadata and buffers to two emitter tasks that each
//! add their own random delay, so the two streams reach the listener out of
//! step with each other while staying FIFO within each stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use contracts::{CaptureRequest, DeviceEvent, MetadataRecord, RequestId, RequestKind, StreamKind};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::mock_device::DeviceShared;

/// Running repeating request
pub struct FrameSource {
    running: Arc<AtomicBool>,
}

impl FrameSource {
    pub(crate) fn start(
        shared: Arc<DeviceShared>,
        generation: u64,
        request_id: RequestId,
        request: CaptureRequest,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (meta_tx, meta_rx) = mpsc::unbounded_channel::<DeviceEvent>();
        let (buf_tx, buf_rx) = mpsc::unbounded_channel::<u64>();

        tokio::spawn(emit_metadata(shared.clone(), generation, meta_rx));
        tokio::spawn(emit_buffers(shared.clone(), generation, buf_rx));

        let loop_running = running.clone();
        tokio::spawn(async move {
            let config = &shared.config;
            let feeds_private = request.targets(StreamKind::Private);
            let mut emitted: u64 = 0;

            shared.emit_if_current(generation, DeviceEvent::Active);
            debug!(
                %request_id,
                interval_ms = config.frame_interval.as_millis() as u64,
                feeds_private,
                "frame source started"
            );

            while loop_running.load(Ordering::Relaxed) && shared.is_current(generation) {
                let frame_number = shared.next_frame_number();
                let timestamp_ns = shared.now_ns();
                emitted += 1;

                shared.emit_if_current(
                    generation,
                    DeviceEvent::CaptureStarted {
                        request_id,
                        kind: RequestKind::Preview,
                        frame_number,
                        timestamp_ns,
                    },
                );

                if feeds_private {
                    let lose = config
                        .drop_buffer_every
                        .is_some_and(|every| every > 0 && emitted % every == 0);
                    if lose {
                        shared.emit_if_current(
                            generation,
                            DeviceEvent::BufferLost {
                                request_id,
                                kind: RequestKind::Preview,
                                frame_number,
                                stream: StreamKind::Private,
                            },
                        );
                    } else if buf_tx.send(timestamp_ns).is_err() {
                        break;
                    }
                }

                let completed = DeviceEvent::CaptureCompleted {
                    request_id,
                    kind: RequestKind::Preview,
                    metadata: MetadataRecord {
                        frame_number,
                        request_id,
                        timestamp_ns,
                    },
                };
                if meta_tx.send(completed).is_err() {
                    break;
                }

                tokio::time::sleep(config.frame_interval).await;
            }

            debug!(%request_id, frames = emitted, "frame source stopped");
        });

        Self { running }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn jitter(max: Duration) -> Duration {
    let max_us = max.as_micros() as u64;
    if max_us == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(rand::rng().random_range(0..=max_us))
}

async fn emit_metadata(
    shared: Arc<DeviceShared>,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<DeviceEvent>,
) {
    while let Some(event) = rx.recv().await {
        tokio::time::sleep(jitter(shared.config.jitter)).await;
        if !shared.emit_if_current(generation, event) {
            break;
        }
    }
}

async fn emit_buffers(
    shared: Arc<DeviceShared>,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<u64>,
) {
    while let Some(timestamp_ns) = rx.recv().await {
        tokio::time::sleep(jitter(shared.config.jitter)).await;
        let (format, data) = shared.private_image();
        if !shared.push_image(generation, StreamKind::Private, format, timestamp_ns, data) {
            trace!("buffer emitter stopped by close");
            break;
        }
    }
}
