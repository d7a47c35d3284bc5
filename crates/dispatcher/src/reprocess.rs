//! ReprocessDispatcher - request issuance and completion routing
//!
//! Owns the request side of a session: the repeating request, still
//! captures and reprocess submissions. Completions are routed by the streams
//! their request targeted: private-stream frames feed the input pairing
//! queue, final-stream frames are joined with their encoded buffer and
//! turned into `FinalImage`s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use capture_engine::{JoinOutcome, PairingQueue, SessionStateMachine, SharedPairingQueue};
use contracts::{
    BufferFormat, BufferHandle, BufferReleaser, CaptureRequest, ContractError, DeviceLayer,
    ExerciserConfig, FinalImage, MetadataRecord, RequestId, RequestKind, StreamKind,
};
use observability::metrics;
use observability::CaptureMetricsAggregator;
use tracing::{debug, error, info, instrument, trace, warn};

/// Final-stream images the device may hold at once
const FINAL_IMAGE_SLOTS: usize = 2;

/// Request issued and not yet completed or failed
#[derive(Debug, Clone)]
struct InFlight {
    kind: RequestKind,
    targets: Vec<StreamKind>,
    submitted_at: Instant,
    started_at: Option<Instant>,
    /// Frame that fed a reprocess request
    source_frame: Option<u64>,
}

/// Reprocess dispatcher
pub struct ReprocessDispatcher<D> {
    device: Arc<D>,
    input: SharedPairingQueue,
    output: PairingQueue,
    repeating_request: CaptureRequest,
    still_request: CaptureRequest,
    repeating: Option<RequestId>,
    in_flight: HashMap<RequestId, InFlight>,
    stats: CaptureMetricsAggregator,
}

impl<D: DeviceLayer + 'static> ReprocessDispatcher<D> {
    pub fn new(device: Arc<D>, config: &ExerciserConfig) -> Self {
        let releaser: Arc<dyn BufferReleaser> = device.clone();
        let input = SharedPairingQueue::new(
            PairingQueue::new(config.pairing.capacity, releaser.clone()).with_label("input"),
        );
        let output = PairingQueue::new(FINAL_IMAGE_SLOTS, releaser).with_label("final");

        Self {
            device,
            input,
            output,
            repeating_request: config.repeating_request(),
            still_request: config.still_request(),
            repeating: None,
            in_flight: HashMap::new(),
            stats: CaptureMetricsAggregator::new(),
        }
    }

    /// Handle to the input pairing queue
    pub fn input_queue(&self) -> &SharedPairingQueue {
        &self.input
    }

    pub fn stats(&self) -> &CaptureMetricsAggregator {
        &self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Start the repeating request for a freshly configured session
    #[instrument(name = "dispatcher_start_repeating", skip(self))]
    pub fn start_repeating(&mut self) -> Result<RequestId, ContractError> {
        let request_id = self
            .device
            .submit_repeating(self.repeating_request.clone())
            .inspect_err(|e| error!(error = %e, "repeating request rejected"))?;
        self.repeating = Some(request_id);
        info!(%request_id, targets = ?self.repeating_request.targets, "repeating request started");
        Ok(request_id)
    }

    /// Feed completion metadata of a private-stream frame to the input queue
    pub fn on_primary_capture_completed(&mut self, metadata: MetadataRecord) -> JoinOutcome {
        let outcome = self.input.on_metadata_arrived(metadata);
        self.count_join(outcome);
        outcome
    }

    /// Feed a private-stream buffer to the input queue
    ///
    /// Outside Ready/Active the buffer is returned to the device at once.
    pub fn on_buffer_ready(
        &mut self,
        buffer: BufferHandle,
        session: &SessionStateMachine,
    ) -> JoinOutcome {
        if !session.accepts_ingest() {
            debug!(buffer_id = %buffer.id(), state = %session.state(), "late buffer released");
            self.release(buffer);
            return JoinOutcome::default();
        }
        let outcome = self.input.on_buffer_arrived(buffer);
        self.count_join(outcome);
        outcome
    }

    fn count_join(&mut self, outcome: JoinOutcome) {
        self.stats.pairs_formed += outcome.formed as u64;
        self.stats.pairs_evicted += outcome.evicted as u64;
    }

    /// Promote the oldest pair to a reprocess request
    ///
    /// `NotReady` leaves everything untouched. Any other error means the
    /// device rejected the request and the session must be closed.
    #[instrument(name = "dispatcher_trigger_reprocess", skip(self, session), fields(state = %session.state()))]
    pub fn trigger_reprocess(
        &mut self,
        session: &SessionStateMachine,
    ) -> Result<RequestId, ContractError> {
        if !session.can_accept_reprocess() {
            let reason = if session.is_reprocessing_enabled() {
                format!("session is {}", session.state())
            } else {
                "reprocessing disabled".to_string()
            };
            debug!(%reason, "reprocess not ready");
            return Err(ContractError::not_ready(reason));
        }

        let Some(pair) = self.input.take_oldest_pair() else {
            debug!("reprocess not ready, no paired frame");
            return Err(ContractError::not_ready("no paired frame available"));
        };
        let (metadata, buffer) = pair.into_parts();
        let buffer_id = buffer.id();

        // Ownership of the buffer ends here whatever the outcome
        if let Err(e) = self.device.queue_reprocess_input(buffer) {
            return Err(self.reprocess_rejected(&metadata, e));
        }

        let request = CaptureRequest::new(RequestKind::Reprocess, vec![StreamKind::Final]);
        let targets = request.targets.clone();
        let request_id = match self.device.submit_reprocess(&metadata, request) {
            Ok(id) => id,
            Err(e) => return Err(self.reprocess_rejected(&metadata, e)),
        };

        self.in_flight.insert(
            request_id,
            InFlight {
                kind: RequestKind::Reprocess,
                targets,
                submitted_at: Instant::now(),
                started_at: None,
                source_frame: Some(metadata.frame_number),
            },
        );
        self.stats.reprocess_submitted += 1;
        metrics::record_reprocess_submitted();
        info!(
            %request_id,
            source_frame = metadata.frame_number,
            %buffer_id,
            "reprocess submitted"
        );
        Ok(request_id)
    }

    fn reprocess_rejected(&mut self, metadata: &MetadataRecord, cause: ContractError) -> ContractError {
        self.stats.reprocess_failed += 1;
        metrics::record_reprocess_failed();
        error!(
            source_frame = metadata.frame_number,
            error = %cause,
            "reprocess submission failed"
        );
        submission_rejected(RequestKind::Reprocess, cause)
    }

    /// Issue a one-shot still capture
    #[instrument(name = "dispatcher_capture_still", skip(self, session), fields(state = %session.state()))]
    pub fn capture_still(&mut self, session: &SessionStateMachine) -> Result<RequestId, ContractError> {
        if !session.can_accept_capture() {
            return Err(ContractError::not_ready(format!(
                "session is {}",
                session.state()
            )));
        }

        let request = self.still_request.clone();
        let targets = request.targets.clone();
        let request_id = self.device.submit_capture(request).map_err(|e| {
            error!(error = %e, "still capture submission failed");
            submission_rejected(RequestKind::Still, e)
        })?;

        self.in_flight.insert(
            request_id,
            InFlight {
                kind: RequestKind::Still,
                targets,
                submitted_at: Instant::now(),
                started_at: None,
                source_frame: None,
            },
        );
        self.stats.stills_submitted += 1;
        info!(%request_id, "still capture submitted");
        Ok(request_id)
    }

    pub fn on_capture_started(&mut self, request_id: RequestId, kind: RequestKind, frame_number: u64) {
        if kind == RequestKind::Preview {
            trace!(%request_id, frame_number, "preview frame started");
            return;
        }
        let Some(entry) = self.in_flight.get_mut(&request_id) else {
            debug!(%request_id, %kind, frame_number, "late start callback ignored");
            self.stats.late_callbacks += 1;
            return;
        };
        let now = Instant::now();
        entry.started_at = Some(now);
        let latency_ms = now.duration_since(entry.submitted_at).as_secs_f64() * 1000.0;
        self.stats.submit_to_start_ms.push(latency_ms);
        metrics::record_capture_latency_ms(kind, "submit_to_start", latency_ms);
        debug!(%request_id, %kind, frame_number, latency_ms, "capture started");
    }

    /// Route completion metadata by the streams its request targeted
    ///
    /// Returns the join outcome of the input queue.
    #[instrument(
        name = "dispatcher_capture_completed",
        level = "trace",
        skip(self, metadata, session),
        fields(frame_number = metadata.frame_number)
    )]
    pub fn on_capture_completed(
        &mut self,
        request_id: RequestId,
        kind: RequestKind,
        metadata: MetadataRecord,
        session: &SessionStateMachine,
    ) -> JoinOutcome {
        let targets = if kind == RequestKind::Preview {
            if self.repeating != Some(request_id) {
                trace!(%request_id, "completion from stale repeating request");
                self.stats.late_callbacks += 1;
                return JoinOutcome::default();
            }
            self.repeating_request.targets.clone()
        } else {
            let Some(entry) = self.in_flight.remove(&request_id) else {
                info!(%request_id, %kind, frame_number = metadata.frame_number, "late completion ignored");
                self.stats.late_callbacks += 1;
                return JoinOutcome::default();
            };
            self.finish_latency(request_id, &entry, metadata.frame_number);
            if kind == RequestKind::Reprocess {
                self.stats.reprocess_completed += 1;
                metrics::record_reprocess_completed();
            }
            entry.targets
        };

        let mut outcome = JoinOutcome::default();
        if targets.contains(&StreamKind::Private) {
            if session.accepts_ingest() {
                outcome = self.on_primary_capture_completed(metadata.clone());
            } else {
                trace!(frame_number = metadata.frame_number, "metadata dropped outside ingest");
            }
        }
        if targets.contains(&StreamKind::Final) {
            self.output.on_metadata_arrived(metadata);
        }
        outcome
    }

    fn finish_latency(&mut self, request_id: RequestId, entry: &InFlight, frame_number: u64) {
        let Some(started_at) = entry.started_at else {
            return;
        };
        let latency_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        self.stats.start_to_complete_ms.push(latency_ms);
        metrics::record_capture_latency_ms(entry.kind, "start_to_complete", latency_ms);
        info!(
            %request_id,
            kind = %entry.kind,
            frame_number,
            source_frame = ?entry.source_frame,
            latency_ms,
            "capture completed"
        );
    }

    /// Per-frame failure: recorded, no buffer is owed
    pub fn on_capture_failed(
        &mut self,
        request_id: RequestId,
        kind: RequestKind,
        frame_number: u64,
        reason: String,
    ) {
        if kind != RequestKind::Preview && self.in_flight.remove(&request_id).is_none() {
            info!(%request_id, %kind, frame_number, %reason, "late failure ignored");
            self.stats.late_callbacks += 1;
            return;
        }
        self.stats.capture_failures += 1;
        metrics::record_capture_failure(kind);
        if kind == RequestKind::Reprocess {
            self.stats.reprocess_failed += 1;
            metrics::record_reprocess_failed();
        }
        let error = ContractError::CaptureFailed {
            request_id,
            frame_number,
            reason,
        };
        warn!(%kind, error = %error, "capture failed");
    }

    pub fn on_buffer_lost(
        &mut self,
        request_id: RequestId,
        kind: RequestKind,
        frame_number: u64,
        stream: StreamKind,
    ) {
        self.stats.buffers_lost += 1;
        metrics::record_buffer_lost(kind);
        let error = ContractError::BufferLost {
            request_id,
            frame_number,
        };
        warn!(%kind, ?stream, error = %error, "buffer lost");
    }

    /// Feed a final-stream buffer to the output join
    pub fn on_final_buffer(&mut self, buffer: BufferHandle, session: &SessionStateMachine) {
        if !session.accepts_ingest() {
            debug!(buffer_id = %buffer.id(), state = %session.state(), "late final buffer released");
            self.release(buffer);
            return;
        }
        self.output.on_buffer_arrived(buffer);
    }

    /// Copy out every joined final image and release its buffer
    pub fn take_final_images(&mut self) -> Vec<FinalImage> {
        let mut images = Vec::new();
        while let Some(pair) = self.output.take_oldest_pair() {
            let (metadata, buffer) = pair.into_parts();
            if buffer.format() != BufferFormat::Jpeg {
                warn!(
                    frame_number = metadata.frame_number,
                    format = ?buffer.format(),
                    "unsupported final image format, buffer released"
                );
                self.release(buffer);
                continue;
            }

            let image = FinalImage {
                frame_number: metadata.frame_number,
                request_id: metadata.request_id,
                format: buffer.format(),
                timestamp_ns: buffer.timestamp_ns(),
                data: Bytes::copy_from_slice(buffer.data()),
            };
            self.release(buffer);
            self.stats.final_images += 1;
            debug!(frame_number = image.frame_number, bytes = image.data.len(), "final image ready");
            images.push(image);
        }
        images
    }

    /// Drop all session-scoped state and release every held buffer
    #[instrument(name = "dispatcher_reset", skip(self))]
    pub fn reset(&mut self) -> usize {
        let released = self.input.drain_and_release_all() + self.output.drain_and_release_all();
        if !self.in_flight.is_empty() {
            debug!(abandoned = self.in_flight.len(), "in-flight requests abandoned");
        }
        self.in_flight.clear();
        self.repeating = None;
        released
    }

    fn release(&self, buffer: BufferHandle) {
        let buffer_id = buffer.id();
        if let Err(e) = self.device.release_buffer(buffer) {
            warn!(%buffer_id, error = %e, "buffer release failed");
        }
    }
}

/// Any rejected submission closes the session, whatever the device reported.
fn submission_rejected(kind: RequestKind, cause: ContractError) -> ContractError {
    if cause.is_session_fatal() {
        cause
    } else {
        ContractError::submission_failed(kind.as_str(), cause.to_string())
    }
}
