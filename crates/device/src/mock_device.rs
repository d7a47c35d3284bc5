//! Mock camera device
//!
//! Simulates the asynchronous device API for tests and the exerciser CLI.
//! Calls return immediately; outcomes arrive later through the registered
//! `DeviceEventCallback` from spawned tokio tasks, so a tokio runtime must be
//! running.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{
    BufferFormat, BufferHandle, BufferReleaser, CaptureRequest, ContractError, DeviceEvent,
    DeviceEventCallback, DeviceLayer, MetadataRecord, RequestId, RequestKind, SessionSpec,
    StreamKind,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument, trace, warn};

use crate::frame_source::FrameSource;
use crate::ledger::BufferLedger;

/// Mock device configuration (failure injection included)
#[derive(Debug, Clone)]
pub struct MockDeviceConfig {
    /// Repeating request frame period
    pub frame_interval: Duration,
    /// Upper bound of random per-event delivery delay
    pub jitter: Duration,
    /// Latency of one-shot and reprocess requests
    pub processing_delay: Duration,
    /// Private buffer size
    pub buffer_bytes: usize,
    /// Final image size
    pub final_bytes: usize,
    /// Format produced on the final stream
    pub final_format: BufferFormat,
    /// Unacquired images kept per stream; older ones are recycled
    pub reader_capacity: usize,
    /// Fail `open_device` with this error code
    pub fail_open: Option<i32>,
    /// Fail `configure_session`
    pub fail_configure: bool,
    /// Reject every submission
    pub reject_submissions: bool,
    /// Lose the private buffer of every Nth repeating frame
    pub drop_buffer_every: Option<u64>,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            jitter: Duration::from_millis(2),
            processing_delay: Duration::from_millis(15),
            buffer_bytes: 4096,
            final_bytes: 2048,
            final_format: BufferFormat::Jpeg,
            reader_capacity: 50,
            fail_open: None,
            fail_configure: false,
            reject_submissions: false,
            drop_buffer_every: None,
        }
    }
}

impl MockDeviceConfig {
    /// Fast pacing for tests
    pub fn fast() -> Self {
        Self {
            frame_interval: Duration::from_millis(5),
            jitter: Duration::from_millis(1),
            processing_delay: Duration::from_millis(3),
            ..Default::default()
        }
    }
}

/// An image waiting in a device-side reader, not yet handed out
struct PendingImage {
    format: BufferFormat,
    timestamp_ns: u64,
    data: Bytes,
}

#[derive(Default)]
struct DeviceState {
    /// Bumped on every close; work started under an older generation is stale
    generation: u64,
    camera_id: Option<String>,
    session: Option<SessionSpec>,
    next_request: u64,
    next_frame: u64,
    readers: HashMap<StreamKind, VecDeque<PendingImage>>,
    reprocess_inputs: VecDeque<u64>,
    repeating: Option<FrameSource>,
    reject_submissions: bool,
    submitted_captures: u64,
    submitted_reprocesses: u64,
}

pub(crate) struct DeviceShared {
    pub(crate) config: MockDeviceConfig,
    ledger: Arc<BufferLedger>,
    callback: RwLock<Option<DeviceEventCallback>>,
    state: Mutex<DeviceState>,
    epoch: Instant,
}

impl DeviceShared {
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    pub(crate) fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    pub(crate) fn next_frame_number(&self) -> u64 {
        let mut state = self.state.lock();
        state.next_frame += 1;
        state.next_frame
    }

    pub(crate) fn emit(&self, event: DeviceEvent) {
        let callback = self.callback.read().clone();
        match callback {
            Some(callback) => callback(event),
            None => trace!(event = event.name(), "no listener, event dropped"),
        }
    }

    /// Emit only if no close happened since `generation`
    pub(crate) fn emit_if_current(&self, generation: u64, event: DeviceEvent) -> bool {
        if !self.is_current(generation) {
            trace!(event = event.name(), generation, "stale event suppressed");
            return false;
        }
        self.emit(event);
        true
    }

    pub(crate) fn private_image(&self) -> (BufferFormat, Bytes) {
        (
            BufferFormat::Private,
            Bytes::from(vec![0x5Au8; self.config.buffer_bytes]),
        )
    }

    fn final_image(&self) -> (BufferFormat, Bytes) {
        let format = self.config.final_format;
        let data = match format {
            BufferFormat::Jpeg => {
                let len = self.config.final_bytes.max(4);
                let mut data = vec![0x11u8; len];
                data[0] = 0xFF;
                data[1] = 0xD8;
                data[len - 2] = 0xFF;
                data[len - 1] = 0xD9;
                data
            }
            _ => vec![0x80u8; self.config.final_bytes],
        };
        (format, Bytes::from(data))
    }

    /// Place an image in a reader and announce it
    pub(crate) fn push_image(
        &self,
        generation: u64,
        stream: StreamKind,
        format: BufferFormat,
        timestamp_ns: u64,
        data: Bytes,
    ) -> bool {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            let reader = state.readers.entry(stream).or_default();
            reader.push_back(PendingImage {
                format,
                timestamp_ns,
                data,
            });
            if reader.len() > self.config.reader_capacity {
                reader.pop_front();
                warn!(?stream, "reader full, oldest unacquired image recycled");
            }
        }
        self.emit(DeviceEvent::ImageAvailable { stream });
        true
    }
}

/// Simulated camera device
pub struct MockDevice {
    shared: Arc<DeviceShared>,
}

impl MockDevice {
    pub fn new(config: MockDeviceConfig) -> Self {
        let state = DeviceState {
            reject_submissions: config.reject_submissions,
            ..Default::default()
        };
        Self {
            shared: Arc::new(DeviceShared {
                config,
                ledger: Arc::new(BufferLedger::new()),
                callback: RwLock::new(None),
                state: Mutex::new(state),
                epoch: Instant::now(),
            }),
        }
    }

    /// Buffer accounting shared with every handle this device issues
    pub fn ledger(&self) -> Arc<BufferLedger> {
        self.shared.ledger.clone()
    }

    pub fn config(&self) -> &MockDeviceConfig {
        &self.shared.config
    }

    /// Toggle submission rejection at runtime
    pub fn set_reject_submissions(&self, reject: bool) {
        self.shared.state.lock().reject_submissions = reject;
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().camera_id.is_some()
    }

    pub fn camera_id(&self) -> Option<String> {
        self.shared.state.lock().camera_id.clone()
    }

    /// One-shot captures accepted so far
    pub fn submitted_captures(&self) -> u64 {
        self.shared.state.lock().submitted_captures
    }

    /// Reprocess requests accepted so far
    pub fn submitted_reprocesses(&self) -> u64 {
        self.shared.state.lock().submitted_reprocesses
    }

    /// Images sitting unacquired in a reader
    pub fn pending_images(&self, stream: StreamKind) -> usize {
        self.shared
            .state
            .lock()
            .readers
            .get(&stream)
            .map_or(0, VecDeque::len)
    }

    /// Report the device as gone
    pub fn simulate_disconnect(&self) {
        self.spawn_emit(DeviceEvent::Disconnected);
    }

    /// Report a device-level error
    pub fn simulate_error(&self, code: i32) {
        self.spawn_emit(DeviceEvent::Error { code });
    }

    fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    fn spawn_emit(&self, event: DeviceEvent) {
        let shared = self.shared.clone();
        let generation = self.generation();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            shared.emit_if_current(generation, event);
        });
    }

    /// Common submit-time checks; returns the current generation and a fresh id
    fn admit(&self, kind: RequestKind) -> Result<(u64, RequestId), ContractError> {
        let mut state = self.shared.state.lock();
        if state.session.is_none() {
            return Err(ContractError::submission_failed(
                kind.as_str(),
                "no configured session",
            ));
        }
        if state.reject_submissions {
            return Err(ContractError::submission_failed(
                kind.as_str(),
                "rejected by device",
            ));
        }
        state.next_request += 1;
        Ok((state.generation, RequestId(state.next_request)))
    }

    /// Run a one-shot request to completion on a spawned task
    fn spawn_one_shot(
        &self,
        generation: u64,
        request_id: RequestId,
        request: CaptureRequest,
        input_timestamp_ns: Option<u64>,
    ) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shared.config.processing_delay).await;
            let kind = request.kind;
            let frame_number = shared.next_frame_number();

            if !shared.is_current(generation) {
                // Device closed underneath the request: deliver a late failure
                shared.emit(DeviceEvent::CaptureFailed {
                    request_id,
                    kind,
                    frame_number,
                    reason: "request aborted by device close".to_string(),
                });
                return;
            }

            let timestamp_ns = input_timestamp_ns.unwrap_or_else(|| shared.now_ns());
            shared.emit_if_current(
                generation,
                DeviceEvent::CaptureStarted {
                    request_id,
                    kind,
                    frame_number,
                    timestamp_ns,
                },
            );

            for stream in &request.targets {
                let (format, data) = match stream {
                    StreamKind::Private => shared.private_image(),
                    StreamKind::Final => shared.final_image(),
                    StreamKind::Preview => continue,
                };
                shared.push_image(generation, *stream, format, timestamp_ns, data);
            }

            shared.emit_if_current(
                generation,
                DeviceEvent::CaptureCompleted {
                    request_id,
                    kind,
                    metadata: MetadataRecord {
                        frame_number,
                        request_id,
                        timestamp_ns,
                    },
                },
            );
        });
    }
}

impl BufferReleaser for MockDevice {
    fn release_buffer(&self, buffer: BufferHandle) -> Result<(), ContractError> {
        self.shared.ledger.release_buffer(buffer)
    }
}

impl DeviceLayer for MockDevice {
    fn listen(&self, callback: DeviceEventCallback) {
        *self.shared.callback.write() = Some(callback);
    }

    #[instrument(name = "mock_device_open", skip(self))]
    fn open_device(&self, camera_id: &str) -> Result<(), ContractError> {
        {
            let mut state = self.shared.state.lock();
            if let Some(open) = &state.camera_id {
                return Err(ContractError::device_unavailable(
                    camera_id,
                    format!("device busy with camera '{open}'"),
                ));
            }
            if self.shared.config.fail_open.is_none() {
                state.camera_id = Some(camera_id.to_string());
            }
        }

        match self.shared.config.fail_open {
            Some(code) => {
                debug!(code, "open failure injected");
                self.spawn_emit(DeviceEvent::Error { code });
            }
            None => self.spawn_emit(DeviceEvent::Opened),
        }
        Ok(())
    }

    #[instrument(name = "mock_device_configure", skip(self, spec), fields(outputs = spec.outputs.len()))]
    fn configure_session(&self, spec: &SessionSpec) -> Result<(), ContractError> {
        {
            let mut state = self.shared.state.lock();
            if state.camera_id.is_none() {
                return Err(ContractError::configuration_failed("device not open"));
            }
            if !self.shared.config.fail_configure {
                state.session = Some(spec.clone());
            }
        }

        if self.shared.config.fail_configure {
            self.spawn_emit(DeviceEvent::ConfigureFailed);
        } else {
            self.spawn_emit(DeviceEvent::Configured);
        }
        Ok(())
    }

    fn submit_repeating(&self, request: CaptureRequest) -> Result<RequestId, ContractError> {
        let (generation, request_id) = self.admit(request.kind)?;
        let source = FrameSource::start(self.shared.clone(), generation, request_id, request);

        let previous = self.shared.state.lock().repeating.replace(source);
        if let Some(previous) = previous {
            previous.stop();
        }
        debug!(%request_id, "repeating request started");
        Ok(request_id)
    }

    fn submit_capture(&self, request: CaptureRequest) -> Result<RequestId, ContractError> {
        let (generation, request_id) = self.admit(request.kind)?;
        self.shared.state.lock().submitted_captures += 1;
        self.spawn_one_shot(generation, request_id, request, None);
        Ok(request_id)
    }

    fn submit_reprocess(
        &self,
        metadata: &MetadataRecord,
        request: CaptureRequest,
    ) -> Result<RequestId, ContractError> {
        let (generation, request_id) = self.admit(RequestKind::Reprocess)?;
        let input_timestamp = {
            let mut state = self.shared.state.lock();
            let Some(timestamp) = state.reprocess_inputs.pop_front() else {
                return Err(ContractError::submission_failed(
                    RequestKind::Reprocess.as_str(),
                    "no queued reprocess input",
                ));
            };
            state.submitted_reprocesses += 1;
            timestamp
        };
        trace!(
            %request_id,
            source_frame = metadata.frame_number,
            "reprocess accepted"
        );
        self.spawn_one_shot(generation, request_id, request, Some(input_timestamp));
        Ok(request_id)
    }

    fn acquire_buffer(&self, stream: StreamKind) -> Option<BufferHandle> {
        let image = self.shared.state.lock().readers.get_mut(&stream)?.pop_front()?;
        Some(
            self.shared
                .ledger
                .issue(stream, image.format, image.timestamp_ns, image.data),
        )
    }

    fn queue_reprocess_input(&self, buffer: BufferHandle) -> Result<(), ContractError> {
        let timestamp_ns = buffer.timestamp_ns();
        let buffer_id = buffer.id();
        self.shared.ledger.consume(buffer)?;

        let mut state = self.shared.state.lock();
        let accepts_input = state
            .session
            .as_ref()
            .is_some_and(|session| session.reprocess_input.is_some());
        if !accepts_input {
            return Err(ContractError::submission_failed(
                RequestKind::Reprocess.as_str(),
                format!("session has no reprocess input, {buffer_id} discarded"),
            ));
        }
        state.reprocess_inputs.push_back(timestamp_ns);
        Ok(())
    }

    #[instrument(name = "mock_device_close", skip(self))]
    fn close_device(&self) {
        let repeating = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.camera_id = None;
            state.session = None;
            state.readers.clear();
            state.reprocess_inputs.clear();
            state.repeating.take()
        };
        if let Some(source) = repeating {
            source.stop();
        }
        self.spawn_emit(DeviceEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn listening(device: &MockDevice) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        device.listen(Arc::new(move |event| {
            let _ = tx.send(event);
        }));
        rx
    }

    async fn next_named(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>, name: &str) -> DeviceEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("channel closed");
            if event.name() == name {
                return event;
            }
        }
    }

    fn zsl_spec() -> SessionSpec {
        SessionSpec {
            outputs: vec![StreamKind::Preview, StreamKind::Private, StreamKind::Final],
            reprocess_input: Some(contracts::InputSpec {
                width: 64,
                height: 48,
                format: BufferFormat::Private,
            }),
        }
    }

    #[tokio::test]
    async fn test_open_configure_sequence() {
        let device = MockDevice::new(MockDeviceConfig::fast());
        let mut rx = listening(&device);

        device.open_device("0").unwrap();
        next_named(&mut rx, "opened").await;
        assert_eq!(device.camera_id().as_deref(), Some("0"));

        device.configure_session(&zsl_spec()).unwrap();
        next_named(&mut rx, "configured").await;
    }

    #[tokio::test]
    async fn test_open_failure_injection() {
        let device = MockDevice::new(MockDeviceConfig {
            fail_open: Some(3),
            ..MockDeviceConfig::fast()
        });
        let mut rx = listening(&device);

        device.open_device("1").unwrap();
        match next_named(&mut rx, "error").await {
            DeviceEvent::Error { code } => assert_eq!(code, 3),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!device.is_open());
    }

    #[tokio::test]
    async fn test_repeating_emits_active_then_frames() {
        let device = MockDevice::new(MockDeviceConfig::fast());
        let mut rx = listening(&device);
        device.open_device("0").unwrap();
        next_named(&mut rx, "opened").await;
        device.configure_session(&zsl_spec()).unwrap();
        next_named(&mut rx, "configured").await;

        device
            .submit_repeating(CaptureRequest::new(
                RequestKind::Preview,
                vec![StreamKind::Preview, StreamKind::Private],
            ))
            .unwrap();
        next_named(&mut rx, "active").await;
        next_named(&mut rx, "image_available").await;

        let buffer = device.acquire_buffer(StreamKind::Private).unwrap();
        assert_eq!(buffer.format(), BufferFormat::Private);
        device.release_buffer(buffer).unwrap();

        device.close_device();
        next_named(&mut rx, "closed").await;
        assert_eq!(device.pending_images(StreamKind::Private), 0);
        assert!(device.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_reprocess_requires_queued_input() {
        let device = MockDevice::new(MockDeviceConfig::fast());
        let mut rx = listening(&device);
        device.open_device("0").unwrap();
        next_named(&mut rx, "opened").await;
        device.configure_session(&zsl_spec()).unwrap();
        next_named(&mut rx, "configured").await;

        let metadata = MetadataRecord {
            frame_number: 1,
            request_id: RequestId(1),
            timestamp_ns: 10,
        };
        let request = CaptureRequest::new(RequestKind::Reprocess, vec![StreamKind::Final]);
        let err = device.submit_reprocess(&metadata, request.clone()).unwrap_err();
        assert!(err.is_session_fatal());

        let input = device.ledger().mint(10);
        device.queue_reprocess_input(input).unwrap();
        device.submit_reprocess(&metadata, request).unwrap();
        next_named(&mut rx, "image_available").await;

        let jpeg = device.acquire_buffer(StreamKind::Final).unwrap();
        assert_eq!(&jpeg.data()[..2], &[0xFF, 0xD8]);
        device.release_buffer(jpeg).unwrap();
        assert_eq!(device.submitted_reprocesses(), 1);
        assert!(device.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_rejected_submissions() {
        let device = MockDevice::new(MockDeviceConfig::fast());
        let mut rx = listening(&device);
        device.open_device("0").unwrap();
        next_named(&mut rx, "opened").await;
        device.configure_session(&zsl_spec()).unwrap();
        next_named(&mut rx, "configured").await;

        device.set_reject_submissions(true);
        let err = device
            .submit_capture(CaptureRequest::new(RequestKind::Still, vec![StreamKind::Final]))
            .unwrap_err();
        assert!(matches!(err, ContractError::CaptureSubmissionFailed { .. }));
        assert_eq!(device.submitted_captures(), 0);
    }

    #[tokio::test]
    async fn test_close_aborts_in_flight_capture() {
        let device = MockDevice::new(MockDeviceConfig {
            processing_delay: Duration::from_millis(30),
            ..MockDeviceConfig::fast()
        });
        let mut rx = listening(&device);
        device.open_device("0").unwrap();
        next_named(&mut rx, "opened").await;
        device.configure_session(&zsl_spec()).unwrap();
        next_named(&mut rx, "configured").await;

        device
            .submit_capture(CaptureRequest::new(RequestKind::Still, vec![StreamKind::Final]))
            .unwrap();
        device.close_device();
        next_named(&mut rx, "closed").await;
        match next_named(&mut rx, "capture_failed").await {
            DeviceEvent::CaptureFailed { kind, .. } => assert_eq!(kind, RequestKind::Still),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(device.pending_images(StreamKind::Final), 0);
    }
}
