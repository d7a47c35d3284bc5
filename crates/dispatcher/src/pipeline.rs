//! CapturePipeline - serialized intake for device events and caller commands
//!
//! Device callbacks and API calls arrive on arbitrary tasks. Both are turned
//! into messages and handled one at a time by a single actor task, which is
//! the only owner of the session state machine and the dispatcher.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use capture_engine::{JoinOutcome, PairingStats, SessionAction, SessionStateMachine, SharedPairingQueue};
use contracts::{
    BufferHandle, CloseReason, ContractError, DeviceEvent, DeviceLayer, ExerciserConfig,
    ReprocessMode, RequestId, SessionState, StreamKind,
};
use observability::metrics;
use observability::{CaptureStatsCollector, CaptureSummary, RunningStats};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::DispatcherError;
use crate::fanout::OutputFanout;
use crate::metrics::MetricsSnapshot;
use crate::reprocess::ReprocessDispatcher;

/// How long shutdown waits for the device to confirm a close
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type Reply = oneshot::Sender<Result<RequestId, ContractError>>;

/// Caller request to the pipeline actor
#[derive(Debug)]
pub enum PipelineCommand {
    Open { camera_id: String },
    SwitchCamera { camera_id: String },
    Close,
    TriggerReprocess { reply: Reply },
    CaptureStill { reply: Reply },
    Shutdown,
}

/// End-of-run report
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub summary: CaptureSummary,
    pub pairing: PairingStats,
    pub final_state: SessionState,
    pub last_close_reason: Option<CloseReason>,
    pub sinks: Vec<(String, MetricsSnapshot)>,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)?;
        writeln!(
            f,
            "Pairing: formed={} evicted={} taken={} released={} release_failures={}",
            self.pairing.formed,
            self.pairing.evicted,
            self.pairing.taken,
            self.pairing.released,
            self.pairing.release_failures
        )?;
        writeln!(f, "Final state: {}", self.final_state)?;
        if let Some(reason) = &self.last_close_reason {
            writeln!(f, "Last close reason: {reason}")?;
        }
        for (name, snapshot) in &self.sinks {
            writeln!(f, "Sink {name}: {snapshot}")?;
        }
        Ok(())
    }
}

/// The pipeline actor
pub struct CapturePipeline<D> {
    config: ExerciserConfig,
    device: Arc<D>,
    session: SessionStateMachine,
    dispatcher: ReprocessDispatcher<D>,
    fanout: OutputFanout,
    stats: CaptureStatsCollector,
    intervals: RunningStats,
    /// A pair has formed since the session was opened
    pair_seen: bool,
    ready_tx: watch::Sender<bool>,
    state_tx: watch::Sender<SessionState>,
    events: mpsc::UnboundedReceiver<DeviceEvent>,
    commands: mpsc::Receiver<PipelineCommand>,
}

impl<D: DeviceLayer + 'static> CapturePipeline<D> {
    /// Build sinks from `config.sinks` and start the pipeline
    pub async fn from_config(
        config: ExerciserConfig,
        device: Arc<D>,
    ) -> Result<PipelineHandle, DispatcherError> {
        let fanout = OutputFanout::from_configs(&config.sinks).await?;
        Ok(Self::spawn(config, device, fanout))
    }

    /// Register as the device listener and spawn the actor task
    pub fn spawn(config: ExerciserConfig, device: Arc<D>, fanout: OutputFanout) -> PipelineHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::channel(config.intake.command_capacity.max(1));
        let (ready_tx, ready_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Closed);

        device.listen(Arc::new(move |event| {
            if events_tx.send(event).is_err() {
                trace!("pipeline gone, device event dropped");
            }
        }));

        let dispatcher = ReprocessDispatcher::new(device.clone(), &config);
        let input = dispatcher.input_queue().clone();
        let pipeline = Self {
            session: SessionStateMachine::new(config.reprocess.enabled),
            stats: CaptureStatsCollector::new(config.stats.window),
            intervals: RunningStats::default(),
            pair_seen: false,
            config,
            device,
            dispatcher,
            fanout,
            ready_tx,
            state_tx,
            events,
            commands,
        };

        let task = tokio::spawn(pipeline.run());
        PipelineHandle {
            commands: commands_tx,
            ready: ready_rx,
            state: state_rx,
            input,
            task,
        }
    }

    #[instrument(
        name = "capture_pipeline",
        skip(self),
        fields(mode = self.config.reprocess.mode.as_str(), capacity = self.config.pairing.capacity)
    )]
    async fn run(mut self) -> PipelineReport {
        info!("capture pipeline started");

        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.on_device_event(event),
                command = self.commands.recv() => match command {
                    Some(PipelineCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
            self.publish();
        }

        self.finish().await
    }

    async fn finish(mut self) -> PipelineReport {
        let action = self.session.request_close(CloseReason::Requested);
        self.apply(action);
        self.publish();

        let deadline = tokio::time::Instant::now() + CLOSE_GRACE;
        while self.session.state() != SessionState::Closed {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => {
                    self.on_device_event(event);
                    self.publish();
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(state = %self.session.state(), "device did not confirm close");
                    break;
                }
            }
        }
        self.dispatcher.reset();

        let mut aggregate = self.dispatcher.stats().clone();
        aggregate.frame_interval_ms = self.intervals.clone();
        let report = PipelineReport {
            summary: aggregate.summary(),
            pairing: self.dispatcher.input_queue().stats(),
            final_state: self.session.state(),
            last_close_reason: self.session.last_close_reason().cloned(),
            sinks: self.fanout.shutdown().await,
        };
        info!(final_state = %report.final_state, "capture pipeline stopped");
        report
    }

    fn on_command(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::Open { camera_id } => {
                let action = self.session.request_open(&camera_id);
                self.apply(action);
            }
            PipelineCommand::SwitchCamera { camera_id } => {
                let action = self.session.switch_camera(&camera_id);
                self.apply(action);
            }
            PipelineCommand::Close => self.close(CloseReason::Requested),
            PipelineCommand::TriggerReprocess { reply } => {
                let result = self.dispatcher.trigger_reprocess(&self.session);
                self.reply(reply, result);
            }
            PipelineCommand::CaptureStill { reply } => {
                let result = self.dispatcher.capture_still(&self.session);
                self.reply(reply, result);
            }
            PipelineCommand::Shutdown => {}
        }
    }

    fn reply(&mut self, reply: Reply, result: Result<RequestId, ContractError>) {
        if matches!(&result, Err(e) if e.is_session_fatal()) {
            self.close(CloseReason::SubmissionFailed);
        }
        if reply.send(result).is_err() {
            debug!("caller went away before reply");
        }
    }

    fn on_device_event(&mut self, event: DeviceEvent) {
        trace!(event = event.name(), state = %self.session.state(), "device event");
        match event {
            DeviceEvent::Opened => {
                let action = self.session.device_opened();
                self.apply(action);
            }
            DeviceEvent::Configured => {
                let action = self.session.session_configured();
                self.apply(action);
            }
            DeviceEvent::Active => {
                let action = self.session.session_became_active();
                self.apply(action);
            }
            DeviceEvent::Disconnected => {
                self.report_unavailable("device disconnected");
                self.close(CloseReason::Disconnected);
            }
            DeviceEvent::Error { code } => {
                self.report_unavailable(&format!("device error {code}"));
                self.close(CloseReason::DeviceError(code));
            }
            DeviceEvent::ConfigureFailed => {
                let error = ContractError::configuration_failed("session configuration rejected");
                error!(error = %error, "session setup failed");
                self.close(CloseReason::ConfigureFailed);
            }
            DeviceEvent::Closed => {
                let was_live = self.session.state().is_live();
                if was_live {
                    self.drain();
                }
                let action = self.session.device_closed();
                self.apply(action);
            }
            DeviceEvent::CaptureStarted {
                request_id,
                kind,
                frame_number,
                ..
            } => self
                .dispatcher
                .on_capture_started(request_id, kind, frame_number),
            DeviceEvent::CaptureCompleted {
                request_id,
                kind,
                metadata,
            } => {
                if kind == contracts::RequestKind::Preview && self.session.accepts_ingest() {
                    self.tick_stats();
                }
                let outcome =
                    self.dispatcher
                        .on_capture_completed(request_id, kind, metadata, &self.session);
                self.after_join(outcome);
                self.deliver_final_images();
            }
            DeviceEvent::CaptureFailed {
                request_id,
                kind,
                frame_number,
                reason,
            } => self
                .dispatcher
                .on_capture_failed(request_id, kind, frame_number, reason),
            DeviceEvent::BufferLost {
                request_id,
                kind,
                frame_number,
                stream,
            } => self
                .dispatcher
                .on_buffer_lost(request_id, kind, frame_number, stream),
            DeviceEvent::ImageAvailable { stream } => self.on_image_available(stream),
        }
    }

    fn report_unavailable(&self, message: &str) {
        if self.session.state() == SessionState::Opening {
            let error = ContractError::device_unavailable(
                self.session.target().unwrap_or_default(),
                message,
            );
            error!(error = %error, "camera open failed");
        } else {
            warn!(state = %self.session.state(), message, "device lost");
        }
    }

    fn on_image_available(&mut self, stream: StreamKind) {
        let Some(buffer) = self.device.acquire_buffer(stream) else {
            trace!(?stream, "image no longer available");
            return;
        };
        match stream {
            StreamKind::Private => {
                let outcome = self.dispatcher.on_buffer_ready(buffer, &self.session);
                self.after_join(outcome);
            }
            StreamKind::Final => {
                self.dispatcher.on_final_buffer(buffer, &self.session);
                self.deliver_final_images();
            }
            StreamKind::Preview => self.release(buffer),
        }
    }

    fn after_join(&mut self, outcome: JoinOutcome) {
        if outcome.formed == 0 {
            return;
        }
        self.pair_seen = true;

        if self.config.reprocess.mode == ReprocessMode::ParallelCapture {
            for _ in 0..outcome.formed {
                match self.dispatcher.trigger_reprocess(&self.session) {
                    Ok(_) => {}
                    Err(e) if e.is_session_fatal() => {
                        self.close(CloseReason::SubmissionFailed);
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "automatic reprocess skipped");
                        break;
                    }
                }
            }
        }
    }

    fn deliver_final_images(&mut self) {
        for image in self.dispatcher.take_final_images() {
            let accepted = self.fanout.deliver(&image);
            debug!(frame_number = image.frame_number, accepted, "final image dispatched");
        }
    }

    fn tick_stats(&mut self) {
        if let Some(summary) = self.stats.record(Instant::now()) {
            metrics::record_frame_interval(&summary);
            self.intervals.push(summary.mean_ms);
        }
    }

    fn close(&mut self, reason: CloseReason) {
        let action = self.session.request_close(reason);
        self.apply(action);
    }

    /// Release everything the session holds
    fn drain(&mut self) {
        let released = self.dispatcher.reset();
        self.pair_seen = false;
        self.stats.reset();
        info!(released, "session drained");
    }

    fn apply(&mut self, action: Option<SessionAction>) {
        let Some(action) = action else {
            return;
        };
        debug!(?action, "session action");
        match action {
            SessionAction::OpenDevice(camera_id) => {
                if let Err(e) = self.device.open_device(&camera_id) {
                    error!(%camera_id, error = %e, "open rejected");
                    self.close(CloseReason::OpenFailed);
                }
            }
            SessionAction::ConfigureSession => {
                let spec = self.config.session_spec();
                if let Err(e) = self.device.configure_session(&spec) {
                    error!(error = %e, "configure rejected");
                    self.close(CloseReason::ConfigureFailed);
                }
            }
            SessionAction::StartRepeating => {
                if self.dispatcher.start_repeating().is_err() {
                    self.close(CloseReason::SubmissionFailed);
                }
            }
            SessionAction::CloseDevice => {
                self.drain();
                self.device.close_device();
            }
        }
    }

    fn release(&self, buffer: BufferHandle) {
        let buffer_id = buffer.id();
        if let Err(e) = self.device.release_buffer(buffer) {
            warn!(%buffer_id, error = %e, "buffer release failed");
        }
    }

    /// Push state and readiness to watchers
    fn publish(&mut self) {
        let state = self.session.state();
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });

        let zsl = self.config.reprocess.enabled
            && self.config.reprocess.mode == ReprocessMode::ZeroShutterLag;
        let ready = if zsl {
            self.session.can_accept_reprocess() && self.pair_seen
        } else {
            self.session.can_accept_capture()
        };
        let changed = self.ready_tx.send_if_modified(|current| {
            let changed = *current != ready;
            *current = ready;
            changed
        });
        if changed {
            info!(ready, "ready state changed");
        }
    }
}

/// Caller side of a running pipeline
pub struct PipelineHandle {
    commands: mpsc::Sender<PipelineCommand>,
    ready: watch::Receiver<bool>,
    state: watch::Receiver<SessionState>,
    input: SharedPairingQueue,
    task: JoinHandle<PipelineReport>,
}

impl PipelineHandle {
    async fn send(&self, command: PipelineCommand) -> Result<(), DispatcherError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DispatcherError::PipelineStopped)
    }

    async fn request(
        &self,
        make: impl FnOnce(Reply) -> PipelineCommand,
    ) -> Result<RequestId, DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        let result = rx.await.map_err(|_| DispatcherError::PipelineStopped)?;
        Ok(result?)
    }

    pub async fn open(&self, camera_id: impl Into<String>) -> Result<(), DispatcherError> {
        self.send(PipelineCommand::Open {
            camera_id: camera_id.into(),
        })
        .await
    }

    pub async fn switch_camera(&self, camera_id: impl Into<String>) -> Result<(), DispatcherError> {
        self.send(PipelineCommand::SwitchCamera {
            camera_id: camera_id.into(),
        })
        .await
    }

    pub async fn close(&self) -> Result<(), DispatcherError> {
        self.send(PipelineCommand::Close).await
    }

    /// Reprocess the oldest retained pair
    pub async fn trigger_reprocess(&self) -> Result<RequestId, DispatcherError> {
        self.request(|reply| PipelineCommand::TriggerReprocess { reply })
            .await
    }

    pub async fn capture_still(&self) -> Result<RequestId, DispatcherError> {
        self.request(|reply| PipelineCommand::CaptureStill { reply })
            .await
    }

    /// Readiness watch: true while a capture trigger would be accepted
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn session_state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Pairs currently retained by the input queue
    pub fn retained_pairs(&self) -> usize {
        self.input.retained_len()
    }

    pub async fn wait_for_state(
        &self,
        target: SessionState,
        timeout: Duration,
    ) -> Result<(), DispatcherError> {
        let mut rx = self.state.clone();
        tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
            .await
            .map_err(|_| DispatcherError::timeout(format!("session state {target}")))?
            .map_err(|_| DispatcherError::PipelineStopped)?;
        Ok(())
    }

    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), DispatcherError> {
        let mut rx = self.ready.clone();
        tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .map_err(|_| DispatcherError::timeout("ready state"))?
            .map_err(|_| DispatcherError::PipelineStopped)?;
        Ok(())
    }

    /// Close the session, stop sinks and collect the report
    #[instrument(name = "pipeline_handle_shutdown", skip(self))]
    pub async fn shutdown(self) -> Result<PipelineReport, DispatcherError> {
        if self.commands.send(PipelineCommand::Shutdown).await.is_err() {
            debug!("pipeline already stopped");
        }
        self.task.await.map_err(|e| {
            error!(error = ?e, "pipeline task failed");
            DispatcherError::PipelineStopped
        })
    }
}
