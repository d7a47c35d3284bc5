//! Session lifecycle state machine.
//!
//! Transitions are driven by caller requests (`request_open`,
//! `switch_camera`, `request_close`) and device confirmations
//! (`device_opened`, `session_configured`, `session_became_active`,
//! `device_closed`). Each method returns the side effect the caller must
//! perform next, if any. Events that do not fit the current state are logged
//! and ignored so late device callbacks can never resurrect a closed session.

use contracts::{CloseReason, SessionState};
use observability::metrics;
use tracing::{debug, info, instrument, warn};

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open the device with this camera id
    OpenDevice(String),
    /// Configure the capture session
    ConfigureSession,
    /// Submit the repeating preview request
    StartRepeating,
    /// Drain retained buffers, then close the device
    CloseDevice,
}

/// Capture session state machine
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    target: Option<String>,
    pending_reopen: Option<String>,
    reprocessing_enabled: bool,
    last_close_reason: Option<CloseReason>,
    transitions: u64,
}

impl SessionStateMachine {
    pub fn new(reprocessing_enabled: bool) -> Self {
        Self {
            state: SessionState::Closed,
            target: None,
            pending_reopen: None,
            reprocessing_enabled,
            last_close_reason: None,
            transitions: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Camera id of the current (or last) session
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Camera id to open once the current close completes
    pub fn pending_reopen(&self) -> Option<&str> {
        self.pending_reopen.as_deref()
    }

    pub fn last_close_reason(&self) -> Option<&CloseReason> {
        self.last_close_reason.as_ref()
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn is_reprocessing_enabled(&self) -> bool {
        self.reprocessing_enabled
    }

    pub fn can_accept_capture(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn can_accept_reprocess(&self) -> bool {
        self.state == SessionState::Active && self.reprocessing_enabled
    }

    /// Whether arriving frames may enter the pairing queue
    ///
    /// Ready is included: the repeating request may deliver its first frames
    /// before the active confirmation.
    pub fn accepts_ingest(&self) -> bool {
        matches!(self.state, SessionState::Ready | SessionState::Active)
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        self.state = to;
        self.transitions += 1;
        metrics::record_session_transition(to);
        info!(%from, %to, camera_id = ?self.target, "session state transition");
    }

    fn anomaly(&self, event: &'static str) {
        warn!(state = %self.state, event, "unexpected session event ignored");
    }

    /// Open `camera_id`; only honoured from Closed, or remembered while Closing
    #[instrument(name = "session_request_open", skip(self), fields(state = %self.state))]
    pub fn request_open(&mut self, camera_id: &str) -> Option<SessionAction> {
        match self.state {
            SessionState::Closed => {
                self.target = Some(camera_id.to_string());
                self.transition(SessionState::Opening);
                Some(SessionAction::OpenDevice(camera_id.to_string()))
            }
            SessionState::Closing => {
                self.set_pending_reopen(camera_id);
                None
            }
            _ => {
                warn!(state = %self.state, camera_id, "open requested while session live, ignored");
                None
            }
        }
    }

    /// Close the live session (if any) and reopen with `camera_id`
    #[instrument(name = "session_switch_camera", skip(self), fields(state = %self.state))]
    pub fn switch_camera(&mut self, camera_id: &str) -> Option<SessionAction> {
        match self.state {
            SessionState::Closed => self.request_open(camera_id),
            SessionState::Closing => {
                self.set_pending_reopen(camera_id);
                None
            }
            _ if self.target.as_deref() == Some(camera_id) => {
                debug!(camera_id, "camera already selected");
                None
            }
            _ => {
                self.set_pending_reopen(camera_id);
                self.enter_closing(CloseReason::Requested)
            }
        }
    }

    fn set_pending_reopen(&mut self, camera_id: &str) {
        if let Some(previous) = self.pending_reopen.replace(camera_id.to_string()) {
            debug!(superseded = %previous, camera_id, "pending reopen replaced");
        }
    }

    pub fn device_opened(&mut self) -> Option<SessionAction> {
        if self.state != SessionState::Opening {
            self.anomaly("device_opened");
            return None;
        }
        self.transition(SessionState::Configuring);
        Some(SessionAction::ConfigureSession)
    }

    pub fn session_configured(&mut self) -> Option<SessionAction> {
        if self.state != SessionState::Configuring {
            self.anomaly("session_configured");
            return None;
        }
        self.transition(SessionState::Ready);
        Some(SessionAction::StartRepeating)
    }

    pub fn session_became_active(&mut self) -> Option<SessionAction> {
        if self.state != SessionState::Ready {
            self.anomaly("session_became_active");
            return None;
        }
        self.transition(SessionState::Active);
        None
    }

    /// Close for any reason; a caller request also cancels a pending reopen
    #[instrument(name = "session_request_close", skip(self, reason), fields(state = %self.state, %reason))]
    pub fn request_close(&mut self, reason: CloseReason) -> Option<SessionAction> {
        if reason == CloseReason::Requested {
            if let Some(cancelled) = self.pending_reopen.take() {
                debug!(camera_id = %cancelled, "pending reopen cancelled");
            }
        }
        self.enter_closing(reason)
    }

    fn enter_closing(&mut self, reason: CloseReason) -> Option<SessionAction> {
        match self.state {
            SessionState::Closed => {
                debug!(%reason, "close ignored, session already closed");
                None
            }
            SessionState::Closing => {
                debug!(%reason, "close already in progress");
                None
            }
            _ => {
                self.last_close_reason = Some(reason);
                self.transition(SessionState::Closing);
                Some(SessionAction::CloseDevice)
            }
        }
    }

    /// Device confirmed the close; reopens if a switch is pending
    pub fn device_closed(&mut self) -> Option<SessionAction> {
        match self.state {
            SessionState::Closing => {}
            SessionState::Closed => {
                debug!("duplicate close confirmation ignored");
                return None;
            }
            _ => {
                warn!(state = %self.state, "device closed without a close request");
            }
        }

        match self.pending_reopen.take() {
            Some(camera_id) => {
                self.target = Some(camera_id.clone());
                self.transition(SessionState::Opening);
                Some(SessionAction::OpenDevice(camera_id))
            }
            None => {
                self.transition(SessionState::Closed);
                None
            }
        }
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new(true)
    }
}
