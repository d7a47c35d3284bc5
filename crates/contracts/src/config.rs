//! ExerciserConfig - Config Loader output
//!
//! Describes the capture device, pairing, reprocess, stats and output routing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{BufferFormat, CaptureRequest, InputSpec, RequestKind, SessionSpec, StreamKind};

/// Complete exerciser configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExerciserConfig {
    /// Capture device settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Metadata/buffer pairing
    #[serde(default)]
    pub pairing: PairingConfig,

    /// Reprocess behaviour
    #[serde(default)]
    pub reprocess: ReprocessConfig,

    /// Frame interval statistics
    #[serde(default)]
    pub stats: StatsConfig,

    /// Pipeline intake
    #[serde(default)]
    pub intake: IntakeConfig,

    /// Final image routing
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Camera identifier
    #[serde(default = "default_camera_id")]
    pub camera_id: String,

    #[serde(default = "default_capture_width")]
    pub capture_width: u32,

    #[serde(default = "default_capture_height")]
    pub capture_height: u32,

    /// Mock device frame pacing
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            camera_id: default_camera_id(),
            capture_width: default_capture_width(),
            capture_height: default_capture_height(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

fn default_camera_id() -> String {
    "0".to_string()
}

fn default_capture_width() -> u32 {
    1920
}

fn default_capture_height() -> u32 {
    1080
}

fn default_frame_interval_ms() -> u64 {
    33 // ~30 fps
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Maximum retained pairs, must be >= 1
    #[serde(default = "default_pairing_capacity")]
    pub capacity: usize,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            capacity: default_pairing_capacity(),
        }
    }
}

fn default_pairing_capacity() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub mode: ReprocessMode,
}

impl Default for ReprocessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ReprocessMode::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Where reprocess input pairs come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprocessMode {
    /// Repeating preview feeds the pairing queue; reprocess is on demand
    #[default]
    ZeroShutterLag,
    /// Still captures feed the pairing queue; reprocess follows immediately
    ParallelCapture,
}

impl ReprocessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZeroShutterLag => "zero_shutter_lag",
            Self::ParallelCapture => "parallel_capture",
        }
    }

    /// Request kind whose completions carry pairing metadata
    pub fn pairing_source(&self) -> RequestKind {
        match self {
            Self::ZeroShutterLag => RequestKind::Preview,
            Self::ParallelCapture => RequestKind::Still,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Intervals per emitted summary, must be >= 2
    #[serde(default = "default_stats_window")]
    pub window: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window: default_stats_window(),
        }
    }
}

fn default_stats_window() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Bounded command queue of the pipeline actor
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
        }
    }
}

fn default_command_capacity() -> usize {
    32
}

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink name
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    16
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log output
    Log,
    /// JPEG file output
    File,
}

impl ExerciserConfig {
    /// Session layout for the configured mode
    ///
    /// The private stream and reprocess input are only configured when
    /// reprocessing is enabled.
    pub fn session_spec(&self) -> SessionSpec {
        let mut outputs = vec![StreamKind::Preview, StreamKind::Final];
        let reprocess_input = if self.reprocess.enabled {
            outputs.push(StreamKind::Private);
            Some(InputSpec {
                width: self.device.capture_width,
                height: self.device.capture_height,
                format: BufferFormat::Private,
            })
        } else {
            None
        };
        SessionSpec {
            outputs,
            reprocess_input,
        }
    }

    /// Repeating request started once the session is configured
    pub fn repeating_request(&self) -> CaptureRequest {
        let targets = match (self.reprocess.mode, self.reprocess.enabled) {
            (ReprocessMode::ZeroShutterLag, true) => vec![StreamKind::Preview, StreamKind::Private],
            _ => vec![StreamKind::Preview],
        };
        CaptureRequest::new(RequestKind::Preview, targets)
    }

    /// One-shot still request
    ///
    /// Only parallel capture routes stills through the private stream; in
    /// zero-shutter-lag mode that stream is fed by the repeating request.
    pub fn still_request(&self) -> CaptureRequest {
        let target = match (self.reprocess.mode, self.reprocess.enabled) {
            (ReprocessMode::ParallelCapture, true) => StreamKind::Private,
            _ => StreamKind::Final,
        };
        CaptureRequest::new(RequestKind::Still, vec![target])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExerciserConfig::default();
        assert_eq!(config.device.camera_id, "0");
        assert_eq!(config.pairing.capacity, 1);
        assert_eq!(config.stats.window, 50);
        assert!(config.reprocess.enabled);
        assert_eq!(config.reprocess.mode, ReprocessMode::ZeroShutterLag);
        assert!(config.sinks.is_empty());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "reprocess": { "mode": "parallel_capture" },
            "sinks": [{ "name": "log", "sink_type": "log" }]
        }"#;
        let config: ExerciserConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.reprocess.mode, ReprocessMode::ParallelCapture);
        assert!(config.reprocess.enabled);
        assert_eq!(config.sinks[0].queue_capacity, 16);
        assert_eq!(config.intake.command_capacity, 32);
    }

    #[test]
    fn test_zsl_session_layout() {
        let config = ExerciserConfig::default();
        let spec = config.session_spec();
        assert!(spec.outputs.contains(&StreamKind::Private));
        assert!(spec.reprocess_input.is_some());

        let repeating = config.repeating_request();
        assert!(repeating.targets(StreamKind::Private));
        assert!(config.still_request().targets(StreamKind::Final));
        assert_eq!(config.reprocess.mode.pairing_source(), RequestKind::Preview);
    }

    #[test]
    fn test_parallel_layout_keeps_preview_private_free() {
        let mut config = ExerciserConfig::default();
        config.reprocess.mode = ReprocessMode::ParallelCapture;
        assert!(!config.repeating_request().targets(StreamKind::Private));
        assert!(config.still_request().targets(StreamKind::Private));
        assert_eq!(config.reprocess.mode.pairing_source(), RequestKind::Still);
    }

    #[test]
    fn test_reprocess_disabled_targets_final() {
        let mut config = ExerciserConfig::default();
        config.reprocess.enabled = false;
        assert!(config.session_spec().reprocess_input.is_none());
        assert!(!config.repeating_request().targets(StreamKind::Private));
        assert!(config.still_request().targets(StreamKind::Final));
    }
}
