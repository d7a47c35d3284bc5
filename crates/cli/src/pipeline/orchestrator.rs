//! Exerciser orchestrator - opens the session, presses the shutter, tears down.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{ExerciserConfig, ReprocessMode};
use device::{MockDevice, MockDeviceConfig};
use dispatcher::{CapturePipeline, PipelineHandle};
use tracing::{error, info, warn};

use super::{RunSummary, ShotCounts};

/// Run parameters
#[derive(Debug, Clone)]
pub struct ExerciserSettings {
    pub config: ExerciserConfig,
    pub device: MockDeviceConfig,
    /// Shutter presses to issue once ready
    pub shots: u32,
    pub interval: Duration,
    /// Grace period for in-flight captures after the last shot
    pub settle: Duration,
    pub ready_timeout: Duration,
    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

pub struct Exerciser {
    settings: ExerciserSettings,
}

impl Exerciser {
    pub fn new(settings: ExerciserSettings) -> Self {
        Self { settings }
    }

    /// Run to completion or until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<RunSummary> {
        let start_time = Instant::now();
        let settings = &self.settings;

        if let Some(port) = settings.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let device = Arc::new(MockDevice::new(settings.device.clone()));
        let handle = CapturePipeline::from_config(settings.config.clone(), device.clone())
            .await
            .context("Failed to start capture pipeline")?;

        let camera_id = settings.config.device.camera_id.clone();
        info!(
            camera_id = %camera_id,
            mode = settings.config.reprocess.mode.as_str(),
            reprocess = settings.config.reprocess.enabled,
            capacity = settings.config.pairing.capacity,
            "Opening camera"
        );
        handle
            .open(camera_id)
            .await
            .context("Failed to request camera open")?;

        tokio::pin!(shutdown);
        let mut interrupted = false;

        let ready = tokio::select! {
            result = handle.wait_until_ready(settings.ready_timeout) => result.is_ok(),
            _ = &mut shutdown => {
                warn!("Interrupted while waiting for the session");
                interrupted = true;
                false
            }
        };

        let mut shots = ShotCounts::default();
        if ready {
            info!(state = %handle.session_state(), retained = handle.retained_pairs(), "Session ready");
            interrupted = self.press_shutter(&handle, &mut shutdown, &mut shots).await;
            if !interrupted {
                tokio::select! {
                    _ = tokio::time::sleep(settings.settle) => {}
                    _ = &mut shutdown => interrupted = true,
                }
            }
        } else if !interrupted {
            warn!(state = %handle.session_state(), "Session never became ready");
        }

        info!("Shutting down capture pipeline...");
        let report = handle
            .shutdown()
            .await
            .context("Capture pipeline shutdown failed")?;
        let ledger = device.ledger().report();

        let summary = RunSummary {
            ready,
            interrupted,
            shots,
            report,
            ledger,
            duration: start_time.elapsed(),
        };
        info!(
            duration_secs = summary.duration.as_secs_f64(),
            final_images = summary.report.summary.final_images,
            balanced = summary.ledger.is_balanced(),
            "Capture run complete"
        );
        Ok(summary)
    }

    /// Returns true when interrupted
    async fn press_shutter<F: Future<Output = ()>>(
        &self,
        handle: &PipelineHandle,
        shutdown: &mut Pin<&mut F>,
        counts: &mut ShotCounts,
    ) -> bool {
        let settings = &self.settings;
        let reprocess_on_shutter = settings.config.reprocess.enabled
            && settings.config.reprocess.mode == ReprocessMode::ZeroShutterLag;

        for shot in 1..=settings.shots {
            let result = if reprocess_on_shutter {
                handle.trigger_reprocess().await
            } else {
                handle.capture_still().await
            };

            match result {
                Ok(request_id) => {
                    counts.accepted += 1;
                    info!(shot, %request_id, "Shutter accepted");
                }
                Err(e) if e.is_not_ready() => {
                    counts.not_ready += 1;
                    warn!(shot, error = %e, "Shutter ignored");
                }
                Err(e) => {
                    counts.failed += 1;
                    error!(shot, error = %e, "Shutter failed, session closed");
                    break;
                }
            }

            if shot < settings.shots {
                tokio::select! {
                    _ = tokio::time::sleep(settings.interval) => {}
                    _ = &mut *shutdown => {
                        warn!(shot, "Interrupted between shots");
                        return true;
                    }
                }
            }
        }
        false
    }
}
