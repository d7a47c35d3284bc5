//! ZSL Walkthrough
//!
//! Opens the mock camera, presses the shutter a few times, switches to a
//! second camera and presses again, then prints the run report and the
//! buffer ledger.
//!
//! Run with: cargo run -p zsl_demos -- demos/zsl.toml

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config_loader::ConfigLoader;
use contracts::{ExerciserConfig, SinkConfig, SinkType};
use device::{MockDevice, MockDeviceConfig};
use dispatcher::CapturePipeline;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!(path = %path, "Loading config");
            ConfigLoader::load_from_path(Path::new(&path))?
        }
        None => default_config(),
    };

    let device = Arc::new(MockDevice::new(MockDeviceConfig {
        frame_interval: Duration::from_millis(config.device.frame_interval_ms),
        ..Default::default()
    }));
    let handle = CapturePipeline::from_config(config.clone(), device.clone()).await?;

    // ==== Stage 1: open and wait for the first retained pair ====
    handle.open(config.device.camera_id.clone()).await?;
    handle.wait_until_ready(WAIT).await?;
    tracing::info!(retained = handle.retained_pairs(), "Camera ready");

    // ==== Stage 2: shutter ====
    shutter(&handle, &config, 3).await;

    // ==== Stage 3: switch camera and shoot again ====
    handle.switch_camera("1").await?;
    handle.wait_until_ready(WAIT).await?;
    tracing::info!(camera_id = ?device.camera_id(), "Switched camera");
    shutter(&handle, &config, 2).await;

    // ==== Stage 4: teardown ====
    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = handle.shutdown().await?;
    println!("{report}");
    println!("Ledger: {}", device.ledger().report());

    Ok(())
}

async fn shutter(handle: &dispatcher::PipelineHandle, config: &ExerciserConfig, shots: u32) {
    for shot in 1..=shots {
        let result = match config.reprocess.mode {
            contracts::ReprocessMode::ZeroShutterLag if config.reprocess.enabled => {
                handle.trigger_reprocess().await
            }
            _ => handle.capture_still().await,
        };
        match result {
            Ok(request_id) => tracing::info!(shot, %request_id, "Shutter accepted"),
            Err(e) => tracing::warn!(shot, error = %e, "Shutter not accepted"),
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
}

fn default_config() -> ExerciserConfig {
    ExerciserConfig {
        sinks: vec![SinkConfig {
            name: "log".into(),
            sink_type: SinkType::Log,
            queue_capacity: 16,
            params: Default::default(),
        }],
        ..Default::default()
    }
}
