//! `run` command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::ExerciserConfig;
use device::MockDeviceConfig;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Exerciser, ExerciserSettings};

/// Execute the `run` command
pub async fn run_exerciser(args: &RunArgs) -> Result<()> {
    let config = load_config(args)?;

    info!(
        camera_id = %config.device.camera_id,
        mode = config.reprocess.mode.as_str(),
        reprocess = config.reprocess.enabled,
        capacity = config.pairing.capacity,
        sinks = config.sinks.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    if config.sinks.is_empty() {
        warn!("No sinks configured - final images will be discarded");
    }

    let device = MockDeviceConfig {
        frame_interval: Duration::from_millis(config.device.frame_interval_ms),
        fail_open: args.fail_open,
        fail_configure: args.fail_configure,
        drop_buffer_every: args.drop_buffer_every,
        ..Default::default()
    };

    let settings = ExerciserSettings {
        config,
        device,
        shots: args.shots,
        interval: Duration::from_millis(args.interval_ms),
        settle: Duration::from_millis(args.settle_ms),
        ready_timeout: Duration::from_secs(args.ready_timeout),
        metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
    };

    info!(shots = args.shots, interval_ms = args.interval_ms, "Starting capture run...");
    let summary = Exerciser::new(settings)
        .run(shutdown_signal())
        .await
        .context("Capture run failed")?;

    summary.print_summary();

    if !summary.ledger.is_balanced() {
        return Err(CliError::ledger_unbalanced(&summary.ledger).into());
    }
    if !summary.ready && !summary.interrupted {
        return Err(CliError::session_not_ready(args.ready_timeout, summary.report.final_state).into());
    }

    info!("zsl-exerciser finished");
    Ok(())
}

/// Load the file (or defaults), apply CLI overrides, validate
fn load_config(args: &RunArgs) -> Result<ExerciserConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()));
            }
            info!(config = %path.display(), "Loading configuration");
            ConfigLoader::load_from_path(path)?
        }
        None => {
            info!("No configuration file given, using defaults");
            ExerciserConfig::default()
        }
    };

    if let Some(camera) = &args.camera {
        info!(camera_id = %camera, "Overriding camera from CLI");
        config.device.camera_id = camera.clone();
    }
    if let Some(mode) = args.mode {
        config.reprocess.mode = mode.into();
    }
    if let Some(capacity) = args.capacity {
        config.pairing.capacity = capacity;
    }
    if args.no_reprocess {
        config.reprocess.enabled = false;
    }

    ConfigLoader::validate(&config)?;
    Ok(config)
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("Received shutdown signal, stopping capture run...");
}

fn print_config_summary(config: &ExerciserConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Device:");
    println!("  Camera: {}", config.device.camera_id);
    println!(
        "  Capture size: {}x{}",
        config.device.capture_width, config.device.capture_height
    );
    println!("  Frame interval: {} ms", config.device.frame_interval_ms);
    println!("\nReprocess:");
    println!("  Enabled: {}", config.reprocess.enabled);
    println!("  Mode: {}", config.reprocess.mode.as_str());
    println!("  Pairing capacity: {}", config.pairing.capacity);
    println!("  Stats window: {}", config.stats.window);

    if !config.sinks.is_empty() {
        println!("\nSinks ({}):", config.sinks.len());
        for sink in &config.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["zsl-exerciser", "run"];
        full.extend_from_slice(argv);
        match crate::cli::Cli::parse_from(full).command {
            crate::cli::Commands::Run(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_overrides_apply() {
        let config = load_config(&run_args(&[
            "--camera",
            "2",
            "--mode",
            "parallel",
            "--capacity",
            "2",
            "--no-reprocess",
        ]))
        .unwrap();
        assert_eq!(config.device.camera_id, "2");
        assert_eq!(config.reprocess.mode, contracts::ReprocessMode::ParallelCapture);
        assert_eq!(config.pairing.capacity, 2);
        assert!(!config.reprocess.enabled);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let err = load_config(&run_args(&["--capacity", "0"])).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config(&run_args(&["--config", "/nonexistent/zsl.toml"])).unwrap_err();
        assert!(matches!(err, CliError::ConfigNotFound { .. }));
    }
}
