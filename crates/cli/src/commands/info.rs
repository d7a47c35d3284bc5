//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{ExerciserConfig, RequestKind, StreamKind};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    camera_id: String,
    capture_size: (u32, u32),
    frame_interval_ms: u64,
    mode: String,
    reprocess_enabled: bool,
    pairing_capacity: usize,
    stats_window: usize,
    session: SessionLayout,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

/// Streams and request targets derived from the mode
#[derive(Serialize)]
struct SessionLayout {
    outputs: Vec<StreamKind>,
    reprocess_input: bool,
    repeating_targets: Vec<StreamKind>,
    still_targets: Vec<StreamKind>,
    pairing_source: RequestKind,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&config, args);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(config: &ExerciserConfig, args: &InfoArgs) -> ConfigInfo {
    let spec = config.session_spec();
    let sinks = if args.sinks {
        config
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        camera_id: config.device.camera_id.clone(),
        capture_size: (config.device.capture_width, config.device.capture_height),
        frame_interval_ms: config.device.frame_interval_ms,
        mode: config.reprocess.mode.as_str().to_string(),
        reprocess_enabled: config.reprocess.enabled,
        pairing_capacity: config.pairing.capacity,
        stats_window: config.stats.window,
        session: SessionLayout {
            outputs: spec.outputs,
            reprocess_input: spec.reprocess_input.is_some(),
            repeating_targets: config.repeating_request().targets,
            still_targets: config.still_request().targets,
            pairing_source: config.reprocess.mode.pairing_source(),
        },
        sinks,
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  ZSL Exerciser Configuration                 ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📷 Camera");
    println!("   ├─ Id: {}", info.camera_id);
    println!("   ├─ Capture size: {}x{}", info.capture_size.0, info.capture_size.1);
    println!("   └─ Frame interval: {} ms", info.frame_interval_ms);

    println!("\n⚙️  Reprocess");
    println!("   ├─ Mode: {}", info.mode);
    println!("   ├─ Enabled: {}", info.reprocess_enabled);
    println!("   ├─ Pairing capacity: {}", info.pairing_capacity);
    println!("   └─ Stats window: {}", info.stats_window);

    let session = &info.session;
    println!("\n🔀 Session Layout");
    println!("   ├─ Outputs: {:?}", session.outputs);
    println!("   ├─ Reprocess input: {}", session.reprocess_input);
    println!("   ├─ Repeating targets: {:?}", session.repeating_targets);
    println!("   ├─ Still targets: {:?}", session.still_targets);
    println!("   └─ Pairs fed by: {}", session.pairing_source);

    if !info.sinks.is_empty() {
        println!("\n📤 Sinks ({})", info.sinks.len());
        for (i, sink) in info.sinks.iter().enumerate() {
            let prefix = if i == info.sinks.len() - 1 { "└─" } else { "├─" };
            println!(
                "   {} {} ({}, queue {})",
                prefix, sink.name, sink.sink_type, sink.queue_capacity
            );
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ReprocessMode;
    use std::path::PathBuf;

    fn args() -> InfoArgs {
        InfoArgs {
            config: PathBuf::from("zsl.toml"),
            json: true,
            sinks: true,
        }
    }

    #[test]
    fn test_zsl_layout() {
        let info = build_config_info(&ExerciserConfig::default(), &args());
        assert!(info.session.reprocess_input);
        assert!(info.session.repeating_targets.contains(&StreamKind::Private));
        assert_eq!(info.session.pairing_source, RequestKind::Preview);
    }

    #[test]
    fn test_parallel_layout_json() {
        let mut config = ExerciserConfig::default();
        config.reprocess.mode = ReprocessMode::ParallelCapture;
        let info = build_config_info(&config, &args());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["session"]["still_targets"][0], "private");
        assert_eq!(json["session"]["pairing_source"], "still");
    }
}
