//! `validate` command implementation.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use contracts::{ExerciserConfig, ReprocessMode};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

impl ValidationResult {
    fn rejected(path: &Path, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            config_path: path.display().to_string(),
            error: Some(error.into()),
            warnings: Vec::new(),
            summary: None,
        }
    }

    fn accepted(path: &Path, config: &ExerciserConfig) -> Self {
        Self {
            valid: true,
            config_path: path.display().to_string(),
            error: None,
            warnings: collect_warnings(config),
            summary: Some(ConfigSummary::from(config)),
        }
    }
}

#[derive(Serialize)]
struct ConfigSummary {
    camera_id: String,
    mode: String,
    reprocess_enabled: bool,
    pairing_capacity: usize,
    stats_window: usize,
    sink_count: usize,
}

impl From<&ExerciserConfig> for ConfigSummary {
    fn from(config: &ExerciserConfig) -> Self {
        Self {
            camera_id: config.device.camera_id.clone(),
            mode: config.reprocess.mode.as_str().to_string(),
            reprocess_enabled: config.reprocess.enabled,
            pairing_capacity: config.pairing.capacity,
            stats_window: config.stats.window,
            sink_count: config.sinks.len(),
        }
    }
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print!("{result}");
    }

    anyhow::ensure!(result.valid, "Configuration validation failed");
    Ok(())
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let path = args.config.as_path();
    if !path.exists() {
        return ValidationResult::rejected(path, format!("File not found: {}", path.display()));
    }

    match config_loader::ConfigLoader::load_from_path(path) {
        Ok(config) => ValidationResult::accepted(path, &config),
        Err(e) => ValidationResult::rejected(path, e.to_string()),
    }
}

/// Non-fatal issues
fn collect_warnings(config: &ExerciserConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.sinks.is_empty() {
        warnings.push("No sinks configured, final images will be discarded".to_string());
    }

    if config.reprocess.mode == ReprocessMode::ZeroShutterLag && config.pairing.capacity > 1 {
        warnings.push(format!(
            "pairing.capacity = {} in zero_shutter_lag mode: shutter uses the oldest retained frame",
            config.pairing.capacity
        ));
    }

    if !config.reprocess.enabled {
        warnings.push("reprocess.enabled = false: stills are captured directly".to_string());
    }

    warnings
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            writeln!(f, "✗ {} is invalid", self.config_path)?;
            if let Some(error) = &self.error {
                writeln!(f, "    {error}")?;
            }
            return Ok(());
        }

        writeln!(f, "✓ {} is valid", self.config_path)?;
        if let Some(s) = &self.summary {
            writeln!(
                f,
                "    camera {} | {} | reprocess {} | pairing capacity {} | stats window {} | {} sink(s)",
                s.camera_id, s.mode, s.reprocess_enabled, s.pairing_capacity, s.stats_window, s.sink_count
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "  ⚠ {warning}")?;
        }
        Ok(())
    }
}
