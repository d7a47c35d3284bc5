//! Configuration validation
//!
//! Rules:
//! - camera_id is not empty
//! - capture size and frame interval are non-zero
//! - pairing.capacity >= 1
//! - stats.window >= 2
//! - intake.command_capacity >= 1
//! - sink names are present and unique, queues non-empty

use std::collections::HashSet;

use contracts::{ContractError, ExerciserConfig};

/// Returns the first violation found
pub fn validate(config: &ExerciserConfig) -> Result<(), ContractError> {
    validate_device(config)?;
    validate_pairing(config)?;
    validate_stats(config)?;
    validate_intake(config)?;
    validate_sinks(config)?;
    Ok(())
}

fn validate_device(config: &ExerciserConfig) -> Result<(), ContractError> {
    let device = &config.device;
    if device.camera_id.trim().is_empty() {
        return Err(ContractError::config_validation(
            "device.camera_id",
            "camera_id cannot be empty",
        ));
    }
    if device.capture_width == 0 || device.capture_height == 0 {
        return Err(ContractError::config_validation(
            "device.capture_width / device.capture_height",
            format!(
                "capture size must be non-zero, got {}x{}",
                device.capture_width, device.capture_height
            ),
        ));
    }
    if device.frame_interval_ms == 0 {
        return Err(ContractError::config_validation(
            "device.frame_interval_ms",
            "frame_interval_ms must be > 0",
        ));
    }
    Ok(())
}

fn validate_pairing(config: &ExerciserConfig) -> Result<(), ContractError> {
    if config.pairing.capacity < 1 {
        return Err(ContractError::config_validation(
            "pairing.capacity",
            format!("capacity must be >= 1, got {}", config.pairing.capacity),
        ));
    }
    Ok(())
}

fn validate_stats(config: &ExerciserConfig) -> Result<(), ContractError> {
    // Sample standard deviation needs two intervals
    if config.stats.window < 2 {
        return Err(ContractError::config_validation(
            "stats.window",
            format!("window must be >= 2, got {}", config.stats.window),
        ));
    }
    Ok(())
}

fn validate_intake(config: &ExerciserConfig) -> Result<(), ContractError> {
    if config.intake.command_capacity < 1 {
        return Err(ContractError::config_validation(
            "intake.command_capacity",
            "command_capacity must be >= 1",
        ));
    }
    Ok(())
}

fn validate_sinks(config: &ExerciserConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in config.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks[{}].queue_capacity", sink.name),
                "queue_capacity must be >= 1",
            ));
        }
    }
    Ok(())
}
