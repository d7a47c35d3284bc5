//! # Config Loader
//!
//! Loads the exerciser configuration.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Fill omitted sections with defaults
//! - Validate configuration legality
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("zsl.toml")).unwrap();
//! println!("Camera: {}", config.device.camera_id);
//! ```

mod parser;
mod validator;

pub use contracts::ExerciserConfig;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// The format is taken from the file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<ExerciserConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<ExerciserConfig, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Validate an already built configuration
    pub fn validate(config: &ExerciserConfig) -> Result<(), ContractError> {
        validator::validate(config)
    }

    pub fn to_toml(config: &ExerciserConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(config: &ExerciserConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<ExerciserConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ReprocessMode, SinkType};

    const ZSL_TOML: &str = r#"
[device]
camera_id = "1"
frame_interval_ms = 16

[pairing]
capacity = 2

[reprocess]
enabled = true
mode = "zero_shutter_lag"

[stats]
window = 30

[[sinks]]
name = "jpeg_out"
sink_type = "file"
[sinks.params]
base_path = "./captures"
manifest = "true"

[[sinks]]
name = "log"
sink_type = "log"
"#;

    #[test]
    fn test_load_from_str_toml() {
        let config = ConfigLoader::load_from_str(ZSL_TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(config.device.camera_id, "1");
        assert_eq!(config.pairing.capacity, 2);
        assert_eq!(config.reprocess.mode, ReprocessMode::ZeroShutterLag);
        assert_eq!(config.stats.window, 30);
        assert_eq!(config.sinks.len(), 2);
        assert_eq!(config.sinks[0].sink_type, SinkType::File);
        assert_eq!(config.sinks[0].params["base_path"], "./captures");
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = ConfigLoader::load_from_str("", ConfigFormat::Toml).unwrap();
        assert_eq!(config.pairing.capacity, 1);
        assert!(config.sinks.is_empty());
    }

    #[test]
    fn test_round_trip_toml() {
        let config = ConfigLoader::load_from_str(ZSL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&config).unwrap();
        let again = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(again.device.camera_id, config.device.camera_id);
        assert_eq!(again.sinks.len(), config.sinks.len());
    }

    #[test]
    fn test_round_trip_json() {
        let config = ConfigLoader::load_from_str(ZSL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let again = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(again.stats.window, 30);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[pairing]
capacity = 0
"#;
        let err = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, ContractError::ConfigValidation { .. }));
        assert!(err.to_string().contains("pairing.capacity"));
    }

    #[test]
    fn test_load_from_path_rejects_unknown_extension() {
        let err = ConfigLoader::load_from_path(Path::new("zsl.yaml")).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn test_load_from_missing_file_is_io_error() {
        let err = ConfigLoader::load_from_path(Path::new("/nonexistent/zsl.toml")).unwrap_err();
        assert!(matches!(err, ContractError::Io(_)));
    }
}
