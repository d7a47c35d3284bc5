//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::ReprocessMode;
use std::path::PathBuf;

/// ZSL Exerciser - zero-shutter-lag capture pipeline against a mock camera
#[derive(Parser, Debug)]
#[command(
    name = "zsl-exerciser",
    author,
    version,
    about = "Zero-shutter-lag capture exerciser",
    long_about = "Opens a mock camera, keeps the most recent preview frames paired with \n\
                  their private buffers, and reprocesses them into JPEG stills on demand.\n\n\
                  Every run ends with a buffer ledger showing that each buffer taken \n\
                  from the device was given back exactly once."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "ZSL_EXERCISER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "ZSL_EXERCISER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a capture session against the mock device
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when omitted
    #[arg(short, long, env = "ZSL_EXERCISER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the camera to open
    #[arg(long, env = "ZSL_EXERCISER_CAMERA")]
    pub camera: Option<String>,

    /// Override the capture mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Override pairing capacity
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Disable reprocessing (stills go straight to the JPEG stream)
    #[arg(long)]
    pub no_reprocess: bool,

    /// Number of shutter presses
    #[arg(long, default_value = "3", env = "ZSL_EXERCISER_SHOTS")]
    pub shots: u32,

    /// Delay between shutter presses in milliseconds
    #[arg(long, default_value = "200")]
    pub interval_ms: u64,

    /// Time to let in-flight captures finish after the last shot
    #[arg(long, default_value = "500")]
    pub settle_ms: u64,

    /// Seconds to wait for the session to become ready
    #[arg(long, default_value = "5")]
    pub ready_timeout: u64,

    /// Lose the private buffer of every Nth preview frame
    #[arg(long)]
    pub drop_buffer_every: Option<u64>,

    /// Make the device fail to open with this error code
    #[arg(long)]
    pub fail_open: Option<i32>,

    /// Make session configuration fail
    #[arg(long)]
    pub fail_configure: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "ZSL_EXERCISER_METRICS_PORT")]
    pub metrics_port: u16,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "zsl.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "zsl.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Capture mode
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ModeArg {
    /// Reprocess the newest preview frame on shutter
    Zsl,
    /// Issue a still capture and reprocess it when it pairs
    Parallel,
}

impl From<ModeArg> for ReprocessMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Zsl => ReprocessMode::ZeroShutterLag,
            ModeArg::Parallel => ReprocessMode::ParallelCapture,
        }
    }
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "zsl-exerciser",
            "-v",
            "run",
            "--mode",
            "parallel",
            "--shots",
            "5",
            "--capacity",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.shots, 5);
        assert_eq!(args.capacity, Some(2));
        assert!(matches!(args.mode, Some(ModeArg::Parallel)));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["zsl-exerciser", "-q", "-v", "info"]);
        assert!(result.is_err());
    }
}
