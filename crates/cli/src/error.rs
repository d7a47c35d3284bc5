//! Error types for CLI operations.

use contracts::{ContractError, SessionState};
use dispatcher::DispatcherError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration failed to load or validate
    #[error(transparent)]
    Config(#[from] ContractError),

    /// The session never became ready
    #[error("Camera session not ready after {waited_secs}s (state: {state})")]
    SessionNotReady { waited_secs: u64, state: SessionState },

    /// Pipeline failure
    #[error(transparent)]
    Pipeline(#[from] DispatcherError),

    /// Buffers were leaked or returned twice
    #[error("Buffer ledger unbalanced: {report}")]
    LedgerUnbalanced { report: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn session_not_ready(waited_secs: u64, state: SessionState) -> Self {
        Self::SessionNotReady { waited_secs, state }
    }

    pub fn ledger_unbalanced(report: impl ToString) -> Self {
        Self::LedgerUnbalanced {
            report: report.to_string(),
        }
    }
}
