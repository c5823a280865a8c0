//! Error types for the test robot
//!
//! Command and test failures are not errors: they travel through the
//! progress stream. The variants here cover control calls, loading and
//! collaborator faults.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test robot
#[derive(Error, Debug)]
pub enum Error {
    // === Run Control Errors ===
    #[error("Cannot {action} while sequencer is {state}")]
    InvalidState { action: String, state: String },

    #[error("No tests selected. Load a test file with at least one test first")]
    EmptySelection,

    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    #[error("{failed} of {total} test runs failed")]
    TestsFailed { failed: u32, total: u32 },

    #[error("Run stopped before all tests completed")]
    RunStopped,

    // === Test Definition Errors ===
    #[error("Failed to load test definitions: {0}")]
    Definition(String),

    #[error("Invalid command '{line}': {reason}")]
    InvalidCommand { line: String, reason: String },

    // === Transport Errors ===
    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport closed by remote endpoint")]
    TransportClosed,

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    // === Capture Errors ===
    #[error("Capture relay error: {0}")]
    Capture(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid settings file: {0}")]
    SettingsParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create an invalid command error
    pub fn invalid_command(line: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a file read error for a path
    pub fn file_read(path: &std::path::Path, error: &io::Error) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }
}
