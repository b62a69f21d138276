//! Unified error handling for bmcfan
//!
//! A single error type shared by the controller library, the daemon and the
//! operator CLI. Transient platform-management failures and fatal host
//! misconfiguration are both expressed here; callers decide which is which.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias using BmcfanError
pub type Result<T> = std::result::Result<T, BmcfanError>;

/// Unified error type for all bmcfan operations
#[derive(thiserror::Error, Debug)]
pub enum BmcfanError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Platform Management Command Errors
    // ============================================================================
    #[error("Failed to spawn {program}: {source}")]
    CommandSpawn {
        program: String,
        source: io::Error,
    },

    #[error("Command `{command}` timed out after {timeout:?}")]
    CommandTimeout {
        command: String,
        timeout: Duration,
    },

    #[error("Command `{command}` exited with status {code:?}: {stderr}")]
    CommandStatus {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command `{command}` failed after {attempts} attempt(s): {last_error}")]
    CommandFailed {
        command: String,
        attempts: u32,
        last_error: String,
    },

    // ============================================================================
    // Sensor Errors
    // ============================================================================
    #[error("Sensor fetch failed: {0}")]
    SensorFetch(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    // ============================================================================
    // Process Control Errors
    // ============================================================================
    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: io::Error,
    },

    #[error("{0}")]
    Generic(String),
}

impl BmcfanError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create an invalid configuration field error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<String> for BmcfanError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

impl From<&str> for BmcfanError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
