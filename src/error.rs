//! Error handling module for the installer
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Only hard-fatal conditions travel as errors: a failed command the operator
//! chose to continue past is a `CommandOutcome`, not an error.

use std::path::PathBuf;
use thiserror::Error;

/// Exit status when the operator aborts or the privilege check fails.
pub const EXIT_ABORTED: u8 = 1;

/// Exit status when the Disk-Readiness Guard rejects a build directory.
pub const EXIT_DISK_NOT_READY: u8 = 2;

/// Main error type for the installer
#[derive(Error, Debug)]
pub enum InstallerError {
    /// IO errors (file writes, terminal reads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operator answered "no" to "Continue anyway?"
    #[error("Installation aborted by operator after `{operation}` failed")]
    Aborted { operation: String },

    /// The build area is volatile, missing, or too small
    #[error("Disk not ready at {}: {reason}", path.display())]
    DiskNotReady { path: PathBuf, reason: String },

    /// Not running with root privileges
    #[error("Root privileges required")]
    NotPrivileged,

    /// Required live-system binaries are not installed
    #[error("Missing required tools: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    /// Operator input stream ended while a question was pending
    #[error("Console input closed while waiting for an answer")]
    ConsoleClosed,

    /// Listing or artifact fetch failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Installation state invariant violated
    #[error("State error: {0}")]
    State(#[from] crate::install_state::StateError),

    /// Stage registry failed its dependency audit
    #[error("Registry error: {0}")]
    Registry(#[from] crate::pipeline::RegistryError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for installer operations
pub type Result<T> = std::result::Result<T, InstallerError>;

impl InstallerError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create an abort error for the given operation
    pub fn aborted(operation: impl Into<String>) -> Self {
        Self::Aborted {
            operation: operation.into(),
        }
    }

    /// Create a disk readiness error
    pub fn disk_not_ready(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DiskNotReady {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::DiskNotReady { .. } => EXIT_DISK_NOT_READY,
            _ => EXIT_ABORTED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InstallerError::config("mount_root must be absolute");
        assert_eq!(
            err.to_string(),
            "Configuration error: mount_root must be absolute"
        );

        let err = InstallerError::aborted("mkfs.ext4 /dev/sda2");
        assert!(err.to_string().contains("mkfs.ext4 /dev/sda2"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: InstallerError = io_err.into();
        assert!(matches!(err, InstallerError::Io(_)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(InstallerError::aborted("x").exit_code(), EXIT_ABORTED);
        assert_eq!(InstallerError::NotPrivileged.exit_code(), EXIT_ABORTED);
        assert_eq!(
            InstallerError::disk_not_ready("/var/tmp", "tmpfs").exit_code(),
            EXIT_DISK_NOT_READY
        );
    }
}
