// src/error.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the installer core.
#[derive(Error, Debug)]
pub enum Error {
    /// XML or SQLite metadata could not be parsed, or a required field is
    /// missing. Aborts the current backend load; the repository tries the
    /// next backend in priority order.
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    /// No advertised backend matched the repository metadata, or every
    /// candidate failed to load.
    #[error("no usable backend for repository {0}")]
    NoBackend(String),

    /// A requirement has no provider in any configured repository.
    #[error("no provider for {0}")]
    NoProvider(String),

    /// A requirement carries a flag outside the EQ/LT/GT/LE/GE set.
    #[error("malformed requirement: {0}")]
    MalformedRequirement(String),

    /// The install planner produced an empty plan even though the user
    /// named packages that are not already installed.
    #[error("no packages to install")]
    NoPackagesToInstall,

    /// An explicitly requested package is installed at a different
    /// version or release; installing over it is refused.
    #[error("refusing to overwrite installed {installed} with {requested}")]
    InstallConflict { installed: String, requested: String },

    /// A downloaded artifact failed the driver's integrity check after a
    /// re-download attempt.
    #[error("integrity check failed for {}", .0.display())]
    IntegrityFailure(PathBuf),

    /// The external RPM tool exited non-zero.
    #[error("rpm exited with status {status}: {stderr}")]
    DriverFailed { status: i32, stderr: String },

    /// A downloaded file does not match its advertised checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Missing or unreadable repository configuration.
    #[error("config error: {0}")]
    ConfigError(String),

    /// An interrupt was observed; the run is being torn down.
    #[error("interrupted")]
    Cancelled,

    #[error("download error: {0}")]
    DownloadError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::MalformedMetadata(format!("sqlite: {e}"))
    }
}
