//! Custom error types for the backup runner.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No usable transport: neither the AWS SDK nor the AWS CLI is available")]
    NoTransport,

    #[error("Invalid source directory: {}", .0.display())]
    InvalidSource(PathBuf),

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Invalid archive: {}", .0.display())]
    InvalidArchive(PathBuf),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Prune failed: {0}")]
    PruneFailed(String),

    #[error("Notification failed: {0}")]
    NotifyFailed(String),

    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used to decide how a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Bad paths, missing tools, bad configuration. The run aborts before side effects.
    Precondition,
    /// An external process exited non-zero or did not finish in time.
    ToolInvocation,
    /// A remote call failed.
    Transport,
    /// Prune, notify and snapshot failures. Logged, never escalated.
    Advisory,
}

impl BackupError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BackupError::Config(_)
            | BackupError::NoTransport
            | BackupError::InvalidSource(_)
            | BackupError::InvalidArchive(_)
            | BackupError::ToolUnavailable(_) => FailureKind::Precondition,
            BackupError::CompressionFailed(_) | BackupError::Timeout { .. } => {
                FailureKind::ToolInvocation
            }
            BackupError::UploadFailed(_)
            | BackupError::Remote(_)
            | BackupError::Io(_)
            | BackupError::Http(_)
            | BackupError::Serialization(_) => FailureKind::Transport,
            BackupError::PruneFailed(_)
            | BackupError::NotifyFailed(_)
            | BackupError::SnapshotFailed(_) => FailureKind::Advisory,
        }
    }
}

/// Failure of a step whose outcome never changes the run's reported status.
#[derive(Error, Debug)]
#[error("{step} failed: {source}")]
pub struct AdvisoryError {
    pub step: &'static str,
    #[source]
    pub source: BackupError,
}

impl AdvisoryError {
    pub fn new(step: &'static str, source: BackupError) -> Self {
        Self { step, source }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Result of a best-effort step. The caller logs the error and moves on.
pub type Advisory<T> = std::result::Result<T, AdvisoryError>;
