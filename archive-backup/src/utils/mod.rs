//! Utility modules for the backup runner.

pub mod errors;
pub mod format;
pub mod logger;
pub mod process;

pub use errors::{Advisory, AdvisoryError, BackupError, FailureKind, Result};
