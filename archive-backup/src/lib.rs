//! Archive Backup Library
//!
//! Compresses a directory with 7-Zip, uploads the archive to S3 through the
//! AWS SDK or the AWS CLI, prunes expired archives, alerts over SNS when the
//! upload fails and takes a weekly EC2 image of the host.

pub mod archiver;
pub mod config;
pub mod job;
pub mod notifier;
pub mod orchestrator;
pub mod pruner;
pub mod shutdown;
pub mod snapshot;
pub mod transport;
pub mod uploader;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use orchestrator::{Orchestrator, RunReport, RunState};
pub use utils::errors::{Advisory, AdvisoryError, BackupError, FailureKind};
pub type Result<T> = std::result::Result<T, BackupError>;
