//! Configuration management for the backup runner.
//!
//! Loads configuration from a TOML file; command-line flags override
//! individual fields before the run starts.

use crate::job::Target;
use crate::utils::errors::{BackupError, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Destination shipped in the default config. Runs against it are refused.
pub const PLACEHOLDER_DESTINATION: &str = "s3://my-backup-bucket";

/// Bucket named by [`PLACEHOLDER_DESTINATION`], refused in any spelling
const PLACEHOLDER_BUCKET: &str = "my-backup-bucket";

pub const DEFAULT_NOTIFY_SUBJECT: &str = "Unknown error, please check logs.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub backup: BackupConfig,
    /// 7-Zip executable
    #[serde(default = "default_archiver_tool")]
    pub archiver: ToolConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub prune: PruneConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory to archive
    pub source_dir: PathBuf,

    /// Remote target, e.g. `s3://bucket` or `s3://bucket/prefix`
    pub destination: String,

    /// Remote archives older than this many days are pruned
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Archive name prefix (defaults to the source directory's name)
    #[serde(default)]
    pub archive_prefix: Option<String>,

    /// Where the archive is written before upload (defaults to the OS temp dir)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// An external program plus leading arguments placed before the per-call ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Try the AWS SDK before falling back to the AWS CLI
    #[serde(default = "default_true")]
    pub use_native_sdk: bool,

    /// AWS region override for the SDK (falls back to the shared config chain)
    #[serde(default)]
    pub region: Option<String>,

    /// AWS CLI executable
    #[serde(default = "default_cli_tool")]
    pub cli: ToolConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PrunePolicy {
    /// Compare each object's last-modified time against the retention window
    #[default]
    Timestamp,
    /// Delete keys matching `*<days>*.7z`. Not an age filter; kept for old setups.
    LegacyNamePattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub policy: PrunePolicy,

    /// Upper bound on in-flight delete requests
    #[serde(default = "default_max_concurrent_deletes")]
    pub max_concurrent_deletes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// SNS topic ARN alerted when the upload fails
    #[serde(default)]
    pub topic_arn: Option<String>,

    #[serde(default = "default_notify_subject")]
    pub subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Day of the week the host image is taken
    #[serde(default = "default_snapshot_weekday")]
    pub weekday: Weekday,

    /// Image name is `<name_prefix>-<YYYY-MM-DD>`
    #[serde(default = "default_snapshot_name_prefix")]
    pub name_prefix: String,

    /// Instance metadata endpoint returning the instance id as plain text
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound for the compressor run
    #[serde(default = "default_compress_secs")]
    pub compress_secs: u64,

    /// Upper bound for each remote call (upload, list, delete, publish, image)
    #[serde(default = "default_remote_secs")]
    pub remote_secs: u64,

    /// Upper bound for availability probes
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
}

impl TimeoutConfig {
    pub fn compress(&self) -> Duration {
        Duration::from_secs(self.compress_secs)
    }

    pub fn remote(&self) -> Duration {
        Duration::from_secs(self.remote_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append log records to this file as well as stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default values
fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    7
}

fn default_archiver_tool() -> ToolConfig {
    ToolConfig::new("7z")
}

fn default_cli_tool() -> ToolConfig {
    ToolConfig::new("aws")
}

fn default_max_concurrent_deletes() -> usize {
    8
}

fn default_notify_subject() -> String {
    DEFAULT_NOTIFY_SUBJECT.to_string()
}

fn default_snapshot_weekday() -> Weekday {
    Weekday::Sun
}

fn default_snapshot_name_prefix() -> String {
    "backup-host".to_string()
}

fn default_metadata_url() -> String {
    "http://169.254.169.254/latest/meta-data/instance-id".to_string()
}

fn default_compress_secs() -> u64 {
    6 * 60 * 60
}

fn default_remote_secs() -> u64 {
    60 * 60
}

fn default_probe_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            use_native_sdk: true,
            region: None,
            cli: default_cli_tool(),
        }
    }
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: PrunePolicy::default(),
            max_concurrent_deletes: default_max_concurrent_deletes(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            topic_arn: None,
            subject: default_notify_subject(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            weekday: default_snapshot_weekday(),
            name_prefix: default_snapshot_name_prefix(),
            metadata_url: default_metadata_url(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            compress_secs: default_compress_secs(),
            remote_secs: default_remote_secs(),
            probe_secs: default_probe_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            backup: BackupConfig {
                source_dir: PathBuf::from("/data/CLIENTS"),
                destination: PLACEHOLDER_DESTINATION.to_string(),
                retention_days: default_retention_days(),
                archive_prefix: None,
                scratch_dir: None,
            },
            archiver: default_archiver_tool(),
            transport: TransportConfig::default(),
            prune: PruneConfig::default(),
            notify: NotifyConfig::default(),
            snapshot: SnapshotConfig::default(),
            timeouts: TimeoutConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Settings {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Write configuration as TOML, creating parent directories
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BackupError::Config(format!("cannot serialize config: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that must never start a run
    pub fn validate(&self) -> Result<()> {
        let destination = self.backup.destination.trim();
        if destination.is_empty() {
            return Err(BackupError::Config("destination is empty".to_string()));
        }
        if Target::parse(destination)?.bucket == PLACEHOLDER_BUCKET {
            return Err(BackupError::Config(format!(
                "destination is still the placeholder '{}'; set it to your own bucket",
                PLACEHOLDER_DESTINATION
            )));
        }
        if self.prune.max_concurrent_deletes == 0 {
            return Err(BackupError::Config(
                "prune.max_concurrent_deletes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory the archive is written to
    pub fn scratch_dir(&self) -> PathBuf {
        self.backup
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
