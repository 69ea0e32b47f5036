//! Per-run job description and remote addressing.

use crate::config::Settings;
use crate::utils::errors::{BackupError, Result};
use std::fmt;
use std::path::PathBuf;

const S3_SCHEME: &str = "s3://";

/// How remote operations are carried out for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    NativeSdk,
    CommandLineTool,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::NativeSdk => write!(f, "aws-sdk"),
            TransportMode::CommandLineTool => write!(f, "aws-cli"),
        }
    }
}

/// A bucket plus optional key prefix, parsed from `s3://bucket[/prefix]`
/// or a bare `bucket[/prefix]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub bucket: String,
    pub prefix: Option<String>,
}

impl Target {
    pub fn parse(destination: &str) -> Result<Self> {
        let trimmed = destination.trim();
        let without_scheme = trimmed.strip_prefix(S3_SCHEME).unwrap_or(trimmed);
        let without_scheme = without_scheme.trim_matches('/');

        let (bucket, prefix) = match without_scheme.split_once('/') {
            Some((bucket, prefix)) => (bucket, Some(prefix.trim_matches('/'))),
            None => (without_scheme, None),
        };

        if bucket.is_empty() {
            return Err(BackupError::Config(format!(
                "destination '{}' has no bucket name",
                destination
            )));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }

    /// Object key for a file name stored under this target
    pub fn key_for(&self, file_name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, file_name),
            None => file_name.to_string(),
        }
    }

    /// Listing prefix, with a trailing slash so `logs` does not match `logs-old`
    pub fn list_prefix(&self) -> Option<String> {
        self.prefix.as_ref().map(|p| format!("{}/", p))
    }

    /// Key with the target prefix stripped
    pub fn relative_key<'a>(&self, key: &'a str) -> &'a str {
        match self.list_prefix() {
            Some(prefix) => key.strip_prefix(prefix.as_str()).unwrap_or(key),
            None => key,
        }
    }

    /// `s3://bucket/prefix/` form understood by the AWS CLI
    pub fn uri(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}/{}/", S3_SCHEME, self.bucket, prefix),
            None => format!("{}{}/", S3_SCHEME, self.bucket),
        }
    }

    /// `s3://bucket/key` for a single object
    pub fn object_uri(&self, key: &str) -> String {
        format!("{}{}/{}", S3_SCHEME, self.bucket, key)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// Everything one run needs to know, fixed before the first step starts.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub source_dir: PathBuf,
    pub destination: Target,
    pub retention_days: u32,
    pub archive_prefix: String,
    pub notification_topic: Option<String>,
}

impl BackupJob {
    /// Build the job from validated settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let source_dir = settings.backup.source_dir.clone();
        let archive_prefix = match &settings.backup.archive_prefix {
            Some(prefix) if !prefix.trim().is_empty() => prefix.trim().to_string(),
            _ => source_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "backup".to_string()),
        };

        Ok(Self {
            destination: Target::parse(&settings.backup.destination)?,
            retention_days: settings.backup.retention_days,
            archive_prefix,
            notification_topic: settings
                .notify
                .topic_arn
                .clone()
                .filter(|t| !t.trim().is_empty()),
            source_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse() {
        let t = Target::parse("s3://backup-bucket").unwrap();
        assert_eq!(t.bucket, "backup-bucket");
        assert_eq!(t.prefix, None);
        assert_eq!(t.key_for("CLIENTS.7z"), "CLIENTS.7z");
        assert_eq!(t.uri(), "s3://backup-bucket/");

        let t = Target::parse("s3://backup-bucket/nightly/clients/").unwrap();
        assert_eq!(t.bucket, "backup-bucket");
        assert_eq!(t.prefix.as_deref(), Some("nightly/clients"));
        assert_eq!(t.key_for("a.7z"), "nightly/clients/a.7z");
        assert_eq!(t.list_prefix().as_deref(), Some("nightly/clients/"));
        assert_eq!(t.relative_key("nightly/clients/a.7z"), "a.7z");
        assert_eq!(t.relative_key("other/a.7z"), "other/a.7z");
        assert_eq!(t.object_uri("nightly/clients/a.7z"), "s3://backup-bucket/nightly/clients/a.7z");

        let bare = Target::parse("backup-bucket").unwrap();
        assert_eq!(bare.bucket, "backup-bucket");
    }

    #[test]
    fn test_target_parse_rejects_empty_bucket() {
        assert!(Target::parse("s3://").is_err());
        assert!(Target::parse("").is_err());
    }

    #[test]
    fn test_job_from_settings() {
        let mut settings = Settings::default();
        settings.backup.source_dir = PathBuf::from("/data/CLIENTS");
        settings.backup.destination = "s3://backup-bucket".to_string();
        settings.notify.topic_arn = Some(String::new());

        let job = BackupJob::from_settings(&settings).unwrap();
        assert_eq!(job.archive_prefix, "CLIENTS");
        assert_eq!(job.retention_days, 7);
        assert_eq!(job.destination.bucket, "backup-bucket");
        assert!(job.notification_topic.is_none());
    }

    #[test]
    fn test_job_rejects_placeholder() {
        let settings = Settings::default();
        assert!(matches!(
            BackupJob::from_settings(&settings),
            Err(BackupError::Config(_))
        ));
    }
}
