//! Remote operations behind one interface.
//!
//! A run talks to S3, SNS and EC2 either through the AWS SDK
//! ([`native::NativeTransport`]) or by shelling out to the AWS CLI
//! ([`cli::CliTransport`]). Which one is decided once, by
//! [`select_transport`], and the chosen implementation is passed by
//! reference to every step that needs it.

pub mod cli;
#[cfg(test)]
pub(crate) mod memory;
pub mod native;

use crate::config::{TimeoutConfig, TransportConfig};
use crate::job::{Target, TransportMode};
use crate::pruner::LegacyPattern;
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use cli::CliTransport;
pub use native::NativeTransport;

/// A stored backup object as seen by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Store a local file under `key` in the target bucket, overwriting any existing object
    async fn upload(&self, local: &Path, target: &Target, key: &str) -> Result<()>;

    /// All objects under the target's prefix
    async fn list(&self, target: &Target) -> Result<Vec<RemoteObject>>;

    async fn delete(&self, target: &Target, key: &str) -> Result<()>;

    /// Delete every object whose key matches the legacy name pattern.
    /// Returns the deleted keys.
    async fn remove_matching(&self, target: &Target, pattern: &LegacyPattern) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for object in self.list(target).await? {
            let relative = target.relative_key(&object.key);
            if !pattern.matches(relative) {
                continue;
            }
            match self.delete(target, &object.key).await {
                Ok(()) => removed.push(object.key),
                Err(e) => warn!("Failed to delete {}: {}", object.key, e),
            }
        }
        Ok(removed)
    }

    /// Publish a message to a pub/sub topic, returning the message id
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<String>;

    /// Request an image of an instance, returning the image id
    async fn create_image(&self, instance_id: &str, name: &str) -> Result<String>;
}

/// Pick the transport for this run, preferring the SDK.
///
/// Fails with `NoTransport` when neither option is usable; the run must not
/// go any further in that case.
pub async fn select_transport(
    config: &TransportConfig,
    timeouts: &TimeoutConfig,
) -> Result<Box<dyn Transport>> {
    if config.use_native_sdk {
        match NativeTransport::connect(config, timeouts).await {
            Ok(transport) => {
                info!("Using transport: {}", transport.mode());
                return Ok(Box::new(transport));
            }
            Err(e) => warn!("AWS SDK unusable, trying AWS CLI: {}", e),
        }
    } else {
        debug!("AWS SDK disabled by configuration");
    }

    match CliTransport::probe(config.cli.clone(), timeouts).await {
        Ok(transport) => {
            info!("Using transport: {}", transport.mode());
            Ok(Box::new(transport))
        }
        Err(e) => {
            warn!("AWS CLI unusable: {}", e);
            Err(BackupError::NoTransport)
        }
    }
}

/// Run a remote call with an upper bound on its duration
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackupError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::tests::sh_tool;
    use crate::config::ToolConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_select_cli_when_sdk_disabled() {
        let dir = TempDir::new().unwrap();
        let config = TransportConfig {
            use_native_sdk: false,
            region: None,
            cli: sh_tool(dir.path(), "aws.sh", "[ \"$1\" = \"--version\" ] && echo aws-cli/2.15.0"),
        };

        let transport = select_transport(&config, &TimeoutConfig::default())
            .await
            .unwrap();
        assert_eq!(transport.mode(), TransportMode::CommandLineTool);
    }

    #[tokio::test]
    async fn test_select_fails_without_any_transport() {
        let config = TransportConfig {
            use_native_sdk: false,
            region: None,
            cli: ToolConfig::new("no-such-aws-binary"),
        };

        let err = select_transport(&config, &TimeoutConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BackupError::NoTransport));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let err = bounded(Duration::from_millis(50), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, BackupError::Timeout { .. }));
    }
}
