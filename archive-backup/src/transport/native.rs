//! AWS SDK transport.

use super::{bounded, RemoteObject, Transport};
use crate::config::{TimeoutConfig, TransportConfig};
use crate::job::{Target, TransportMode};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::Object;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub struct NativeTransport {
    s3: aws_sdk_s3::Client,
    sns: aws_sdk_sns::Client,
    ec2: aws_sdk_ec2::Client,
    timeout: Duration,
}

/// Listing entry from an S3 object. Entries without a key or time are skipped.
fn remote_object(object: &Object) -> Option<RemoteObject> {
    let key = object.key()?;
    let modified = object.last_modified()?;
    let last_modified = chrono::DateTime::from_timestamp(modified.secs(), modified.subsec_nanos())?;
    Some(RemoteObject {
        key: key.to_string(),
        last_modified,
        size: object.size().unwrap_or(0).max(0) as u64,
    })
}

fn sdk_error<E: std::error::Error>(e: E) -> BackupError {
    BackupError::Remote(DisplayErrorContext(e).to_string())
}

impl NativeTransport {
    /// Load the shared AWS configuration and make sure credentials resolve.
    ///
    /// Any failure here means the SDK path is not usable for this run.
    pub async fn connect(config: &TransportConfig, timeouts: &TimeoutConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }

        let sdk_config = bounded(timeouts.probe(), "AWS config load", async {
            Ok(loader.load().await)
        })
        .await?;

        let provider = sdk_config.credentials_provider().ok_or_else(|| {
            BackupError::ToolUnavailable("no AWS credentials provider configured".to_string())
        })?;

        bounded(timeouts.probe(), "AWS credential resolution", async {
            provider
                .provide_credentials()
                .await
                .map(|_| ())
                .map_err(|e| BackupError::ToolUnavailable(format!("AWS credentials: {}", e)))
        })
        .await?;

        debug!(
            "AWS SDK ready (region: {})",
            sdk_config
                .region()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unset".to_string())
        );

        Ok(Self {
            s3: aws_sdk_s3::Client::new(&sdk_config),
            sns: aws_sdk_sns::Client::new(&sdk_config),
            ec2: aws_sdk_ec2::Client::new(&sdk_config),
            timeout: timeouts.remote(),
        })
    }
}

#[async_trait]
impl Transport for NativeTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::NativeSdk
    }

    async fn upload(&self, local: &Path, target: &Target, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| BackupError::Remote(format!("cannot read {}: {}", local.display(), e)))?;

        bounded(self.timeout, "S3 PutObject", async {
            self.s3
                .put_object()
                .bucket(&target.bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok(())
        })
        .await
    }

    async fn list(&self, target: &Target) -> Result<Vec<RemoteObject>> {
        bounded(self.timeout, "S3 ListObjectsV2", async {
            let mut objects = Vec::new();
            let mut pages = self
                .s3
                .list_objects_v2()
                .bucket(&target.bucket)
                .set_prefix(target.list_prefix())
                .into_paginator()
                .send();

            while let Some(page) = pages.next().await {
                let page = page.map_err(sdk_error)?;
                objects.extend(page.contents().iter().filter_map(remote_object));
            }

            Ok(objects)
        })
        .await
    }

    async fn delete(&self, target: &Target, key: &str) -> Result<()> {
        bounded(self.timeout, "S3 DeleteObject", async {
            self.s3
                .delete_object()
                .bucket(&target.bucket)
                .key(key)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok(())
        })
        .await
    }

    async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<String> {
        bounded(self.timeout, "SNS Publish", async {
            let output = self
                .sns
                .publish()
                .topic_arn(topic)
                .subject(subject)
                .message(message)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok(output.message_id().unwrap_or_default().to_string())
        })
        .await
    }

    async fn create_image(&self, instance_id: &str, name: &str) -> Result<String> {
        bounded(self.timeout, "EC2 CreateImage", async {
            let output = self
                .ec2
                .create_image()
                .instance_id(instance_id)
                .name(name)
                .description(name)
                .no_reboot(false)
                .send()
                .await
                .map_err(sdk_error)?;
            info!("CreateImage accepted for {}", instance_id);
            output
                .image_id()
                .map(str::to_string)
                .ok_or_else(|| BackupError::Remote("CreateImage returned no image id".to_string()))
        })
        .await
    }
}
