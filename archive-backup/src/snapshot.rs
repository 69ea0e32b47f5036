//! Weekly host image.
//!
//! The host's instance id comes from the instance metadata endpoint. The image
//! is requested without `NoReboot`, so the instance may restart while the
//! image is taken.

use crate::config::{SnapshotConfig, TimeoutConfig};
use crate::transport::Transport;
use crate::utils::errors::{Advisory, AdvisoryError, BackupError, Result};
use chrono::{Datelike, NaiveDate, Weekday};
use std::time::Duration;
use tracing::{debug, info};

const STEP: &str = "snapshot";

/// Whether the weekly image is due on `today`
pub fn snapshot_due(today: NaiveDate, weekday: Weekday) -> bool {
    today.weekday() == weekday
}

/// `<prefix>-YYYY-MM-DD`, used as both name and description of the image
pub fn image_name(prefix: &str, today: NaiveDate) -> String {
    format!("{}-{}", prefix, today.format("%Y-%m-%d"))
}

/// Client for the endpoint that reports which instance we are running on.
pub struct InstanceMetadata {
    client: reqwest::Client,
    url: String,
}

impl InstanceMetadata {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        // The endpoint is link-local; an environment proxy can never reach it.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn instance_id(&self) -> Result<String> {
        debug!("Fetching instance id from {}", self.url);
        let resp = self.client.get(&self.url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BackupError::SnapshotFailed(format!(
                "metadata endpoint returned {}",
                status
            )));
        }

        let id = resp.text().await?.trim().to_string();
        if id.is_empty() {
            return Err(BackupError::SnapshotFailed(
                "metadata endpoint returned an empty instance id".to_string(),
            ));
        }
        Ok(id)
    }
}

pub struct Snapshotter<'a> {
    transport: &'a dyn Transport,
    metadata: InstanceMetadata,
    name_prefix: String,
}

impl<'a> Snapshotter<'a> {
    pub fn new(transport: &'a dyn Transport, metadata: InstanceMetadata, name_prefix: impl Into<String>) -> Self {
        Self {
            transport,
            metadata,
            name_prefix: name_prefix.into(),
        }
    }

    pub fn from_config(
        transport: &'a dyn Transport,
        config: &SnapshotConfig,
        timeouts: &TimeoutConfig,
    ) -> Result<Self> {
        let metadata = InstanceMetadata::new(config.metadata_url.clone(), timeouts.probe())?;
        Ok(Self::new(transport, metadata, config.name_prefix.clone()))
    }

    /// Request an image of this host named for `today`. Returns the image id.
    pub async fn create_host_snapshot(&self, today: NaiveDate) -> Advisory<String> {
        let instance_id = self
            .metadata
            .instance_id()
            .await
            .map_err(|e| AdvisoryError::new(STEP, snapshot_error(e)))?;

        let name = image_name(&self.name_prefix, today);
        info!("Requesting image {} of instance {}", name, instance_id);

        let image_id = self
            .transport
            .create_image(&instance_id, &name)
            .await
            .map_err(|e| AdvisoryError::new(STEP, snapshot_error(e)))?;

        info!("Image {} requested ({})", image_id, name);
        Ok(image_id)
    }
}

fn snapshot_error(e: BackupError) -> BackupError {
    match e {
        e @ BackupError::SnapshotFailed(_) => e,
        other => BackupError::SnapshotFailed(other.to_string()),
    }
}
