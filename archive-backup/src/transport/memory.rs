//! In-memory transport for exercising the pipeline without AWS.

use super::{RemoteObject, Transport};
use crate::job::{Target, TransportMode};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct MemoryTransport {
    /// Keyed by `bucket/key`
    pub objects: Mutex<BTreeMap<String, RemoteObject>>,
    pub published: Mutex<Vec<(String, String, String)>>,
    pub images: Mutex<Vec<(String, String)>>,
    pub fail_upload: bool,
    pub fail_list: bool,
    pub fail_publish: bool,
    pub upload_delay: Option<Duration>,
    pub failing_deletes: HashSet<String>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, last_modified: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            format!("{}/{}", bucket, key),
            RemoteObject {
                key: key.to_string(),
                last_modified,
                size: 1,
            },
        );
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let prefix = format!("{}/", bucket);
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, o)| o.key.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::NativeSdk
    }

    async fn upload(&self, local: &Path, target: &Target, key: &str) -> Result<()> {
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_upload {
            return Err(BackupError::Remote("AccessDenied".to_string()));
        }
        let size = std::fs::metadata(local)?.len();
        self.objects.lock().unwrap().insert(
            format!("{}/{}", target.bucket, key),
            RemoteObject {
                key: key.to_string(),
                last_modified: Utc::now(),
                size,
            },
        );
        Ok(())
    }

    async fn list(&self, target: &Target) -> Result<Vec<RemoteObject>> {
        if self.fail_list {
            return Err(BackupError::Remote("NoSuchBucket".to_string()));
        }
        let bucket_prefix = format!("{}/", target.bucket);
        let key_prefix = target.list_prefix().unwrap_or_default();
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, o)| k.starts_with(&bucket_prefix) && o.key.starts_with(&key_prefix))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn delete(&self, target: &Target, key: &str) -> Result<()> {
        if self.failing_deletes.contains(key) {
            return Err(BackupError::Remote(format!("cannot delete {}", key)));
        }
        self.objects
            .lock()
            .unwrap()
            .remove(&format!("{}/{}", target.bucket, key));
        Ok(())
    }

    async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<String> {
        if self.fail_publish {
            return Err(BackupError::Remote("NotFound: topic does not exist".to_string()));
        }
        let mut published = self.published.lock().unwrap();
        published.push((topic.to_string(), subject.to_string(), message.to_string()));
        Ok(format!("msg-{}", published.len()))
    }

    async fn create_image(&self, instance_id: &str, name: &str) -> Result<String> {
        let mut images = self.images.lock().unwrap();
        images.push((instance_id.to_string(), name.to_string()));
        Ok(format!("ami-{:04}", images.len()))
    }
}
