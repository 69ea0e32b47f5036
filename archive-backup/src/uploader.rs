//! Ships the run's archive to the destination bucket.

use crate::archiver::Archive;
use crate::job::Target;
use crate::transport::Transport;
use crate::utils::errors::{BackupError, Result};
use crate::utils::format::format_bytes;
use std::time::Instant;
use tracing::info;

/// Upload `archive` under `destination`, keyed by the archive's file name.
///
/// Returns the object key. The local directory layout never reaches the key,
/// and uploading the same archive twice overwrites the first copy.
pub async fn upload(archive: &Archive, destination: &Target, transport: &dyn Transport) -> Result<String> {
    let path = archive.path();
    let size = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Err(BackupError::InvalidArchive(path.to_path_buf())),
    };
    let file_name = archive
        .file_name()
        .ok_or_else(|| BackupError::InvalidArchive(path.to_path_buf()))?;
    let key = destination.key_for(&file_name);

    info!(
        "Uploading {} ({}) to {} via {}",
        path.display(),
        format_bytes(size),
        destination.object_uri(&key),
        transport.mode()
    );

    let started = Instant::now();
    transport
        .upload(path, destination, &key)
        .await
        .map_err(|e| match e {
            e @ BackupError::UploadFailed(_) => e,
            other => BackupError::UploadFailed(other.to_string()),
        })?;

    info!("Uploaded {} in {:.1}s", key, started.elapsed().as_secs_f64());
    Ok(key)
}
