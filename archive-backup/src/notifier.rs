//! Failure alerts over SNS.

use crate::config::DEFAULT_NOTIFY_SUBJECT;
use crate::job::BackupJob;
use crate::transport::Transport;
use crate::utils::errors::{Advisory, AdvisoryError, BackupError};
use tracing::{info, warn};

const STEP: &str = "notify";

/// Publish `message` to `topic`.
///
/// Without a topic nothing is sent. A publish error comes back as an
/// [`AdvisoryError`] for the caller to log.
pub async fn notify(
    transport: &dyn Transport,
    topic: Option<&str>,
    message: &str,
    subject: Option<&str>,
) -> Advisory<()> {
    let Some(topic) = topic else {
        info!("No notification topic configured, skipping alert");
        return Ok(());
    };
    let subject = subject
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_NOTIFY_SUBJECT);

    let message_id = transport
        .publish(topic, subject, message)
        .await
        .map_err(|e| AdvisoryError::new(STEP, BackupError::NotifyFailed(e.to_string())))?;

    info!("Published alert to {} (message id: {})", topic, message_id);
    Ok(())
}

/// Body of the alert sent when a run fails at `step`
pub fn failure_message(job: &BackupJob, step: &str, error: &BackupError) -> String {
    let host = match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Cannot resolve hostname: {}", e);
            "unknown-host".to_string()
        }
    };

    format!(
        "Backup on {} failed during {}.\nSource: {}\nDestination: {}\nError: {}",
        host,
        step,
        job.source_dir.display(),
        job.destination,
        error
    )
}
