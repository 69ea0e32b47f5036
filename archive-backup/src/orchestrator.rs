//! One backup run from start to finish.
//!
//! The run moves through
//! `Init -> TransportSelected -> Compressed -> Uploaded -> Pruned -> Done`
//! and stops in `Failed(reason)` on the first fatal error. Prune, notify and
//! snapshot problems are logged and never change where the run ends up.
//!
//! The local archive lives in an [`Archive`](crate::archiver::Archive) guard
//! for as long as it exists, so it is removed whether the run returns
//! normally or its future is dropped part way through.

use crate::archiver::Archiver;
use crate::config::Settings;
use crate::job::{BackupJob, TransportMode};
use crate::notifier;
use crate::pruner::{PruneReport, Pruner};
use crate::snapshot::{snapshot_due, Snapshotter};
use crate::transport::{select_transport, Transport};
use crate::uploader;
use crate::utils::errors::{BackupError, FailureKind, Result};
use crate::utils::format::format_elapsed;
use chrono::{Local, NaiveDate, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Why a run ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Config,
    NoTransport,
    CompressionFailed,
    UploadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    TransportSelected,
    Compressed,
    Uploaded,
    Pruned,
    Done,
    Failed(FailureReason),
}

/// What a run did and where it stopped
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub state: RunState,
    pub transport: Option<TransportMode>,
    pub uploaded_key: Option<String>,
    pub pruned: Option<PruneReport>,
    pub snapshot_id: Option<String>,
    pub error: Option<String>,
    /// Class of the error that stopped the run
    pub failure_kind: Option<FailureKind>,
    pub elapsed: Duration,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: RunState::Init,
            transport: None,
            uploaded_key: None,
            pruned: None,
            snapshot_id: None,
            error: None,
            failure_kind: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Only the fatal steps count; advisory failures never flip this.
    pub fn success(&self) -> bool {
        self.state == RunState::Done
    }

    fn advance(&mut self, state: RunState) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn fail(&mut self, reason: FailureReason, error: &BackupError) {
        self.advance(RunState::Failed(reason));
        self.error = Some(error.to_string());
        self.failure_kind = Some(error.kind());
    }
}

/// Which pieces of a run are usable on this host
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub config_error: Option<String>,
    pub transport: Option<TransportMode>,
    pub archiver_error: Option<String>,
}

impl CheckReport {
    pub fn ready(&self) -> bool {
        self.config_error.is_none() && self.transport.is_some() && self.archiver_error.is_none()
    }
}

pub struct Orchestrator {
    settings: Settings,
    transport: Option<Arc<dyn Transport>>,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            transport: None,
        }
    }

    /// Use `transport` instead of selecting one at run time
    pub fn with_transport(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport: Some(transport),
        }
    }

    async fn transport(&self) -> Result<Arc<dyn Transport>> {
        match &self.transport {
            Some(transport) => Ok(Arc::clone(transport)),
            None => {
                let selected =
                    select_transport(&self.settings.transport, &self.settings.timeouts).await?;
                Ok(Arc::from(selected))
            }
        }
    }

    fn archiver(&self, prefix: &str) -> Archiver {
        Archiver::new(
            self.settings.archiver.clone(),
            self.settings.scratch_dir(),
            prefix,
            self.settings.timeouts.compress(),
            self.settings.timeouts.probe(),
        )
    }

    /// Run one backup. Never panics on step failures; inspect the report.
    pub async fn run(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new(run_id);

        let job = match BackupJob::from_settings(&self.settings) {
            Ok(job) => job,
            Err(e) => {
                error!("Refusing to start: {}", e);
                report.fail(FailureReason::Config, &e);
                return finish(report, started);
            }
        };

        info!(
            "Backing up {} to {} (retention: {} days)",
            job.source_dir.display(),
            job.destination,
            job.retention_days
        );

        let transport = match self.transport().await {
            Ok(transport) => transport,
            Err(e) => {
                error!("{}", e);
                report.fail(FailureReason::NoTransport, &e);
                return finish(report, started);
            }
        };
        report.transport = Some(transport.mode());
        report.advance(RunState::TransportSelected);

        self.backup(&job, transport.as_ref(), &mut report).await;

        if self.settings.snapshot.enabled {
            let today = Local::now().date_naive();
            if snapshot_due(today, self.settings.snapshot.weekday) {
                report.snapshot_id = self.snapshot(transport.as_ref(), today).await;
            } else {
                debug!(
                    "Host image not due today (scheduled for {})",
                    self.settings.snapshot.weekday
                );
            }
        }

        finish(report, started)
    }

    async fn backup(&self, job: &BackupJob, transport: &dyn Transport, report: &mut RunReport) {
        let archive = match self.archiver(&job.archive_prefix).compress(&job.source_dir).await {
            Ok(archive) => archive,
            Err(e) => {
                error!("Compression failed: {}", e);
                report.fail(FailureReason::CompressionFailed, &e);
                return;
            }
        };
        report.advance(RunState::Compressed);

        let uploaded = uploader::upload(&archive, &job.destination, transport).await;

        let local = archive.path().to_path_buf();
        match archive.remove() {
            Ok(()) => debug!("Removed local archive {}", local.display()),
            Err(e) => warn!("Failed to remove local archive {}: {}", local.display(), e),
        }

        match uploaded {
            Ok(key) => {
                report.uploaded_key = Some(key);
                report.advance(RunState::Uploaded);
            }
            Err(e) => {
                error!("{}", e);
                let message = notifier::failure_message(job, "upload", &e);
                if let Err(advisory) = notifier::notify(
                    transport,
                    job.notification_topic.as_deref(),
                    &message,
                    Some(&self.settings.notify.subject),
                )
                .await
                {
                    warn!("{}", advisory);
                }
                report.fail(FailureReason::UploadFailed, &e);
                return;
            }
        }

        if self.settings.prune.enabled {
            let pruner = Pruner::new(
                transport,
                self.settings.prune.policy,
                self.settings.prune.max_concurrent_deletes,
            );
            match pruner.prune(&job.destination, job.retention_days, Utc::now()).await {
                Ok(pruned) => {
                    if !pruned.failed.is_empty() {
                        warn!("{} expired archives could not be deleted", pruned.failed.len());
                    }
                    report.pruned = Some(pruned);
                }
                Err(advisory) => warn!("{}", advisory),
            }
        } else {
            info!("Pruning disabled");
        }
        report.advance(RunState::Pruned);
        report.advance(RunState::Done);
    }

    async fn snapshot(&self, transport: &dyn Transport, today: NaiveDate) -> Option<String> {
        let snapshotter =
            match Snapshotter::from_config(transport, &self.settings.snapshot, &self.settings.timeouts) {
                Ok(snapshotter) => snapshotter,
                Err(e) => {
                    warn!("snapshot failed: {}", e);
                    return None;
                }
            };
        match snapshotter.create_host_snapshot(today).await {
            Ok(image_id) => Some(image_id),
            Err(advisory) => {
                warn!("{}", advisory);
                None
            }
        }
    }

    /// Take the host image now, regardless of the weekday
    pub async fn snapshot_now(&self) -> Result<String> {
        let transport = self.transport().await?;
        let snapshotter =
            Snapshotter::from_config(transport.as_ref(), &self.settings.snapshot, &self.settings.timeouts)?;
        snapshotter
            .create_host_snapshot(Local::now().date_naive())
            .await
            .map_err(|advisory| advisory.source)
    }

    /// Probe the configuration, transport and compressor without side effects
    pub async fn check(&self) -> CheckReport {
        let config_error = BackupJob::from_settings(&self.settings)
            .err()
            .map(|e| e.to_string());
        let archiver_error = self
            .archiver("check")
            .probe()
            .await
            .err()
            .map(|e| e.to_string());

        let transport = match self.transport().await {
            Ok(transport) => Some(transport.mode()),
            Err(e) => {
                warn!("{}", e);
                None
            }
        };

        CheckReport {
            config_error,
            transport,
            archiver_error,
        }
    }
}

fn finish(mut report: RunReport, started: Instant) -> RunReport {
    report.elapsed = started.elapsed();
    match report.state {
        RunState::Done => info!("Backup succeeded"),
        state => match report.failure_kind {
            Some(FailureKind::Precondition) => {
                error!("Backup not started ({:?}); fix the setup and rerun", state)
            }
            Some(kind) => error!("Backup failed in state {:?} ({:?} error)", state, kind),
            None => error!("Backup failed in state {:?}", state),
        },
    }
    info!("Elapsed time: {}", format_elapsed(report.elapsed));
    report
}
