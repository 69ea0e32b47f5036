//! Retention for remote archives.
//!
//! The default policy lists the destination and deletes every object whose
//! last-modified time is more than `retention_days` old. Deletes run a few at
//! a time and a failed delete never stops the others.
//!
//! [`PrunePolicy::LegacyNamePattern`] reproduces an older behaviour that
//! deleted keys matching `*<days>*.7z`. That pattern says nothing about age:
//! with a 7 day window it removes a fresh `CLIENTS_2024-01-07...` and keeps a
//! year-old `CLIENTS_2023-01-01...`. Only use it to stay compatible with
//! buckets that were managed that way.

use crate::config::PrunePolicy;
use crate::job::Target;
use crate::transport::{RemoteObject, Transport};
use crate::utils::errors::{Advisory, AdvisoryError, BackupError};
use crate::utils::format::format_bytes;
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

const STEP: &str = "prune";

/// Outcome of one prune pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Objects considered
    pub examined: usize,
    /// Keys that were deleted
    pub deleted: Vec<String>,
    /// Keys that should have been deleted but were not
    pub failed: Vec<String>,
    /// Total size of the deleted objects, as listed
    pub reclaimed_bytes: u64,
}

/// `*<days>*.7z`, matched against the key relative to the target prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyPattern {
    days: u32,
}

impl LegacyPattern {
    pub fn new(days: u32) -> Self {
        Self { days }
    }

    /// Glob form for `aws s3 rm --include`
    pub fn glob(&self) -> String {
        format!("*{}*.7z", self.days)
    }

    pub fn matches(&self, key: &str) -> bool {
        key.strip_suffix(".7z")
            .map(|stem| stem.contains(&self.days.to_string()))
            .unwrap_or(false)
    }
}

/// Strictly older than the retention window
pub fn is_expired(object: &RemoteObject, retention_days: u32, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(object.last_modified) > Duration::days(i64::from(retention_days))
}

pub struct Pruner<'a> {
    transport: &'a dyn Transport,
    policy: PrunePolicy,
    max_concurrent_deletes: usize,
}

impl<'a> Pruner<'a> {
    pub fn new(transport: &'a dyn Transport, policy: PrunePolicy, max_concurrent_deletes: usize) -> Self {
        Self {
            transport,
            policy,
            max_concurrent_deletes: max_concurrent_deletes.max(1),
        }
    }

    /// Delete archives under `target` older than `retention_days` as of `now`.
    ///
    /// Only a failed listing is reported as an error. Individual delete
    /// failures are logged and counted in the report.
    pub async fn prune(
        &self,
        target: &Target,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Advisory<PruneReport> {
        match self.policy {
            PrunePolicy::Timestamp => self.prune_by_age(target, retention_days, now).await,
            PrunePolicy::LegacyNamePattern => self.prune_by_pattern(target, retention_days).await,
        }
    }

    async fn prune_by_age(
        &self,
        target: &Target,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Advisory<PruneReport> {
        let objects = self.transport.list(target).await.map_err(|e| {
            AdvisoryError::new(STEP, BackupError::PruneFailed(format!("listing {}: {}", target, e)))
        })?;

        let examined = objects.len();
        let expired: Vec<RemoteObject> = objects
            .into_iter()
            .filter(|o| is_expired(o, retention_days, now))
            .collect();

        info!(
            "Pruning {}: {} objects, {} older than {} days",
            target,
            examined,
            expired.len(),
            retention_days
        );

        let transport = self.transport;
        let results: Vec<(RemoteObject, Result<(), BackupError>)> = stream::iter(expired)
            .map(|object| async move {
                let result = transport.delete(target, &object.key).await;
                (object, result)
            })
            .buffer_unordered(self.max_concurrent_deletes)
            .collect()
            .await;

        let mut report = PruneReport {
            examined,
            ..PruneReport::default()
        };
        for (object, result) in results {
            match result {
                Ok(()) => {
                    info!("Deleted {}", target.object_uri(&object.key));
                    report.reclaimed_bytes += object.size;
                    report.deleted.push(object.key);
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", target.object_uri(&object.key), e);
                    report.failed.push(object.key);
                }
            }
        }
        report.deleted.sort();
        report.failed.sort();

        info!(
            "Pruned {}: {} deleted ({}), {} failed",
            target,
            report.deleted.len(),
            format_bytes(report.reclaimed_bytes),
            report.failed.len()
        );

        Ok(report)
    }

    async fn prune_by_pattern(&self, target: &Target, retention_days: u32) -> Advisory<PruneReport> {
        let pattern = LegacyPattern::new(retention_days);
        warn!(
            "Pruning {} by name pattern '{}'; this does not check object age",
            target,
            pattern.glob()
        );

        let mut deleted = self
            .transport
            .remove_matching(target, &pattern)
            .await
            .map_err(|e| AdvisoryError::new(STEP, BackupError::PruneFailed(e.to_string())))?;
        deleted.sort();

        info!("Removed {} objects matching '{}'", deleted.len(), pattern.glob());
        Ok(PruneReport {
            examined: deleted.len(),
            deleted,
            ..PruneReport::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn seeded() -> MemoryTransport {
        let transport = MemoryTransport::new();
        let now = now();
        transport.insert("backup-bucket", "fresh.7z", now - Duration::days(1));
        transport.insert("backup-bucket", "exactly-7-days.7z", now - Duration::days(7));
        transport.insert("backup-bucket", "just-over.7z", now - Duration::days(7) - Duration::seconds(1));
        transport.insert("backup-bucket", "ancient.7z", now - Duration::days(90));
        transport.insert("other-bucket", "ancient.7z", now - Duration::days(90));
        transport
    }

    #[test]
    fn test_is_expired_is_strict() {
        let object = |age: Duration| RemoteObject {
            key: "k".into(),
            last_modified: now() - age,
            size: 0,
        };
        assert!(!is_expired(&object(Duration::days(7)), 7, now()));
        assert!(is_expired(&object(Duration::days(7) + Duration::seconds(1)), 7, now()));
        assert!(!is_expired(&object(Duration::zero()), 0, now()));
        assert!(is_expired(&object(Duration::seconds(1)), 0, now()));
    }

    #[test]
    fn test_legacy_pattern() {
        let pattern = LegacyPattern::new(7);
        assert_eq!(pattern.glob(), "*7*.7z");
        assert!(pattern.matches("CLIENTS_2024-01-07T00_00_00.7z"));
        assert!(!pattern.matches("CLIENTS_2024-01-01T00_00_00.7z"));
        // The extension's own digit does not count
        assert!(!pattern.matches("CLIENTS.7z"));
        assert!(!pattern.matches("notes-7.txt"));
    }

    #[tokio::test]
    async fn test_prune_deletes_only_expired() {
        let transport = seeded();
        let target = Target::parse("s3://backup-bucket").unwrap();
        let pruner = Pruner::new(&transport, PrunePolicy::Timestamp, 4);

        let report = pruner.prune(&target, 7, now()).await.unwrap();

        assert_eq!(report.examined, 4);
        assert_eq!(report.deleted, vec!["ancient.7z", "just-over.7z"]);
        assert!(report.failed.is_empty());
        assert_eq!(report.reclaimed_bytes, 2);
        assert_eq!(
            transport.keys("backup-bucket"),
            vec!["exactly-7-days.7z", "fresh.7z"]
        );
        assert_eq!(transport.keys("other-bucket"), vec!["ancient.7z"]);
    }

    #[tokio::test]
    async fn test_prune_twice_is_noop() {
        let transport = seeded();
        let target = Target::parse("s3://backup-bucket").unwrap();
        let pruner = Pruner::new(&transport, PrunePolicy::Timestamp, 4);

        pruner.prune(&target, 7, now()).await.unwrap();
        let before = transport.keys("backup-bucket");
        let second = pruner.prune(&target, 7, now()).await.unwrap();

        assert!(second.deleted.is_empty());
        assert_eq!(transport.keys("backup-bucket"), before);
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_block_others() {
        let mut transport = seeded();
        transport.failing_deletes.insert("ancient.7z".to_string());
        let target = Target::parse("s3://backup-bucket").unwrap();
        let pruner = Pruner::new(&transport, PrunePolicy::Timestamp, 1);

        let report = pruner.prune(&target, 7, now()).await.unwrap();

        assert_eq!(report.deleted, vec!["just-over.7z"]);
        assert_eq!(report.failed, vec!["ancient.7z"]);
        assert_eq!(report.reclaimed_bytes, 1);
        assert!(transport.keys("backup-bucket").contains(&"ancient.7z".to_string()));
    }

    #[tokio::test]
    async fn test_listing_failure_is_advisory() {
        let transport = MemoryTransport {
            fail_list: true,
            ..MemoryTransport::new()
        };
        let target = Target::parse("s3://backup-bucket").unwrap();
        let pruner = Pruner::new(&transport, PrunePolicy::Timestamp, 4);

        let err = pruner.prune(&target, 7, now()).await.unwrap_err();
        assert_eq!(err.step, "prune");
        assert!(matches!(err.source, BackupError::PruneFailed(_)));
    }

    #[tokio::test]
    async fn test_prune_respects_prefix() {
        let transport = MemoryTransport::new();
        transport.insert("backup-bucket", "nightly/old.7z", now() - Duration::days(30));
        transport.insert("backup-bucket", "weekly/old.7z", now() - Duration::days(30));
        let target = Target::parse("s3://backup-bucket/nightly").unwrap();
        let pruner = Pruner::new(&transport, PrunePolicy::Timestamp, 4);

        let report = pruner.prune(&target, 7, now()).await.unwrap();

        assert_eq!(report.deleted, vec!["nightly/old.7z"]);
        assert_eq!(transport.keys("backup-bucket"), vec!["weekly/old.7z"]);
    }

    #[tokio::test]
    async fn test_legacy_policy_matches_names_not_age() {
        let transport = MemoryTransport::new();
        transport.insert("backup-bucket", "CLIENTS_2024-01-07T00_00_00.7z", now());
        transport.insert("backup-bucket", "CLIENTS_2023-01-01T00_00_00.7z", now() - Duration::days(400));
        let target = Target::parse("s3://backup-bucket").unwrap();
        let pruner = Pruner::new(&transport, PrunePolicy::LegacyNamePattern, 4);

        let report = pruner.prune(&target, 7, now()).await.unwrap();

        assert_eq!(report.deleted, vec!["CLIENTS_2024-01-07T00_00_00.7z"]);
        assert_eq!(
            transport.keys("backup-bucket"),
            vec!["CLIENTS_2023-01-01T00_00_00.7z"]
        );
    }
}
