//! AWS CLI transport.
//!
//! Every operation is one `aws` invocation. Listings are parsed from the
//! plain-text output of `aws s3 ls --recursive`; SNS and EC2 calls request
//! JSON output and pick the id out of it.

use super::{RemoteObject, Transport};
use crate::config::{TimeoutConfig, ToolConfig};
use crate::job::{Target, TransportMode};
use crate::pruner::LegacyPattern;
use crate::utils::errors::{BackupError, Result};
use crate::utils::process::{probe_tool, run_tool, ToolOutput};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub struct CliTransport {
    tool: ToolConfig,
    timeout: Duration,
}

impl CliTransport {
    pub fn new(tool: ToolConfig, timeout: Duration) -> Self {
        Self { tool, timeout }
    }

    /// Build the transport if `aws --version` runs cleanly
    pub async fn probe(tool: ToolConfig, timeouts: &TimeoutConfig) -> Result<Self> {
        probe_tool(&tool, &["--version"], timeouts.probe()).await?;
        Ok(Self::new(tool, timeouts.remote()))
    }

    async fn aws<I, S>(&self, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = run_tool(&self.tool, args, self.timeout).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(BackupError::Remote(output.diagnostics()))
        }
    }
}

/// Parse one line of `aws s3 ls --recursive`:
/// `2024-01-01 00:00:00       1234 prefix/name.7z`.
///
/// The CLI prints times in the zone of the machine running it, so the
/// timestamp is read in `zone` and converted to UTC. An ambiguous local time
/// (the repeated hour when clocks go back) resolves to the earlier instant.
fn parse_listing_line<Tz: TimeZone>(line: &str, zone: &Tz) -> Option<RemoteObject> {
    let mut rest = line.trim_start();
    let mut fields = [""; 3];
    for field in fields.iter_mut() {
        let end = rest.find(char::is_whitespace)?;
        *field = &rest[..end];
        rest = rest[end..].trim_start();
    }
    let key = rest.trim_end();
    if key.is_empty() {
        return None;
    }

    let modified =
        NaiveDateTime::parse_from_str(&format!("{} {}", fields[0], fields[1]), "%Y-%m-%d %H:%M:%S")
            .ok()?;
    let last_modified = zone
        .from_local_datetime(&modified)
        .earliest()?
        .with_timezone(&Utc);

    Some(RemoteObject {
        key: key.to_string(),
        last_modified,
        size: fields[2].parse().ok()?,
    })
}

fn parse_listing<Tz: TimeZone>(output: &str, zone: &Tz) -> Vec<RemoteObject> {
    output
        .lines()
        .filter_map(|line| parse_listing_line(line, zone))
        .collect()
}

/// Pull a string field out of the CLI's JSON output
fn json_field(stdout: &str, field: &str) -> Result<Option<String>> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim())?;
    Ok(value.get(field).and_then(|v| v.as_str()).map(str::to_string))
}

#[async_trait]
impl Transport for CliTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::CommandLineTool
    }

    async fn upload(&self, local: &Path, target: &Target, key: &str) -> Result<()> {
        let destination = target.object_uri(key);
        self.aws([
            OsStr::new("s3"),
            OsStr::new("cp"),
            local.as_os_str(),
            OsStr::new(&destination),
            OsStr::new("--only-show-errors"),
        ])
        .await?;
        Ok(())
    }

    async fn list(&self, target: &Target) -> Result<Vec<RemoteObject>> {
        let uri = target.uri();
        let output = run_tool(&self.tool, ["s3", "ls", uri.as_str(), "--recursive"], self.timeout)
            .await?;

        if output.success() {
            return Ok(parse_listing(&output.stdout, &Local));
        }
        // `aws s3 ls` exits 1 with no output when nothing matches the prefix.
        if output.stdout.trim().is_empty() && output.stderr.trim().is_empty() {
            debug!("No objects under {}", uri);
            return Ok(Vec::new());
        }
        Err(BackupError::Remote(output.diagnostics()))
    }

    async fn delete(&self, target: &Target, key: &str) -> Result<()> {
        let uri = target.object_uri(key);
        self.aws(["s3", "rm", uri.as_str(), "--only-show-errors"]).await?;
        Ok(())
    }

    async fn remove_matching(&self, target: &Target, pattern: &LegacyPattern) -> Result<Vec<String>> {
        let uri = target.uri();
        let include = pattern.glob();
        let output = self
            .aws([
                "s3",
                "rm",
                uri.as_str(),
                "--recursive",
                "--exclude",
                "*",
                "--include",
                include.as_str(),
            ])
            .await?;
        let bucket_prefix = format!("s3://{}/", target.bucket);
        Ok(output
            .stdout
            .lines()
            .filter_map(|l| l.trim().strip_prefix("delete:"))
            .map(|uri| {
                let uri = uri.trim();
                uri.strip_prefix(&bucket_prefix).unwrap_or(uri).to_string()
            })
            .collect())
    }

    async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<String> {
        let output = self
            .aws([
                "sns",
                "publish",
                "--topic-arn",
                topic,
                "--subject",
                subject,
                "--message",
                message,
                "--output",
                "json",
            ])
            .await?;
        Ok(json_field(&output.stdout, "MessageId")?.unwrap_or_default())
    }

    async fn create_image(&self, instance_id: &str, name: &str) -> Result<String> {
        let output = self
            .aws([
                "ec2",
                "create-image",
                "--instance-id",
                instance_id,
                "--name",
                name,
                "--description",
                name,
                "--output",
                "json",
            ])
            .await?;
        json_field(&output.stdout, "ImageId")?
            .ok_or_else(|| BackupError::Remote("create-image returned no ImageId".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::tests::sh_tool;
    use crate::pruner::is_expired;
    use chrono::FixedOffset;
    use std::fs;
    use tempfile::TempDir;

    /// Fake `aws` that appends its arguments to `calls.log` next to the script
    /// and answers the few commands the transport issues.
    const FAKE_AWS: &str = r#"
dir=$(dirname "$0")
echo "$*" >> "$dir/calls.log"
case "$1 $2" in
  "s3 ls")
    cat "$dir/listing.txt" 2>/dev/null
    ;;
  "s3 rm")
    case "$*" in
      *--include*) echo "delete: s3://backup-bucket/CLIENTS_2024-01-07T00_00_00.7z" ;;
    esac
    ;;
  "sns publish")
    echo '{"MessageId": "msg-123"}'
    ;;
  "ec2 create-image")
    echo '{"ImageId": "ami-0abc"}'
    ;;
  "s3 cp")
    [ -f "$3" ] || { echo "The user-provided path $3 does not exist." >&2; exit 255; }
    ;;
esac
"#;

    fn transport(dir: &Path) -> CliTransport {
        CliTransport::new(sh_tool(dir, "aws.sh", FAKE_AWS), Duration::from_secs(10))
    }

    fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_parse_listing() {
        let output = "\
2024-01-01 00:00:00    1048576 CLIENTS_2024-01-01T00_00_00.7z
2024-01-09 12:30:05         42 nightly/my archive.7z

                           PRE folder/
";
        let objects = parse_listing(output, &Utc);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "CLIENTS_2024-01-01T00_00_00.7z");
        assert_eq!(objects[0].size, 1_048_576);
        assert_eq!(
            objects[0].last_modified,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(objects[1].key, "nightly/my archive.7z");
    }

    #[test]
    fn test_listing_times_are_local() {
        // Printed on a host at UTC-5; the object was written at 17:00 UTC
        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();
        let object =
            parse_listing_line("2024-01-08 12:00:00 42 CLIENTS_2024-01-08T12_00_00.7z", &new_york)
                .unwrap();
        assert_eq!(
            object.last_modified,
            Utc.with_ymd_and_hms(2024, 1, 8, 17, 0, 0).unwrap()
        );

        // 6d20h old: inside a 7 day window
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap();
        assert!(!is_expired(&object, 7, now));
        // 7d00h00m01s old: outside it
        let later = Utc.with_ymd_and_hms(2024, 1, 15, 17, 0, 1).unwrap();
        assert!(is_expired(&object, 7, later));
    }

    #[test]
    fn test_fresh_upload_survives_zero_day_window() {
        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();
        let object = parse_listing_line("2024-01-08 12:00:00 42 fresh.7z", &new_york).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 8, 17, 0, 0).unwrap();
        assert!(!is_expired(&object, 0, now));
    }

    #[tokio::test]
    async fn test_upload_uses_object_key() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("CLIENTS_2024-01-01T00_00_00.7z");
        fs::write(&archive, b"7z").unwrap();
        let target = Target::parse("s3://backup-bucket/nightly").unwrap();

        transport(dir.path())
            .upload(&archive, &target, "nightly/CLIENTS_2024-01-01T00_00_00.7z")
            .await
            .unwrap();

        let calls = calls(dir.path());
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("s3 cp "));
        assert!(calls[0].contains("s3://backup-bucket/nightly/CLIENTS_2024-01-01T00_00_00.7z"));
    }

    #[tokio::test]
    async fn test_upload_failure_is_remote_error() {
        let dir = TempDir::new().unwrap();
        let target = Target::parse("s3://backup-bucket").unwrap();

        let err = transport(dir.path())
            .upload(&dir.path().join("missing.7z"), &target, "missing.7z")
            .await
            .unwrap_err();
        match err {
            BackupError::Remote(msg) => assert!(msg.contains("does not exist")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_list_reads_recursive_listing() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("listing.txt"),
            "2024-01-01 00:00:00 10 CLIENTS_2024-01-01T00_00_00.7z\n",
        )
        .unwrap();
        let target = Target::parse("s3://backup-bucket").unwrap();

        let objects = transport(dir.path()).list(&target).await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(calls(dir.path()), vec!["s3 ls s3://backup-bucket/ --recursive"]);
    }

    #[tokio::test]
    async fn test_list_empty_prefix_exit_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let tool = sh_tool(dir.path(), "aws.sh", "exit 1");
        let transport = CliTransport::new(tool, Duration::from_secs(10));
        let target = Target::parse("s3://backup-bucket/empty").unwrap();

        assert!(transport.list(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_matching_builds_include_filter() {
        let dir = TempDir::new().unwrap();
        let target = Target::parse("s3://backup-bucket").unwrap();

        let removed = transport(dir.path())
            .remove_matching(&target, &LegacyPattern::new(7))
            .await
            .unwrap();

        assert_eq!(removed, vec!["CLIENTS_2024-01-07T00_00_00.7z"]);
        assert_eq!(
            calls(dir.path()),
            vec!["s3 rm s3://backup-bucket/ --recursive --exclude * --include *7*.7z"]
        );
    }

    #[tokio::test]
    async fn test_publish_and_create_image_return_ids() {
        let dir = TempDir::new().unwrap();
        let transport = transport(dir.path());

        let message_id = transport
            .publish("arn:aws:sns:us-east-1:1:alerts", "Backup failed", "details")
            .await
            .unwrap();
        assert_eq!(message_id, "msg-123");

        let image_id = transport
            .create_image("i-0123456789abcdef0", "backup-host-2024-01-07")
            .await
            .unwrap();
        assert_eq!(image_id, "ami-0abc");

        let calls = calls(dir.path());
        assert!(calls[0].starts_with("sns publish --topic-arn arn:aws:sns:us-east-1:1:alerts"));
        assert!(calls[1].contains("--instance-id i-0123456789abcdef0"));
    }
}
