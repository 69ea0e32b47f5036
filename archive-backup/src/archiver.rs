//! Directory archiving through an external 7-Zip binary.
//!
//! The archive is written to a scratch directory under a timestamped name
//! (`<prefix>_<YYYY-MM-DDTHH_MM_SS>.7z`) and handed to the caller as an
//! [`Archive`] guard. Dropping the guard removes the file, so a run that is
//! aborted half way still leaves nothing behind.

use crate::config::ToolConfig;
use crate::utils::errors::{BackupError, Result};
use crate::utils::format::format_bytes;
use crate::utils::process::{probe_tool, run_tool};
use chrono::{Local, NaiveDateTime};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A local archive file owned by the current run.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    removed: bool,
}

impl Archive {
    /// Take ownership of an archive file. It is deleted when the guard goes away.
    pub fn from_path(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, used as the remote object name
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Delete the archive now. A file that is already gone counts as removed.
    pub fn remove(mut self) -> std::io::Result<()> {
        self.removed = true;
        remove_if_present(&self.path)
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match remove_if_present(&self.path) {
            Ok(()) => debug!("Removed archive {} on drop", self.path.display()),
            Err(e) => warn!("Failed to remove archive {}: {}", self.path.display(), e),
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Filesystem-safe archive name for a point in time
pub fn archive_name(prefix: &str, at: NaiveDateTime) -> String {
    let stamp = at.format("%Y-%m-%dT%H:%M:%S").to_string().replace(':', "_");
    format!("{}_{}.7z", prefix, stamp)
}

/// Invokes the compressor for one source directory.
pub struct Archiver {
    tool: ToolConfig,
    scratch_dir: PathBuf,
    prefix: String,
    timeout: Duration,
    probe_timeout: Duration,
}

impl Archiver {
    pub fn new(
        tool: ToolConfig,
        scratch_dir: PathBuf,
        prefix: impl Into<String>,
        timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            tool,
            scratch_dir,
            prefix: prefix.into(),
            timeout,
            probe_timeout,
        }
    }

    /// Check that the compressor can be started, without touching any files
    pub async fn probe(&self) -> Result<()> {
        probe_tool(&self.tool, &[], self.probe_timeout).await
    }

    /// Compress `source_dir` into a fresh archive in the scratch directory.
    ///
    /// On error no archive file is left on disk.
    pub async fn compress(&self, source_dir: &Path) -> Result<Archive> {
        match std::fs::metadata(source_dir) {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(BackupError::InvalidSource(source_dir.to_path_buf())),
        }

        self.probe().await?;

        std::fs::create_dir_all(&self.scratch_dir)?;
        let output = self
            .scratch_dir
            .join(archive_name(&self.prefix, Local::now().naive_local()));

        // 7z `a` appends to an existing archive; start from nothing.
        remove_if_present(&output)?;
        let archive = Archive::from_path(output);

        info!(
            "Compressing {} into {}",
            source_dir.display(),
            archive.path().display()
        );
        // Extra pass over the whole source; debug only.
        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Some((files, bytes)) = source_stats(source_dir).await {
                debug!("Source holds {} files, {}", files, format_bytes(bytes));
            }
        }

        let args: [&OsStr; 6] = [
            OsStr::new("a"),
            archive.path().as_os_str(),
            source_dir.as_os_str(),
            OsStr::new("-r"),
            OsStr::new("-mx=9"),
            OsStr::new("-mmt=on"),
        ];

        // Any early return below drops `archive`, which removes partial output.
        let result = match run_tool(&self.tool, args, self.timeout).await {
            Ok(result) => result,
            Err(BackupError::Timeout { secs, .. }) => {
                return Err(BackupError::CompressionFailed(format!(
                    "compressor timed out after {}s",
                    secs
                )));
            }
            Err(e) => return Err(e),
        };

        if !result.success() {
            return Err(BackupError::CompressionFailed(result.diagnostics()));
        }

        match std::fs::metadata(archive.path()) {
            Ok(meta) if meta.is_file() => {
                info!(
                    "Created archive {} ({})",
                    archive.path().display(),
                    format_bytes(meta.len())
                );
                Ok(archive)
            }
            _ => Err(BackupError::CompressionFailed(format!(
                "compressor exited cleanly but {} was not created",
                archive.path().display()
            ))),
        }
    }
}

/// File count and total size of a directory tree, for the log.
async fn source_stats(root: &Path) -> Option<(usize, u64)> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .fold((0usize, 0u64), |(count, bytes), entry| {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                (count + 1, bytes + size)
            })
    })
    .await
    .ok()
}
