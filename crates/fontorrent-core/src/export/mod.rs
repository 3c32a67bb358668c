//! Folder export pipeline.
//!
//! Writes every file of one session into a directory granted by a
//! [`StorageHost`], preserving relative paths. A job runs through these steps:
//!
//! 1. Resolve the session (best-effort, see [`resolve`])
//! 2. Acquire a directory from the host
//! 3. Wait for the file list if metadata is still pending
//! 4. Sum file lengths as the progress denominator
//! 5. Write files one at a time, recording failures and moving on
//! 6. Report 100 percent and return an [`ExportReport`]
//!
//! Only steps 1-3 can fail the job. A file that cannot be written is recorded
//! in the report and never aborts the remaining files.

pub mod resolve;
pub mod storage;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::engine::{ContentFile, Engine, EngineEvent, Fingerprint, SessionHandle};
use crate::error::{ContentError, ExportError, ExportStatus};
use crate::registry::Registry;

pub use resolve::Resolution;
pub use storage::{DirectoryHandle, FileWriteHandle, LocalStorage, StorageHost};

/// Aggregate progress of an export job.
///
/// While a file streams, `percent` counts its bytes received so far. If that
/// file then fails, its partial bytes leave the total and the update that
/// follows reports the lower, committed percentage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportProgress {
    /// Completion percentage (0 - 100)
    pub percent: u8,
    /// File being (or just) written, if any
    pub file: Option<String>,
}

/// Result of writing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    /// The file was written completely
    Written {
        /// Destination path relative to the granted directory
        path: String,
        /// Bytes written
        bytes: u64,
    },
    /// The file could not be written
    Failed {
        /// Destination path relative to the granted directory
        path: String,
        /// Why it failed
        reason: String,
    },
}

impl FileOutcome {
    /// Destination path of the file.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Written { path, .. } | Self::Failed { path, .. } => path,
        }
    }

    /// Whether the file was written.
    #[must_use]
    pub const fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Summary of a finished export job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    /// Job identifier, for correlating log lines
    pub id: Uuid,
    /// Session that was exported
    pub fingerprint: Fingerprint,
    /// Sum of declared file lengths
    pub total_bytes: u64,
    /// Sum of declared lengths of the files written
    pub written_bytes: u64,
    /// Per-file outcomes in listed order
    pub outcomes: Vec<FileOutcome>,
    /// Terminal status
    pub status: ExportStatus,
}

impl ExportReport {
    /// Number of files written.
    #[must_use]
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_written()).count()
    }

    /// Outcomes of files that could not be written.
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| !o.is_written())
    }
}

#[derive(Debug, thiserror::Error)]
enum FileError {
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// Split a normalized relative path into segments.
///
/// Empty segments are skipped; `.` and `..` are refused so nothing is written
/// outside the granted directory.
fn path_segments(path: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
        None
    } else {
        Some(segments)
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

struct Progress<F> {
    total: u64,
    written: u64,
    callback: F,
}

impl<F: FnMut(ExportProgress)> Progress<F> {
    fn percent(&self, in_flight: u64) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let ratio = (self.written + in_flight) as f64 / self.total as f64;
        (ratio * 100.0).round().min(100.0) as u8
    }

    fn emit(&mut self, in_flight: u64, file: Option<&str>) {
        let percent = self.percent(in_flight);
        (self.callback)(ExportProgress {
            percent,
            file: file.map(ToString::to_string),
        });
    }

    fn finish(&mut self) {
        (self.callback)(ExportProgress {
            percent: 100,
            file: None,
        });
    }
}

/// Runs export jobs against a registry.
#[derive(Debug, Clone, Default)]
pub struct ExportPipeline {
    config: ExportConfig,
}

impl ExportPipeline {
    /// Create a pipeline with the given export settings.
    #[must_use]
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Export every file of a session into a directory granted by `storage`.
    ///
    /// The session is resolved best-effort: when `target` is not registered
    /// the job falls back to a case-insensitive match, then to any session
    /// with a known file list, then to the first registered session.
    ///
    /// # Errors
    ///
    /// - [`ExportError::NotFound`] if the registry is empty
    /// - [`ExportError::Unsupported`] if the host cannot grant directories
    /// - [`ExportError::Cancelled`] if the grant was declined
    /// - [`ExportError::Storage`] if the granted directory cannot be opened
    /// - [`ExportError::NoFiles`] if no file list appeared in time
    pub async fn export_session<E, S, F>(
        &self,
        registry: &Registry<E>,
        target: &Fingerprint,
        storage: &S,
        on_progress: F,
    ) -> Result<ExportReport, ExportError>
    where
        E: Engine,
        S: StorageHost,
        F: FnMut(ExportProgress) + Send,
    {
        let handle = self.resolve(registry, target, &Resolution::ORDER).await?;
        let root = grant(storage).await?;
        let files = self.await_files(handle.as_ref()).await?;

        let targets: Vec<_> = files
            .iter()
            .map(|file| (normalize(&file.path()), file))
            .collect();
        Ok(self
            .write_files(handle.fingerprint(), &root, &targets, on_progress)
            .await)
    }

    /// Export a single file of a session, by index in the file list, into the
    /// granted directory under its base name.
    ///
    /// # Errors
    ///
    /// As [`export_session`](Self::export_session), except that the session
    /// must match `target` (ignoring case) and [`ExportError::NotFound`] is
    /// also returned for an index past the end of the file list.
    pub async fn export_file<E, S, F>(
        &self,
        registry: &Registry<E>,
        target: &Fingerprint,
        index: usize,
        storage: &S,
        on_progress: F,
    ) -> Result<ExportReport, ExportError>
    where
        E: Engine,
        S: StorageHost,
        F: FnMut(ExportProgress) + Send,
    {
        let strategies: Vec<Resolution> = Resolution::ORDER
            .into_iter()
            .filter(|s| s.is_exact_content())
            .collect();
        let handle = self.resolve(registry, target, &strategies).await?;
        let root = grant(storage).await?;
        let mut files = self.await_files(handle.as_ref()).await?;

        if index >= files.len() {
            tracing::warn!(
                "Session {} has no file #{} ({} file(s))",
                handle.fingerprint(),
                index,
                files.len()
            );
            return Err(ExportError::NotFound);
        }
        let file = files.swap_remove(index);
        let path = normalize(&file.path());
        let name = path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or(path.as_str())
            .to_string();

        Ok(self
            .write_files(handle.fingerprint(), &root, &[(name, &file)], on_progress)
            .await)
    }

    async fn resolve<E: Engine>(
        &self,
        registry: &Registry<E>,
        target: &Fingerprint,
        strategies: &[Resolution],
    ) -> Result<Arc<E::Handle>, ExportError> {
        let handles = registry.handles().await;
        let Some((strategy, handle)) = resolve::resolve_with(strategies, target, &handles) else {
            tracing::warn!("No session to export for {}", target);
            return Err(ExportError::NotFound);
        };

        if strategy == Resolution::Exact {
            tracing::debug!("Exporting session {}", target);
        } else {
            tracing::debug!(
                "Session {} not registered, using {} ({:?} match)",
                target,
                handle.fingerprint(),
                strategy
            );
        }
        Ok(Arc::clone(handle))
    }

    /// Return the session's files, waiting for metadata if none are listed.
    ///
    /// The wait ends on a metadata or ready event, or when a poll sees files
    /// or a ready/done session; it gives up after the configured timeout.
    async fn await_files<H: SessionHandle>(&self, handle: &H) -> Result<Vec<H::File>, ExportError> {
        let files = handle.files();
        if !files.is_empty() {
            return Ok(files);
        }

        tracing::debug!("Waiting for metadata of {}", handle.fingerprint());
        let mut events = handle.subscribe();
        let poll_interval = if self.config.metadata_poll_interval.is_zero() {
            tracing::warn!("Metadata poll interval must be non-zero, using the default");
            Duration::from_millis(crate::DEFAULT_METADATA_POLL_MS)
        } else {
            self.config.metadata_poll_interval
        };

        let wait = async {
            let mut ticker = tokio::time::interval(poll_interval);
            let mut events_open = true;
            loop {
                tokio::select! {
                    event = events.recv(), if events_open => match event {
                        Ok(EngineEvent::Metadata | EngineEvent::Ready) => break,
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => events_open = false,
                    },
                    _ = ticker.tick() => {
                        let stats = handle.stats();
                        if stats.ready || stats.done || !handle.files().is_empty() {
                            break;
                        }
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.metadata_timeout, wait)
            .await
            .is_err()
        {
            tracing::debug!("Metadata wait for {} timed out", handle.fingerprint());
        }

        let files = handle.files();
        if files.is_empty() {
            let stats = handle.stats();
            tracing::warn!(
                "No files available to export for {} (ready: {}, done: {})",
                handle.fingerprint(),
                stats.ready,
                stats.done
            );
            return Err(ExportError::NoFiles(self.config.metadata_timeout.as_secs()));
        }
        Ok(files)
    }

    async fn write_files<D, C, F>(
        &self,
        fingerprint: Fingerprint,
        root: &D,
        targets: &[(String, &C)],
        on_progress: F,
    ) -> ExportReport
    where
        D: DirectoryHandle,
        C: ContentFile,
        F: FnMut(ExportProgress) + Send,
    {
        let id = Uuid::new_v4();
        let total = targets.iter().map(|(_, file)| file.length()).sum();
        let mut progress = Progress {
            total,
            written: 0,
            callback: on_progress,
        };

        tracing::info!(
            "Export {} of {}: {} file(s), {} bytes",
            id,
            fingerprint,
            targets.len(),
            total
        );
        progress.emit(0, None);

        let mut outcomes = Vec::with_capacity(targets.len());
        for (path, file) in targets {
            match self.write_file(root, *file, path, &mut progress).await {
                Ok(bytes) => {
                    progress.written += file.length();
                    progress.emit(0, Some(path.as_str()));
                    tracing::info!("Saved {}", path);
                    outcomes.push(FileOutcome::Written {
                        path: path.clone(),
                        bytes,
                    });
                }
                Err(e) => {
                    tracing::warn!("Could not save {}: {}", path, e);
                    progress.emit(0, Some(path.as_str()));
                    outcomes.push(FileOutcome::Failed {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        progress.finish();

        let report = ExportReport {
            id,
            fingerprint,
            total_bytes: total,
            written_bytes: progress.written,
            outcomes,
            status: ExportStatus::Completed,
        };
        tracing::info!(
            "Export {} finished: {}/{} file(s) written",
            id,
            report.written(),
            report.outcomes.len()
        );
        report
    }

    async fn write_file<D, C, F>(
        &self,
        root: &D,
        file: &C,
        path: &str,
        progress: &mut Progress<F>,
    ) -> Result<u64, FileError>
    where
        D: DirectoryHandle,
        C: ContentFile,
        F: FnMut(ExportProgress) + Send,
    {
        let segments = path_segments(path).ok_or_else(|| FileError::InvalidPath(path.to_string()))?;
        let Some((name, dirs)) = segments.split_last() else {
            return Err(FileError::InvalidPath(path.to_string()));
        };

        let mut dir = root.clone();
        for segment in dirs {
            dir = dir.directory(segment).await?;
        }

        let mut writer = dir.create_file(name).await?;
        match self.transfer(file, &mut writer, path, progress).await {
            Ok(bytes) => {
                writer.close().await?;
                Ok(bytes)
            }
            Err(e) => {
                if let Err(close_err) = writer.close().await {
                    tracing::debug!("Closing {} after failure also failed: {}", path, close_err);
                }
                Err(e)
            }
        }
    }

    /// Copy content into `writer`, whole if possible, streamed otherwise.
    async fn transfer<C, W, F>(
        &self,
        file: &C,
        writer: &mut W,
        path: &str,
        progress: &mut Progress<F>,
    ) -> Result<u64, FileError>
    where
        C: ContentFile,
        W: FileWriteHandle,
        F: FnMut(ExportProgress) + Send,
    {
        let over_limit = self
            .config
            .whole_content_limit
            .is_some_and(|limit| file.length() > limit);

        if !over_limit {
            match file.read_all().await {
                Ok(data) => {
                    writer.write(&data).await?;
                    return Ok(data.len() as u64);
                }
                Err(ContentError::Unavailable) => {
                    tracing::debug!("Whole content of {} unavailable, streaming", path);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut stream = file.stream()?;
        let mut streamed = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write(&chunk).await?;
            streamed += chunk.len() as u64;
            progress.emit(streamed, Some(path));
        }
        Ok(streamed)
    }
}

async fn grant<S: StorageHost>(storage: &S) -> Result<S::Directory, ExportError> {
    if !storage.is_supported() {
        tracing::warn!("Directory storage is not available on this host");
        return Err(ExportError::Unsupported);
    }

    storage.pick_directory().await.map_err(|e| {
        tracing::warn!("Export cancelled or failed: {}", e);
        ExportError::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segments() {
        assert_eq!(path_segments("x/y.txt"), Some(vec!["x", "y.txt"]));
        assert_eq!(path_segments("/x//y.txt/"), Some(vec!["x", "y.txt"]));
        assert_eq!(path_segments("z.txt"), Some(vec!["z.txt"]));
        assert_eq!(path_segments("x/../y"), None);
        assert_eq!(path_segments("./y"), None);
        assert_eq!(path_segments("//"), None);
        assert_eq!(path_segments(""), None);
    }

    #[test]
    fn test_normalize_backslashes() {
        assert_eq!(normalize(r"Album\disc 1\track.flac"), "Album/disc 1/track.flac");
    }

    #[test]
    fn test_progress_percent() {
        let mut seen = Vec::new();
        let mut progress = Progress {
            total: 150,
            written: 0,
            callback: |p: ExportProgress| seen.push(p.percent),
        };
        progress.emit(0, None);
        progress.emit(50, Some("x"));
        progress.written = 150;
        progress.emit(10, None);
        progress.finish();
        drop(progress);
        assert_eq!(seen, vec![0, 33, 100, 100]);
    }

    #[test]
    fn test_progress_zero_total() {
        let mut seen = Vec::new();
        let mut progress = Progress {
            total: 0,
            written: 0,
            callback: |p: ExportProgress| seen.push(p.percent),
        };
        progress.emit(0, None);
        progress.emit(42, Some("empty"));
        progress.finish();
        drop(progress);
        assert_eq!(seen, vec![0, 0, 100]);
    }

    #[test]
    fn test_report_counts() {
        let report = ExportReport {
            id: Uuid::new_v4(),
            fingerprint: Fingerprint::new("a"),
            total_bytes: 150,
            written_bytes: 50,
            outcomes: vec![
                FileOutcome::Failed {
                    path: "x/y.txt".into(),
                    reason: "evicted".into(),
                },
                FileOutcome::Written {
                    path: "z.txt".into(),
                    bytes: 50,
                },
            ],
            status: ExportStatus::Completed,
        };
        assert_eq!(report.written(), 1);
        assert_eq!(
            report.failures().map(FileOutcome::path).collect::<Vec<_>>(),
            vec!["x/y.txt"]
        );
    }
}
