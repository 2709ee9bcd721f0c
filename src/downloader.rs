//! Concurrent mod-file acquisition
//!
//! Fans manifest entries out over a bounded worker pool. Each worker resolves
//! its entry against the catalog, streams the file to a `.part` path, verifies
//! size and hash, and renames into place. Entry-level failures never abort the
//! pool: required failures are collected into the report and the remaining
//! entries keep going, so one broken entry cannot hide the state of the rest.

use crate::catalog::CatalogClient;
use crate::config::{DownloadConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::manifest::ModFileEntry;
use crate::resolver::verify_hash;
use crate::retry::{fetch_with_retry, TransferAttempt};
use crate::types::{
    DownloadReport, FailedEntry, InstalledFile, ResolvedDownload, SkippedEntry,
};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Progress event emitted by download workers
///
/// `index` is the entry's position in the submitted slice; the coordinator
/// uses it to attribute bytes to per-entry weights.
#[derive(Clone, Debug)]
pub enum DownloadEvent {
    /// The entry resolved against the catalog; size now known if reported
    Resolved {
        /// Position of the entry in the submitted slice
        index: usize,
        /// Expected transfer size, when the catalog reports one
        expected_size: Option<u64>,
    },
    /// A chunk of the entry's body arrived
    Chunk {
        /// Position of the entry in the submitted slice
        index: usize,
        /// Bytes in this chunk
        bytes: u64,
    },
    /// The entry reached a terminal state (installed, skipped, or failed)
    EntryFinished {
        /// Position of the entry in the submitted slice
        index: usize,
    },
}

/// Terminal state of one entry
enum EntryOutcome {
    Installed(InstalledFile),
    Skipped(SkippedEntry),
    Failed(FailedEntry),
}

/// Runs the download stage over a bounded worker pool
pub struct DownloadOrchestrator {
    catalog: CatalogClient,
    download: DownloadConfig,
    retry: RetryConfig,
}

impl DownloadOrchestrator {
    /// Build an orchestrator over a catalog client and policies
    pub fn new(catalog: CatalogClient, download: DownloadConfig, retry: RetryConfig) -> Self {
        Self {
            catalog,
            download,
            retry,
        }
    }

    /// Acquire every entry into `output_dir`, at most
    /// `max_concurrent_downloads` in flight.
    ///
    /// Returns `Ok` with the aggregate report for entry-level outcomes, even
    /// when required entries failed; the caller decides run failure from the
    /// report. `Err` is reserved for run-fatal conditions (cancellation,
    /// filesystem errors).
    pub async fn download_all(
        &self,
        entries: &[ModFileEntry],
        output_dir: &Path,
        events: &mpsc::UnboundedSender<DownloadEvent>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        // Child token so a run-fatal failure in one worker can stop the rest
        // without touching the caller's token.
        let local_cancel = cancel.child_token();

        let mut pool = futures::stream::iter(entries.iter().copied().enumerate().map(
            |(index, entry)| {
                let local_cancel = local_cancel.clone();
                async move {
                    let outcome = self
                        .process_entry(index, entry, output_dir, events, &local_cancel)
                        .await;
                    let _ = events.send(DownloadEvent::EntryFinished { index });
                    (entry, outcome)
                }
            },
        ))
        .buffer_unordered(self.download.max_concurrent_downloads);

        let mut report = DownloadReport::default();
        let mut fatal: Option<Error> = None;

        while let Some((entry, outcome)) = pool.next().await {
            match outcome {
                Ok(EntryOutcome::Installed(file)) => {
                    report.succeeded += 1;
                    report.installed.push(file);
                }
                Ok(EntryOutcome::Skipped(skipped)) => {
                    warn!(
                        project = %skipped.project_id,
                        file = %skipped.file_id,
                        reason = %skipped.reason,
                        "optional entry skipped"
                    );
                    report.skipped_optional.push(skipped);
                }
                Ok(EntryOutcome::Failed(failed)) => {
                    error!(
                        project = %failed.project_id,
                        file = %failed.file_id,
                        reason = %failed.reason,
                        "required entry failed"
                    );
                    report.failed.push(failed);
                }
                Err(e) => {
                    if fatal.is_none() {
                        error!(
                            project = %entry.project_id,
                            file = %entry.file_id,
                            error = %e,
                            "download stage aborting"
                        );
                        local_cancel.cancel();
                        fatal = Some(e);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        report.normalize();
        info!(
            succeeded = report.succeeded,
            skipped = report.skipped(),
            failed = report.failed.len(),
            "download stage complete"
        );
        Ok(report)
    }

    /// Drive one entry to a terminal state
    ///
    /// `Err` is returned only for run-fatal conditions; everything terminal
    /// for just this entry becomes a `Skipped` or `Failed` outcome according
    /// to the entry's `required` flag.
    async fn process_entry(
        &self,
        index: usize,
        entry: ModFileEntry,
        output_dir: &Path,
        events: &mpsc::UnboundedSender<DownloadEvent>,
        cancel: &CancellationToken,
    ) -> Result<EntryOutcome> {
        match self
            .acquire_entry(index, entry, output_dir, events, cancel)
            .await
        {
            Ok(file) => Ok(EntryOutcome::Installed(file)),
            Err(e @ (Error::Cancelled | Error::Io(_) | Error::TaskJoin(_))) => Err(e),
            Err(e) if entry.required => Ok(EntryOutcome::Failed(FailedEntry {
                project_id: entry.project_id,
                file_id: entry.file_id,
                reason: e.to_string(),
            })),
            Err(e) => Ok(EntryOutcome::Skipped(SkippedEntry {
                project_id: entry.project_id,
                file_id: entry.file_id,
                reason: e.to_string(),
            })),
        }
    }

    async fn acquire_entry(
        &self,
        index: usize,
        entry: ModFileEntry,
        output_dir: &Path,
        events: &mpsc::UnboundedSender<DownloadEvent>,
        cancel: &CancellationToken,
    ) -> Result<InstalledFile> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let catalog = &self.catalog;
        let resolved = fetch_with_retry(&self.retry, || catalog.resolve_download(&entry)).await?;
        let _ = events.send(DownloadEvent::Resolved {
            index,
            expected_size: resolved.expected_size,
        });

        let subdir = output_dir.join(resolved.kind.subdirectory());
        tokio::fs::create_dir_all(&subdir).await?;
        let final_path = subdir.join(&resolved.file_name);
        let relative = format!("{}/{}", resolved.kind.subdirectory(), resolved.file_name);

        // Idempotence: a file already in place is re-verified, not re-fetched.
        if tokio::fs::try_exists(&final_path).await? {
            if let Some(size) = self.verify_existing(&resolved, &final_path).await? {
                debug!(file = %relative, "existing file verified, skipping download");
                return Ok(InstalledFile {
                    path: relative,
                    size,
                });
            }
            warn!(file = %relative, "existing file failed verification, re-fetching");
        }

        let part_path = part_path_for(&final_path);
        let written = match self
            .transfer_verified(index, &resolved, &part_path, events, cancel)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                // Leave no partial bytes behind a failed entry.
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&part_path, &final_path).await?;
        debug!(file = %relative, bytes = written, "entry installed");

        Ok(InstalledFile {
            path: relative,
            size: written,
        })
    }

    /// Transfer to the `.part` path and verify, as one retryable attempt
    async fn transfer_verified(
        &self,
        index: usize,
        resolved: &ResolvedDownload,
        part_path: &Path,
        events: &mpsc::UnboundedSender<DownloadEvent>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let catalog = &self.catalog;
        fetch_with_retry(&self.retry, || async move {
            let written = catalog
                .download_to(
                    &resolved.url,
                    part_path,
                    (resolved.project_id, resolved.file_id),
                    cancel,
                    |bytes| {
                        let _ = events.send(DownloadEvent::Chunk { index, bytes });
                    },
                )
                .await
                .map_err(TransferAttempt)?;

            if let Some(expected) = resolved.expected_size {
                if written != expected {
                    return Err(TransferAttempt(Error::SizeMismatch {
                        file_name: resolved.file_name.clone(),
                        expected,
                        actual: written,
                    }));
                }
            }
            if self.should_validate(resolved) {
                if let Some(hash) = &resolved.expected_hash {
                    verify_hash(hash, part_path, &resolved.file_name)
                        .await
                        .map_err(TransferAttempt)?;
                }
            }
            Ok(written)
        })
        .await
        .map_err(|TransferAttempt(e)| e)
    }

    /// Check a file already at the final path; `Some(size)` accepts it
    async fn verify_existing(
        &self,
        resolved: &ResolvedDownload,
        path: &Path,
    ) -> Result<Option<u64>> {
        let size = tokio::fs::metadata(path).await?.len();
        let mut checked = false;

        if let Some(expected) = resolved.expected_size {
            checked = true;
            if size != expected {
                return Ok(None);
            }
        }
        if self.should_validate(resolved) {
            if let Some(hash) = &resolved.expected_hash {
                checked = true;
                match verify_hash(hash, path, &resolved.file_name).await {
                    Ok(()) => {}
                    Err(Error::HashMismatch { .. }) => return Ok(None),
                    Err(e) => return Err(e),
                }
            }
        }
        if !checked {
            warn!(
                file = %resolved.file_name,
                "catalog reports no size or hash, keeping existing file unverified"
            );
        }
        Ok(Some(size))
    }

    fn should_validate(&self, resolved: &ResolvedDownload) -> bool {
        if !self.download.validate {
            return false;
        }
        match self.download.validate_if_size_less_than {
            Some(cap) => resolved.expected_size.map_or(true, |size| size < cap),
            None => true,
        }
    }
}

/// `.part` sibling of the final path, used until verification passes
fn part_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    final_path.with_file_name(name)
}
