//! Pack acquisition and manifest resolution
//!
//! The first pipeline stage: turn "a pack id" or "an archive on disk" into a
//! validated [`PackArchive`] plus parsed [`PackManifest`]. Catalog lookups and
//! the archive transfer are retried per policy; local archive parsing is not.

use crate::archive::PackArchive;
use crate::catalog::{cdn_fallback_url, CatalogClient};
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::manifest::PackManifest;
use crate::retry::{fetch_with_retry, TransferAttempt};
use crate::types::{ExpectedHash, FileId, ProjectId, VersionDescriptor};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Progress event emitted while fetching a pack archive
#[derive(Clone, Copy, Debug)]
pub enum ResolverEvent {
    /// The pack version resolved; transfer size now known if reported
    VersionResolved {
        /// Expected archive size, when the catalog reports one
        archive_size: Option<u64>,
    },
    /// A chunk of the archive body arrived
    Chunk {
        /// Bytes in this chunk
        bytes: u64,
    },
}

/// A pack ready for unpacking: the archive on disk and its parsed manifest
#[derive(Debug)]
pub struct ResolvedPack {
    /// The validated archive
    pub archive: PackArchive,
    /// The parsed and validated manifest
    pub manifest: PackManifest,
}

/// Resolves a pack reference into an archive and manifest
pub struct ManifestResolver {
    catalog: CatalogClient,
    retry: RetryConfig,
}

impl ManifestResolver {
    /// Build a resolver over a catalog client and retry policy
    pub fn new(catalog: CatalogClient, retry: RetryConfig) -> Self {
        Self { catalog, retry }
    }

    /// Open a local pack archive and parse its manifest
    pub async fn resolve_from_archive(&self, path: &Path) -> Result<ResolvedPack> {
        let path = path.to_path_buf();
        let resolved = tokio::task::spawn_blocking(move || {
            let archive = PackArchive::open(&path)?;
            let manifest = archive.read_manifest()?;
            Ok::<_, Error>(ResolvedPack { archive, manifest })
        })
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))??;

        info!(
            pack = %resolved.manifest.name,
            version = ?resolved.manifest.version,
            files = resolved.manifest.files.len(),
            "resolved manifest from local archive"
        );
        Ok(resolved)
    }

    /// Fetch a pack archive from the catalog into `scratch_dir` and parse its
    /// manifest
    ///
    /// With no `file_id` the most recent version is used. `on_event` receives
    /// transfer progress for the caller's accounting.
    pub async fn resolve_from_pack_id(
        &self,
        project_id: ProjectId,
        file_id: Option<FileId>,
        scratch_dir: &Path,
        cancel: &CancellationToken,
        on_event: impl Fn(ResolverEvent),
    ) -> Result<ResolvedPack> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let catalog = &self.catalog;
        let version = fetch_with_retry(&self.retry, || {
            catalog.resolve_pack_version(project_id, file_id)
        })
        .await?;
        on_event(ResolverEvent::VersionResolved {
            archive_size: version.file_length,
        });

        debug!(
            project = %project_id,
            file = %version.file_id,
            name = %version.file_name,
            "resolved pack version"
        );

        let archive_path = self
            .fetch_archive(project_id, &version, scratch_dir, cancel, &on_event)
            .await?;
        self.resolve_from_archive(&archive_path).await
    }

    /// Transfer the pack archive, verifying size and hash per attempt
    async fn fetch_archive(
        &self,
        project_id: ProjectId,
        version: &VersionDescriptor,
        scratch_dir: &Path,
        cancel: &CancellationToken,
        on_event: &impl Fn(ResolverEvent),
    ) -> Result<PathBuf> {
        let url = match &version.download_url {
            Some(url) => url.clone(),
            None => cdn_fallback_url(version.file_id, &version.file_name)?,
        };
        let archive_path = scratch_dir.join(&version.file_name);

        let catalog = &self.catalog;
        let path_ref = &archive_path;
        let url_ref = url.as_str();
        fetch_with_retry(&self.retry, || async move {
            let written = catalog
                .download_to(
                    url_ref,
                    path_ref,
                    (project_id, version.file_id),
                    cancel,
                    |bytes| on_event(ResolverEvent::Chunk { bytes }),
                )
                .await
                .map_err(TransferAttempt)?;

            if let Some(expected) = version.file_length {
                if written != expected {
                    return Err(TransferAttempt(Error::SizeMismatch {
                        file_name: version.file_name.clone(),
                        expected,
                        actual: written,
                    }));
                }
            }
            if let Some(hash) = &version.hash {
                verify_hash(hash, path_ref, &version.file_name)
                    .await
                    .map_err(TransferAttempt)?;
            }
            Ok(())
        })
        .await
        .map_err(|TransferAttempt(e)| e)?;

        info!(
            project = %project_id,
            archive = %archive_path.display(),
            "pack archive fetched"
        );
        Ok(archive_path)
    }
}

/// Hash a downloaded file off the async runtime and compare against the
/// catalog's digest.
pub(crate) async fn verify_hash(
    hash: &ExpectedHash,
    path: &Path,
    file_name: &str,
) -> Result<()> {
    let expected = hash.expected_hex();
    let hash = hash.clone();
    let path = path.to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || hash.verify_file(&path))
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))??;

    match outcome {
        Ok(()) => Ok(()),
        Err(actual) => Err(Error::HashMismatch {
            file_name: file_name.to_string(),
            expected,
            actual,
        }),
    }
}
