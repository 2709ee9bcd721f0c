//! Public entry point: staged unpack pipeline with weighted progress
//!
//! [`ModpackInstaller`] drives the four stages in order: resolve the manifest,
//! extract the overrides subtree, download mod files, finalize. Progress from
//! all stages is folded by a single coordinator task into a non-decreasing
//! sequence of [`ProgressSnapshot`]s; workers never write progress directly.

use crate::catalog::CatalogClient;
use crate::config::{Config, StageWeights};
use crate::downloader::{DownloadEvent, DownloadOrchestrator};
use crate::error::{Error, Result};
use crate::manifest::PackManifest;
use crate::resolver::{ManifestResolver, ResolvedPack, ResolverEvent};
use crate::retry::fetch_with_retry;
use crate::types::{
    DownloadReport, FileId, InstallRecord, PackSummary, ProgressSnapshot, ProjectId, Stage,
    VersionDescriptor,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Name of the record written to the output directory during finalization
pub const INSTALL_RECORD_NAME: &str = "modpack-install.json";

/// Smallest overall-progress change worth a new snapshot
const MIN_EMIT_DELTA: f32 = 0.001;
/// How often the coordinator samples archive-fetch progress
const RESOLVE_TICK: Duration = Duration::from_millis(100);

/// High-level modpack installer
///
/// Cheap to clone; all clones share the same HTTP connection pool.
#[derive(Clone)]
pub struct ModpackInstaller {
    config: Config,
    catalog: CatalogClient,
}

/// A running unpack, handing out progress and the final report
///
/// Dropping the operation detaches it; the pipeline keeps running. Use
/// [`UnpackOperation::cancel`] to stop it.
pub struct UnpackOperation {
    progress: mpsc::UnboundedReceiver<ProgressSnapshot>,
    handle: JoinHandle<Result<DownloadReport>>,
    cancel: CancellationToken,
}

impl UnpackOperation {
    /// Next progress snapshot, or `None` once the pipeline has finished
    pub async fn recv_progress(&mut self) -> Option<ProgressSnapshot> {
        self.progress.recv().await
    }

    /// Request cooperative cancellation
    ///
    /// In-flight transfers stop at the next chunk boundary and the run
    /// resolves to [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observing this run's cancellation
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for the pipeline to finish and return the final report
    pub async fn wait(self) -> Result<DownloadReport> {
        self.handle
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))?
    }
}

/// What the pipeline starts from
enum UnpackSource {
    PackId {
        project_id: ProjectId,
        file_id: Option<FileId>,
    },
    Archive(PathBuf),
}

impl ModpackInstaller {
    /// Build an installer, validating the configuration up front
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let catalog = CatalogClient::new(&config.catalog)?;
        Ok(Self { config, catalog })
    }

    /// Search the catalog for modpacks matching `query`
    pub async fn search(&self, query: &str) -> Result<Vec<PackSummary>> {
        let catalog = &self.catalog;
        fetch_with_retry(&self.config.retry, || catalog.search(query)).await
    }

    /// List available versions of a pack, most recent first
    pub async fn list_versions(&self, project_id: ProjectId) -> Result<Vec<VersionDescriptor>> {
        let catalog = &self.catalog;
        fetch_with_retry(&self.config.retry, || catalog.list_versions(project_id)).await
    }

    /// Start unpacking a pack from the catalog into `output_dir`
    ///
    /// With no `file_id` the most recent version is installed. Must be called
    /// within a Tokio runtime; the pipeline runs on a spawned task.
    pub fn unpack_from_pack_id(
        &self,
        project_id: ProjectId,
        file_id: Option<FileId>,
        output_dir: impl AsRef<Path>,
    ) -> UnpackOperation {
        self.spawn_unpack(
            UnpackSource::PackId {
                project_id,
                file_id,
            },
            output_dir.as_ref().to_path_buf(),
        )
    }

    /// Start unpacking a pack archive already on disk into `output_dir`
    pub fn unpack_from_archive(
        &self,
        archive: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> UnpackOperation {
        self.spawn_unpack(
            UnpackSource::Archive(archive.as_ref().to_path_buf()),
            output_dir.as_ref().to_path_buf(),
        )
    }

    fn spawn_unpack(&self, source: UnpackSource, output_dir: PathBuf) -> UnpackOperation {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let pipeline = UnpackPipeline {
            config: self.config.clone(),
            catalog: self.catalog.clone(),
            reporter: ProgressReporter::new(progress_tx, self.config.stage_weights),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(pipeline.run(source, output_dir));

        UnpackOperation {
            progress: progress_rx,
            handle,
            cancel,
        }
    }
}

/// One unpack run: owns everything the spawned pipeline task needs
struct UnpackPipeline {
    config: Config,
    catalog: CatalogClient,
    reporter: ProgressReporter,
    cancel: CancellationToken,
}

impl UnpackPipeline {
    #[instrument(skip_all, fields(output = %output_dir.display()))]
    async fn run(mut self, source: UnpackSource, output_dir: PathBuf) -> Result<DownloadReport> {
        tokio::fs::create_dir_all(&output_dir).await?;
        let scratch = self.scratch_dir().await?;

        let resolved = self.resolve_stage(source, scratch.path()).await?;
        let manifest = resolved.manifest.clone();
        self.checkpoint()?;

        self.extract_stage(resolved, &output_dir).await?;
        self.checkpoint()?;

        let report = self.download_stage(&manifest, &output_dir).await?;
        if let Some(first) = report.failed.first() {
            return Err(Error::RequiredFileFailed {
                project_id: first.project_id,
                file_id: first.file_id,
                reason: first.reason.clone(),
            });
        }
        self.checkpoint()?;

        self.finalize_stage(&manifest, &report, &output_dir).await?;

        info!(
            pack = %manifest.name,
            succeeded = report.succeeded,
            skipped = report.skipped(),
            "unpack complete"
        );
        Ok(report)
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Scratch directory for fetched archives, removed when the run ends
    async fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        let scratch = match &self.config.temp_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                tempfile::Builder::new()
                    .prefix("modpack-dl-")
                    .tempdir_in(dir)?
            }
            None => tempfile::Builder::new().prefix("modpack-dl-").tempdir()?,
        };
        Ok(scratch)
    }

    async fn resolve_stage(
        &mut self,
        source: UnpackSource,
        scratch: &Path,
    ) -> Result<ResolvedPack> {
        self.reporter
            .emit(Stage::ResolvingManifest, 0.0, "resolving manifest");
        let resolver = ManifestResolver::new(self.catalog.clone(), self.config.retry.clone());

        let resolved = match source {
            UnpackSource::Archive(path) => resolver.resolve_from_archive(&path).await?,
            UnpackSource::PackId {
                project_id,
                file_id,
            } => {
                // The fetch runs inline; progress is sampled off atomics so
                // the callback stays trivially shareable.
                let received = Arc::new(AtomicU64::new(0));
                let expected = Arc::new(AtomicU64::new(0));
                let on_event = {
                    let received = received.clone();
                    let expected = expected.clone();
                    move |event| match event {
                        ResolverEvent::VersionResolved { archive_size } => {
                            expected.store(archive_size.unwrap_or(0), Ordering::Relaxed);
                        }
                        ResolverEvent::Chunk { bytes } => {
                            received.fetch_add(bytes, Ordering::Relaxed);
                        }
                    }
                };

                let fut = resolver.resolve_from_pack_id(
                    project_id,
                    file_id,
                    scratch,
                    &self.cancel,
                    on_event,
                );
                tokio::pin!(fut);
                let mut ticker = tokio::time::interval(RESOLVE_TICK);
                loop {
                    tokio::select! {
                        result = &mut fut => break result?,
                        _ = ticker.tick() => {
                            let total = expected.load(Ordering::Relaxed);
                            if total > 0 {
                                let fraction =
                                    received.load(Ordering::Relaxed) as f32 / total as f32;
                                self.reporter.emit(
                                    Stage::ResolvingManifest,
                                    fraction,
                                    "fetching pack archive",
                                );
                            }
                        }
                    }
                }
            }
        };

        self.reporter
            .emit(Stage::ResolvingManifest, 1.0, "manifest resolved");
        Ok(resolved)
    }

    async fn extract_stage(&mut self, resolved: ResolvedPack, output_dir: &Path) -> Result<()> {
        self.reporter
            .emit(Stage::ExtractingArchive, 0.0, "extracting overrides");

        let prefix = resolved.manifest.overrides.clone();
        let archive = resolved.archive;
        let (archive, subtree_total) = {
            let prefix = prefix.clone();
            tokio::task::spawn_blocking(move || {
                let total = archive.subtree_size(&prefix)?;
                Ok::<_, Error>((archive, total))
            })
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))??
        };

        let (bytes_tx, mut bytes_rx) = mpsc::unbounded_channel::<u64>();
        let dest = output_dir.to_path_buf();
        let extract = tokio::task::spawn_blocking(move || {
            archive.extract_subtree(&prefix, &dest, |n| {
                let _ = bytes_tx.send(n);
            })
        });

        let mut extracted = 0u64;
        while let Some(n) = bytes_rx.recv().await {
            extracted += n;
            if subtree_total > 0 {
                self.reporter.emit(
                    Stage::ExtractingArchive,
                    extracted as f32 / subtree_total as f32,
                    "extracting overrides",
                );
            }
        }
        extract
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))??;

        self.reporter
            .emit(Stage::ExtractingArchive, 1.0, "overrides extracted");
        Ok(())
    }

    async fn download_stage(
        &mut self,
        manifest: &PackManifest,
        output_dir: &Path,
    ) -> Result<DownloadReport> {
        let total = manifest.files.len();
        self.reporter.emit(
            Stage::DownloadingMods,
            0.0,
            format!("downloading {total} mod files"),
        );

        let orchestrator = DownloadOrchestrator::new(
            self.catalog.clone(),
            self.config.download.clone(),
            self.config.retry.clone(),
        );
        let entries = manifest.files.clone();
        let out = output_dir.to_path_buf();
        let cancel = self.cancel.clone();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let download =
            tokio::spawn(
                async move { orchestrator.download_all(&entries, &out, &event_tx, &cancel).await },
            );

        let mut tally = DownloadTally::new(total);
        while let Some(event) = event_rx.recv().await {
            tally.apply(&event);
            self.reporter.emit(
                Stage::DownloadingMods,
                tally.fraction(),
                format!("downloading mod files ({}/{total})", tally.finished()),
            );
        }
        let report = download
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))??;

        if report.failed.is_empty() {
            self.reporter
                .emit(Stage::DownloadingMods, 1.0, "mod files downloaded");
        }
        Ok(report)
    }

    async fn finalize_stage(
        &mut self,
        manifest: &PackManifest,
        report: &DownloadReport,
        output_dir: &Path,
    ) -> Result<()> {
        self.reporter
            .emit(Stage::Finalizing, 0.0, "writing install record");

        let record = InstallRecord {
            pack_name: manifest.name.clone(),
            pack_version: manifest.version.clone(),
            minecraft_version: manifest.minecraft.version.clone(),
            mod_loader: manifest.mod_loader_id().map(String::from),
            installed_at: Utc::now(),
            succeeded: report.succeeded,
            skipped_optional: report.skipped(),
            files: report.installed.clone(),
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        tokio::fs::write(output_dir.join(INSTALL_RECORD_NAME), json).await?;

        self.reporter.finish("install complete");
        Ok(())
    }
}

/// Folds per-stage fractions into the overall weighted, monotonic sequence
struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressSnapshot>,
    weights: StageWeights,
    floor: f32,
    last_sent: f32,
    last_stage: Option<Stage>,
}

impl ProgressReporter {
    fn new(tx: mpsc::UnboundedSender<ProgressSnapshot>, weights: StageWeights) -> Self {
        Self {
            tx,
            weights,
            floor: 0.0,
            last_sent: 0.0,
            last_stage: None,
        }
    }

    fn segment(&self, stage: Stage) -> (f32, f32) {
        match stage {
            Stage::ResolvingManifest => (0.0, self.weights.resolve),
            Stage::ExtractingArchive => (self.weights.resolve, self.weights.extract),
            Stage::DownloadingMods => (self.weights.download_offset(), self.weights.download),
            Stage::Finalizing => (self.weights.finalize_offset(), self.weights.finalize),
        }
    }

    /// Emit a snapshot for `fraction` (in `[0, 1]`) of the given stage
    ///
    /// The overall value is clamped non-decreasing so re-estimation inside a
    /// stage can never move the bar backwards. Snapshots closer than
    /// `MIN_EMIT_DELTA` to the previous one are coalesced away unless the
    /// stage changed.
    fn emit(&mut self, stage: Stage, fraction: f32, message: impl Into<String>) {
        let (offset, weight) = self.segment(stage);
        let overall = (offset + weight * fraction.clamp(0.0, 1.0))
            .clamp(0.0, 1.0)
            .max(self.floor);
        self.floor = overall;

        let stage_changed = self.last_stage != Some(stage);
        if !stage_changed && overall - self.last_sent < MIN_EMIT_DELTA {
            return;
        }
        self.last_stage = Some(stage);
        self.last_sent = overall;
        let _ = self.tx.send(ProgressSnapshot {
            stage,
            progress: overall,
            message: message.into(),
        });
    }

    /// Terminal snapshot: exactly 1.0, always delivered
    fn finish(&mut self, message: impl Into<String>) {
        self.floor = 1.0;
        self.last_sent = 1.0;
        self.last_stage = Some(Stage::Finalizing);
        let _ = self.tx.send(ProgressSnapshot {
            stage: Stage::Finalizing,
            progress: 1.0,
            message: message.into(),
        });
    }
}

/// Byte-weighted completion estimate for the download stage
///
/// Each entry carries weight proportional to its expected size; entries whose
/// size the catalog never reported carry the mean of the known sizes, so one
/// giant file dominates the bar the way it dominates wall time.
struct DownloadTally {
    expected: Vec<Option<u64>>,
    received: Vec<u64>,
    finished: Vec<bool>,
}

impl DownloadTally {
    fn new(entries: usize) -> Self {
        Self {
            expected: vec![None; entries],
            received: vec![0; entries],
            finished: vec![false; entries],
        }
    }

    fn apply(&mut self, event: &DownloadEvent) {
        match *event {
            DownloadEvent::Resolved {
                index,
                expected_size,
            } => {
                if let Some(slot) = self.expected.get_mut(index) {
                    *slot = expected_size;
                }
            }
            DownloadEvent::Chunk { index, bytes } => {
                if let Some(slot) = self.received.get_mut(index) {
                    *slot += bytes;
                }
            }
            DownloadEvent::EntryFinished { index } => {
                if let Some(slot) = self.finished.get_mut(index) {
                    *slot = true;
                }
            }
        }
    }

    fn finished(&self) -> usize {
        self.finished.iter().filter(|f| **f).count()
    }

    fn fraction(&self) -> f32 {
        if self.expected.is_empty() {
            return 1.0;
        }
        let known: Vec<u64> = self.expected.iter().flatten().copied().collect();
        let mean = if known.is_empty() {
            1
        } else {
            (known.iter().sum::<u64>() / known.len() as u64).max(1)
        };

        let mut total = 0f64;
        let mut done = 0f64;
        for index in 0..self.expected.len() {
            let weight = self.expected[index].unwrap_or(mean).max(1) as f64;
            total += weight;
            done += if self.finished[index] {
                weight
            } else {
                (self.received[index] as f64).min(weight)
            };
        }
        (done / total) as f32
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> (
        ProgressReporter,
        mpsc::UnboundedReceiver<ProgressSnapshot>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ProgressReporter::new(tx, StageWeights::default()), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressSnapshot>) -> Vec<ProgressSnapshot> {
        let mut out = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            out.push(snapshot);
        }
        out
    }

    #[test]
    fn stage_fractions_map_to_weighted_overall() {
        let (mut reporter, mut rx) = reporter();
        reporter.emit(Stage::ResolvingManifest, 0.5, "a");
        reporter.emit(Stage::ExtractingArchive, 0.0, "b");
        reporter.emit(Stage::DownloadingMods, 0.5, "c");
        reporter.finish("done");

        let snapshots = drain(&mut rx);
        assert!((snapshots[0].progress - 0.05).abs() < 1e-6);
        assert!((snapshots[1].progress - 0.10).abs() < 1e-6);
        assert!((snapshots[2].progress - 0.575).abs() < 1e-5);
        assert_eq!(snapshots.last().unwrap().progress, 1.0);
    }

    #[test]
    fn progress_never_regresses() {
        let (mut reporter, mut rx) = reporter();
        reporter.emit(Stage::DownloadingMods, 0.8, "high estimate");
        // Re-estimation shrinks the in-stage fraction; the bar must hold.
        reporter.emit(Stage::DownloadingMods, 0.3, "re-estimated");
        reporter.emit(Stage::DownloadingMods, 0.9, "recovered");

        let snapshots = drain(&mut rx);
        let mut previous = 0.0;
        for snapshot in &snapshots {
            assert!(snapshot.progress >= previous);
            previous = snapshot.progress;
        }
    }

    #[test]
    fn near_identical_snapshots_are_coalesced() {
        let (mut reporter, mut rx) = reporter();
        reporter.emit(Stage::DownloadingMods, 0.5, "a");
        reporter.emit(Stage::DownloadingMods, 0.5000001, "b");
        reporter.emit(Stage::DownloadingMods, 0.5000002, "c");

        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn stage_transition_always_emits() {
        let (mut reporter, mut rx) = reporter();
        reporter.emit(Stage::ResolvingManifest, 1.0, "resolved");
        // Same overall value (extract at 0.0 == resolve at 1.0), new stage.
        reporter.emit(Stage::ExtractingArchive, 0.0, "extracting");

        let snapshots = drain(&mut rx);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].stage, Stage::ExtractingArchive);
    }

    #[test]
    fn tally_weights_entries_by_expected_size() {
        let mut tally = DownloadTally::new(2);
        tally.apply(&DownloadEvent::Resolved {
            index: 0,
            expected_size: Some(900),
        });
        tally.apply(&DownloadEvent::Resolved {
            index: 1,
            expected_size: Some(100),
        });

        tally.apply(&DownloadEvent::Chunk {
            index: 1,
            bytes: 100,
        });
        tally.apply(&DownloadEvent::EntryFinished { index: 1 });
        // The small file alone is 10% of the stage.
        assert!((tally.fraction() - 0.1).abs() < 1e-6);

        tally.apply(&DownloadEvent::Chunk {
            index: 0,
            bytes: 450,
        });
        assert!((tally.fraction() - 0.55).abs() < 1e-6);
    }

    #[test]
    fn unknown_sizes_carry_the_mean_of_known_sizes() {
        let mut tally = DownloadTally::new(3);
        tally.apply(&DownloadEvent::Resolved {
            index: 0,
            expected_size: Some(100),
        });
        tally.apply(&DownloadEvent::Resolved {
            index: 1,
            expected_size: Some(300),
        });
        tally.apply(&DownloadEvent::Resolved {
            index: 2,
            expected_size: None,
        });

        // Mean of known sizes is 200, total weight 600.
        tally.apply(&DownloadEvent::EntryFinished { index: 2 });
        assert!((tally.fraction() - 200.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn empty_entry_set_is_complete() {
        let tally = DownloadTally::new(0);
        assert_eq!(tally.fraction(), 1.0);
        assert_eq!(tally.finished(), 0);
    }

    #[test]
    fn received_bytes_never_overshoot_entry_weight() {
        let mut tally = DownloadTally::new(1);
        tally.apply(&DownloadEvent::Resolved {
            index: 0,
            expected_size: Some(100),
        });
        // Server sent more than the catalog promised.
        tally.apply(&DownloadEvent::Chunk {
            index: 0,
            bytes: 500,
        });
        assert!(tally.fraction() <= 1.0);
    }
}
