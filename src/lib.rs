//! # modpack-dl
//!
//! Modpack acquisition and installation library: resolve a pack manifest from
//! a catalog id or a local archive, extract the pack's overrides subtree, and
//! fetch its mod files concurrently with retry, hash verification, and staged
//! progress reporting.
//!
//! ## Example
//!
//! ```no_run
//! use modpack_dl::{Config, ModpackInstaller, ProjectId};
//!
//! # async fn run() -> modpack_dl::Result<()> {
//! let installer = ModpackInstaller::new(Config::default())?;
//! let mut op = installer.unpack_from_pack_id(ProjectId::new(520914), None, "./instance");
//!
//! while let Some(snapshot) = op.recv_progress().await {
//!     println!("[{}] {:>5.1}% {}", snapshot.stage, snapshot.progress * 100.0, snapshot.message);
//! }
//! let report = op.wait().await?;
//! println!("installed {} mod files", report.succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! An unpack run moves through four stages, each contributing a fixed share
//! of overall progress: resolving the manifest, extracting the overrides
//! subtree, downloading mod files, and finalizing. Progress snapshots are
//! non-decreasing and end at exactly 1.0 on success.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod archive;
pub mod catalog;
pub mod config;
pub mod downloader;
pub mod error;
pub mod installer;
pub mod manifest;
pub mod resolver;
pub mod retry;
pub mod types;

pub use config::{CatalogConfig, Config, DownloadConfig, RetryConfig, StageWeights};
pub use error::{ArchiveError, CatalogError, Error, Result};
pub use installer::{ModpackInstaller, UnpackOperation, INSTALL_RECORD_NAME};
pub use manifest::{ModFileEntry, PackManifest, MANIFEST_ENTRY_NAME};
pub use types::{
    DownloadReport, ExpectedHash, FailedEntry, FileId, InstallRecord, InstalledFile, ModKind,
    PackSummary, ProgressSnapshot, ProjectId, SkippedEntry, Stage, VersionDescriptor,
};
