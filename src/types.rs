//! Core types for modpack-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Unique identifier for a catalog project (a mod or a modpack)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl ProjectId {
    /// Create a new ProjectId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ProjectId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProjectId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique identifier for one file of a catalog project
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl FileId {
    /// Create a new FileId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for FileId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for FileId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unpack pipeline stage
///
/// The derived ordering is the monotonicity contract: a run never revisits an
/// earlier stage, and progress snapshots never regress across this ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Obtaining and parsing the pack manifest
    ResolvingManifest,
    /// Copying the overrides subtree out of the archive
    ExtractingArchive,
    /// Fetching and verifying mod files
    DownloadingMods,
    /// Writing the install record and cleaning up
    Finalizing,
}

impl Stage {
    /// Short lowercase name used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ResolvingManifest => "resolving_manifest",
            Stage::ExtractingArchive => "extracting_archive",
            Stage::DownloadingMods => "downloading_mods",
            Stage::Finalizing => "finalizing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress observation delivered to the caller
///
/// Snapshots form an ordered, finite sequence: `progress` is non-decreasing
/// over a run and `stage` never moves backwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Current pipeline stage
    pub stage: Stage,
    /// Overall progress in `[0, 1]`, weighted across stages
    pub progress: f32,
    /// Human-readable status line, last-writer-wins
    pub message: String,
}

/// Install subdirectory for a catalog project class
///
/// The catalog tags each project with a class id; the class decides where the
/// file lands inside the output tree. Unknown classes install as plain mods.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModKind {
    /// A regular mod (class 6) -> `mods/`
    #[default]
    Mod,
    /// A resource pack (class 12) -> `resourcepacks/`
    ResourcePack,
    /// A shader pack (class 6552) -> `shaderpacks/`
    ShaderPack,
    /// A nested modpack (class 4471) -> `modpacks/`
    ModPack,
}

impl ModKind {
    /// Map a catalog class id to an install kind
    pub fn from_class_id(class_id: Option<u64>) -> Self {
        match class_id {
            Some(12) => ModKind::ResourcePack,
            Some(6552) => ModKind::ShaderPack,
            Some(4471) => ModKind::ModPack,
            _ => ModKind::Mod,
        }
    }

    /// Subdirectory of the output tree this kind installs into
    pub fn subdirectory(&self) -> &'static str {
        match self {
            ModKind::Mod => "mods",
            ModKind::ResourcePack => "resourcepacks",
            ModKind::ShaderPack => "shaderpacks",
            ModKind::ModPack => "modpacks",
        }
    }
}

/// Expected content hash for a download, as reported by the catalog
///
/// The catalog reports hashes with an `algo` discriminator: 1 is SHA-1,
/// 2 is MD5.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedHash {
    /// SHA-1 hex digest (catalog algo 1)
    Sha1(String),
    /// MD5 hex digest (catalog algo 2)
    Md5(String),
}

impl ExpectedHash {
    /// The expected hex digest, lowercased
    pub fn expected_hex(&self) -> String {
        match self {
            ExpectedHash::Sha1(h) | ExpectedHash::Md5(h) => h.to_ascii_lowercase(),
        }
    }

    /// Compute the matching digest over a file, streaming in 64 KiB chunks
    pub fn compute_for_file(&self, path: &Path) -> std::io::Result<String> {
        let mut file = std::fs::File::open(path)?;
        let mut buffer = [0u8; 65536];
        match self {
            ExpectedHash::Md5(_) => {
                let mut context = md5::Context::new();
                loop {
                    let n = file.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    context.consume(&buffer[..n]);
                }
                Ok(format!("{:x}", context.compute()))
            }
            ExpectedHash::Sha1(_) => {
                use sha1::{Digest, Sha1};
                let mut hasher = Sha1::new();
                loop {
                    let n = file.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buffer[..n]);
                }
                Ok(format!("{:x}", hasher.finalize()))
            }
        }
    }

    /// Verify a file on disk against this hash, returning the actual digest
    /// on mismatch.
    pub fn verify_file(&self, path: &Path) -> std::io::Result<std::result::Result<(), String>> {
        let actual = self.compute_for_file(path)?;
        if actual == self.expected_hex() {
            Ok(Ok(()))
        } else {
            Ok(Err(actual))
        }
    }
}

/// A manifest entry resolved against the catalog: a concrete URL plus the
/// integrity metadata to verify the transfer against.
#[derive(Clone, Debug)]
pub struct ResolvedDownload {
    /// Project the file belongs to
    pub project_id: ProjectId,
    /// File id within the project
    pub file_id: FileId,
    /// Direct download URL
    pub url: String,
    /// File name to install as
    pub file_name: String,
    /// Install subdirectory routing
    pub kind: ModKind,
    /// Expected byte size when the catalog reports one
    pub expected_size: Option<u64>,
    /// Expected content hash when the catalog reports one
    pub expected_hash: Option<ExpectedHash>,
}

/// One available version of a pack, most-recent-first in listings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// File id identifying this version's archive
    pub file_id: FileId,
    /// Display name shown to users
    pub display_name: String,
    /// Archive file name
    pub file_name: String,
    /// Release timestamp when the catalog reports one
    pub release_date: Option<DateTime<Utc>>,
    /// Archive size in bytes when known
    pub file_length: Option<u64>,
    /// Content hash when known
    pub hash: Option<ExpectedHash>,
    /// Direct download URL when the catalog exposes one
    pub download_url: Option<String>,
}

/// Search result summary for a pack
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackSummary {
    /// Catalog project id
    pub id: ProjectId,
    /// Pack name
    pub name: String,
    /// Short description
    pub summary: String,
    /// Total download count, used for ranking display
    pub download_count: u64,
    /// Logo thumbnail URL if any
    pub logo_url: Option<String>,
}

/// A mod file that was installed into the output tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledFile {
    /// Path relative to the output directory, forward slashes
    pub path: String,
    /// Installed size in bytes
    pub size: u64,
}

/// An optional entry that failed terminally and was skipped
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkippedEntry {
    /// Project of the skipped entry
    pub project_id: ProjectId,
    /// File id of the skipped entry
    pub file_id: FileId,
    /// Why the entry was skipped
    pub reason: String,
}

/// A required entry that failed terminally
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedEntry {
    /// Project of the failed entry
    pub project_id: ProjectId,
    /// File id of the failed entry
    pub file_id: FileId,
    /// Terminal failure reason
    pub reason: String,
}

/// Aggregate outcome of the download stage
///
/// Aggregation is order-independent: the lists are sorted by
/// `(project_id, file_id)` so the report is deterministic for a fixed input
/// set regardless of completion order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DownloadReport {
    /// Number of entries fetched (or re-verified in place) successfully
    pub succeeded: usize,
    /// Optional entries that failed terminally
    pub skipped_optional: Vec<SkippedEntry>,
    /// Required entries that failed terminally; non-empty fails the run
    pub failed: Vec<FailedEntry>,
    /// Files present in the output tree after the download stage
    pub installed: Vec<InstalledFile>,
}

impl DownloadReport {
    /// Number of optional entries recorded as skipped
    pub fn skipped(&self) -> usize {
        self.skipped_optional.len()
    }

    /// Sort the aggregate lists into their deterministic order
    pub fn normalize(&mut self) {
        self.skipped_optional
            .sort_by_key(|e| (e.project_id, e.file_id));
        self.failed.sort_by_key(|e| (e.project_id, e.file_id));
        self.installed.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

/// Record written to the output directory during finalization, enumerating
/// what this run installed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallRecord {
    /// Pack name from the manifest
    pub pack_name: String,
    /// Pack version from the manifest, if declared
    pub pack_version: Option<String>,
    /// Target game version (informational)
    pub minecraft_version: String,
    /// Primary mod loader id (informational)
    pub mod_loader: Option<String>,
    /// When the install finished
    pub installed_at: DateTime<Utc>,
    /// Entries fetched successfully
    pub succeeded: usize,
    /// Optional entries skipped after terminal failures
    pub skipped_optional: usize,
    /// Files installed by the download stage
    pub files: Vec<InstalledFile>,
}
