//! Pack archive reading and overrides extraction
//!
//! A pack archive is a zip container holding a manifest entry at a fixed
//! name plus an overrides subtree copied verbatim into the output tree.
//! All I/O here is blocking; async callers go through
//! `tokio::task::spawn_blocking`.

use crate::error::{ArchiveError, Result};
use crate::manifest::{PackManifest, MANIFEST_ENTRY_NAME};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Copy buffer size for streamed entry extraction
const COPY_BUFFER_SIZE: usize = 65536;

/// A validated pack archive on disk
#[derive(Debug)]
pub struct PackArchive {
    path: PathBuf,
}

impl PackArchive {
    /// Open an archive, validating that the zip central directory is readable
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Validate the container up front so later operations only see
        // entry-level failures.
        Self::open_zip(&path)?;
        Ok(Self { path })
    }

    /// Path of the underlying archive file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_zip(path: &Path) -> Result<zip::ZipArchive<File>> {
        let file = File::open(path)?;
        zip::ZipArchive::new(file).map_err(|e| {
            ArchiveError::Corrupt {
                archive: path.to_path_buf(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Read and parse the manifest entry
    pub fn read_manifest(&self) -> Result<PackManifest> {
        let mut zip = Self::open_zip(&self.path)?;
        let entry = match zip.by_name(MANIFEST_ENTRY_NAME) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ArchiveError::MissingManifest {
                    archive: self.path.clone(),
                    name: MANIFEST_ENTRY_NAME.to_string(),
                }
                .into());
            }
            Err(e) => {
                return Err(ArchiveError::Corrupt {
                    archive: self.path.clone(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        debug!(archive = %self.path.display(), "parsing manifest entry");
        PackManifest::from_reader(entry)
    }

    /// Sum of uncompressed sizes of all file entries under `prefix/`
    ///
    /// Used as the denominator for extraction progress.
    pub fn subtree_size(&self, prefix: &str) -> Result<u64> {
        let mut zip = Self::open_zip(&self.path)?;
        let mut total = 0u64;
        for index in 0..zip.len() {
            let entry = zip.by_index(index).map_err(|e| ArchiveError::Corrupt {
                archive: self.path.clone(),
                reason: e.to_string(),
            })?;
            if !entry.is_dir() && relative_to_prefix(entry.name(), prefix).is_some() {
                total += entry.size();
            }
        }
        Ok(total)
    }

    /// Extract every entry under `prefix/` into `dest`, preserving relative
    /// paths and creating directories as needed.
    ///
    /// Entries whose resolved path would escape `dest` abort the extraction
    /// with [`ArchiveError::UnsafeEntryPath`]. `on_bytes` is invoked with the
    /// byte count of each copied chunk. Returns the total bytes written.
    pub fn extract_subtree(
        &self,
        prefix: &str,
        dest: &Path,
        mut on_bytes: impl FnMut(u64),
    ) -> Result<u64> {
        let mut zip = Self::open_zip(&self.path)?;

        // Validate every name first so an unsafe entry late in the archive
        // cannot leave earlier entries already written under dest.
        let mut plan: Vec<(usize, PathBuf, bool)> = Vec::new();
        for index in 0..zip.len() {
            let entry = zip.by_index(index).map_err(|e| ArchiveError::Corrupt {
                archive: self.path.clone(),
                reason: e.to_string(),
            })?;

            let Some(relative) = relative_to_prefix(entry.name(), prefix) else {
                continue;
            };
            if relative.is_empty() {
                continue;
            }

            // Traversal guard: the entry as a whole must resolve inside the
            // archive root, which in turn pins the stripped path under dest.
            let entry_name = entry.name().to_string();
            let safe = entry
                .enclosed_name()
                .map(|p| p.to_path_buf())
                .ok_or_else(|| ArchiveError::UnsafeEntryPath {
                    entry: entry_name.clone(),
                })?;
            let relative_path = safe
                .strip_prefix(prefix)
                .map_err(|_| ArchiveError::UnsafeEntryPath { entry: entry_name })?
                .to_path_buf();

            plan.push((index, relative_path, entry.is_dir()));
        }

        let mut total = 0u64;
        let mut extracted = 0usize;

        for (index, relative_path, is_dir) in plan {
            let mut entry = zip.by_index(index).map_err(|e| ArchiveError::Corrupt {
                archive: self.path.clone(),
                reason: e.to_string(),
            })?;

            let out_path = dest.join(&relative_path);

            if is_dir {
                std::fs::create_dir_all(&out_path)?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut out = File::create(&out_path)?;
            let mut buffer = [0u8; COPY_BUFFER_SIZE];
            loop {
                let n = entry.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buffer[..n])?;
                total += n as u64;
                on_bytes(n as u64);
            }
            extracted += 1;
        }

        info!(
            archive = %self.path.display(),
            prefix,
            files = extracted,
            bytes = total,
            "overrides extraction complete"
        );
        Ok(total)
    }
}

/// Strip `prefix/` from an entry name, returning the remainder when the
/// entry lives under the prefix.
fn relative_to_prefix<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = name.strip_prefix(prefix)?;
    rest.strip_prefix('/').or({
        // The prefix directory entry itself ("overrides/" or "overrides")
        if rest.is_empty() {
            Some("")
        } else {
            None
        }
    })
}
