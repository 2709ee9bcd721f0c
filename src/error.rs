//! Error types for modpack-dl
//!
//! The taxonomy separates the two external surfaces (the pack archive and the
//! remote catalog) into their own sub-enums and keeps run-level conditions at
//! the top. Retryability classification lives in [`crate::retry`].

use crate::types::{FileId, ProjectId};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for modpack-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for modpack-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.max_concurrent_downloads")
        key: Option<String>,
    },

    /// Pack archive error (corrupt zip, missing manifest, unsafe entry)
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Remote catalog error (unavailable, file not found, malformed body)
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Downloaded bytes did not match the catalog's expected hash
    #[error("hash mismatch for {file_name}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Name of the file that failed verification
        file_name: String,
        /// Hash the catalog reported for the file
        expected: String,
        /// Hash computed over the downloaded bytes
        actual: String,
    },

    /// Downloaded byte count did not match the catalog's expected size
    #[error("size mismatch for {file_name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Name of the file that failed verification
        file_name: String,
        /// Size the catalog reported for the file
        expected: u64,
        /// Number of bytes actually downloaded
        actual: u64,
    },

    /// A required manifest entry could not be acquired; fatal for the run
    #[error("required file {project_id}/{file_id} failed: {reason}")]
    RequiredFileFailed {
        /// Project the failed entry belongs to
        project_id: ProjectId,
        /// File id of the failed entry
        file_id: FileId,
        /// Terminal failure reason for the entry
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// A spawned worker or blocking task panicked or was aborted
    #[error("task failed: {0}")]
    TaskJoin(String),
}

/// Errors reading or extracting a pack archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The zip container itself could not be read
    #[error("corrupt archive {archive}: {reason}")]
    Corrupt {
        /// Path to the unreadable archive
        archive: PathBuf,
        /// Underlying zip failure
        reason: String,
    },

    /// The archive has no manifest entry at the expected name
    #[error("archive {archive} has no manifest entry '{name}'")]
    MissingManifest {
        /// Path to the archive
        archive: PathBuf,
        /// Fixed manifest entry name that was looked up
        name: String,
    },

    /// The manifest entry exists but does not parse or validate
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// An entry's resolved path would escape the destination directory
    #[error("entry path '{entry}' escapes the destination directory")]
    UnsafeEntryPath {
        /// The offending archive entry name
        entry: String,
    },
}

/// Errors talking to the remote mod catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Transport-level failure or non-2xx response; retryable
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// The catalog has no such file; terminal per entry
    #[error("file {file_id} of project {project_id} not found in catalog")]
    FileNotFound {
        /// Project that was queried
        project_id: ProjectId,
        /// File that was queried
        file_id: FileId,
    },

    /// The catalog responded with a body the typed descriptors reject
    #[error("malformed catalog response: {0}")]
    MalformedResponse(String),
}

impl Error {
    /// True when this error terminates an entry but not necessarily the run
    /// (optional entries record it and move on).
    pub fn is_per_entry_terminal(&self) -> bool {
        matches!(
            self,
            Error::Catalog(CatalogError::FileNotFound { .. })
                | Error::HashMismatch { .. }
                | Error::SizeMismatch { .. }
        )
    }
}
