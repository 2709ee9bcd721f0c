//! Pack manifest parsing and validation
//!
//! The manifest is a JSON document stored at a fixed name inside the pack
//! archive. It enumerates the mod files to acquire and names the overrides
//! subtree that is copied verbatim into the output tree.

use crate::error::{ArchiveError, Result};
use crate::types::{FileId, ProjectId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;

/// Fixed name of the manifest entry inside a pack archive
pub const MANIFEST_ENTRY_NAME: &str = "manifest.json";

/// One remote mod file referenced by the manifest
///
/// Created by manifest parsing, consumed exactly once by the download
/// orchestrator, never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModFileEntry {
    /// Catalog project the file belongs to
    #[serde(rename = "projectID")]
    pub project_id: ProjectId,
    /// File id within the project
    #[serde(rename = "fileID")]
    pub file_id: FileId,
    /// Whether the run fails if this entry cannot be acquired
    pub required: bool,
}

/// Target game information from the manifest (informational, not enforced)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinecraftInfo {
    /// Game version the pack targets
    pub version: String,
    /// Declared mod loaders
    #[serde(rename = "modLoaders", default)]
    pub mod_loaders: Vec<ModLoader>,
}

/// One declared mod loader
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModLoader {
    /// Loader identifier, e.g. "forge-47.2.0"
    pub id: String,
    /// Whether this is the pack's primary loader
    #[serde(default)]
    pub primary: bool,
}

/// Parsed modpack manifest
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackManifest {
    /// Pack name
    pub name: String,
    /// Pack version, if declared
    #[serde(default)]
    pub version: Option<String>,
    /// Primary author, if declared
    #[serde(default)]
    pub author: Option<String>,
    /// Target runtime information
    pub minecraft: MinecraftInfo,
    /// Mod files to acquire; an empty list is a valid overrides-only pack
    #[serde(default)]
    pub files: Vec<ModFileEntry>,
    /// Name of the archive subtree copied verbatim into the output tree
    #[serde(default = "default_overrides")]
    pub overrides: String,
}

fn default_overrides() -> String {
    "overrides".to_string()
}

impl PackManifest {
    /// Parse and validate a manifest from a reader
    ///
    /// Rejects malformed JSON, missing required fields, and duplicate
    /// `(projectID, fileID)` pairs before any I/O side effects occur.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let manifest: PackManifest = serde_json::from_reader(reader)
            .map_err(|e| ArchiveError::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse and validate a manifest from a byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(bytes)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.files {
            if !seen.insert((entry.project_id, entry.file_id)) {
                return Err(ArchiveError::InvalidManifest(format!(
                    "duplicate file entry {}/{}",
                    entry.project_id, entry.file_id
                ))
                .into());
            }
        }
        Ok(())
    }

    /// The primary mod loader id, if any loader is declared
    ///
    /// Falls back to the first declared loader when none is marked primary.
    pub fn mod_loader_id(&self) -> Option<&str> {
        self.minecraft
            .mod_loaders
            .iter()
            .find(|l| l.primary)
            .or_else(|| self.minecraft.mod_loaders.first())
            .map(|l| l.id.as_str())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const FULL_MANIFEST: &str = r#"{
        "name": "All the Widgets",
        "version": "1.4.2",
        "author": "widgeteer",
        "minecraft": {
            "version": "1.20.1",
            "modLoaders": [
                { "id": "forge-47.2.0", "primary": true },
                { "id": "fabric-0.15.0" }
            ]
        },
        "files": [
            { "projectID": 238222, "fileID": 4712888, "required": true },
            { "projectID": 248787, "fileID": 4632566, "required": false }
        ],
        "overrides": "overrides"
    }"#;

    #[test]
    fn full_manifest_parses() {
        let manifest = PackManifest::from_slice(FULL_MANIFEST.as_bytes()).unwrap();
        assert_eq!(manifest.name, "All the Widgets");
        assert_eq!(manifest.version.as_deref(), Some("1.4.2"));
        assert_eq!(manifest.minecraft.version, "1.20.1");
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[0].project_id, ProjectId::new(238222));
        assert!(manifest.files[0].required);
        assert!(!manifest.files[1].required);
        assert_eq!(manifest.overrides, "overrides");
    }

    #[test]
    fn primary_loader_wins() {
        let manifest = PackManifest::from_slice(FULL_MANIFEST.as_bytes()).unwrap();
        assert_eq!(manifest.mod_loader_id(), Some("forge-47.2.0"));
    }

    #[test]
    fn first_loader_is_fallback_when_none_primary() {
        let json = r#"{
            "name": "p",
            "minecraft": { "version": "1.20.1", "modLoaders": [
                { "id": "fabric-0.15.0" }, { "id": "forge-47.2.0" }
            ]}
        }"#;
        let manifest = PackManifest::from_slice(json.as_bytes()).unwrap();
        assert_eq!(manifest.mod_loader_id(), Some("fabric-0.15.0"));
    }

    #[test]
    fn zero_files_is_valid() {
        let json = r#"{ "name": "overrides only", "minecraft": { "version": "1.20.1" } }"#;
        let manifest = PackManifest::from_slice(json.as_bytes()).unwrap();
        assert!(manifest.files.is_empty());
        assert_eq!(manifest.overrides, "overrides");
        assert_eq!(manifest.mod_loader_id(), None);
    }

    #[test]
    fn malformed_json_is_invalid_manifest() {
        let err = PackManifest::from_slice(b"{ not json").unwrap_err();
        assert!(matches!(
            err,
            Error::Archive(ArchiveError::InvalidManifest(_))
        ));
    }

    #[test]
    fn missing_required_field_is_invalid_manifest() {
        // no "name"
        let json = r#"{ "minecraft": { "version": "1.20.1" } }"#;
        let err = PackManifest::from_slice(json.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            Error::Archive(ArchiveError::InvalidManifest(_))
        ));
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let json = r#"{
            "name": "dupes",
            "minecraft": { "version": "1.20.1" },
            "files": [
                { "projectID": 1, "fileID": 2, "required": true },
                { "projectID": 1, "fileID": 2, "required": false }
            ]
        }"#;
        let err = PackManifest::from_slice(json.as_bytes()).unwrap_err();
        match err {
            Error::Archive(ArchiveError::InvalidManifest(msg)) => {
                assert!(msg.contains("duplicate"), "got: {msg}");
            }
            other => panic!("expected InvalidManifest, got {other:?}"),
        }
    }

    #[test]
    fn same_project_different_files_is_allowed() {
        let json = r#"{
            "name": "ok",
            "minecraft": { "version": "1.20.1" },
            "files": [
                { "projectID": 1, "fileID": 2, "required": true },
                { "projectID": 1, "fileID": 3, "required": true }
            ]
        }"#;
        assert!(PackManifest::from_slice(json.as_bytes()).is_ok());
    }
}
