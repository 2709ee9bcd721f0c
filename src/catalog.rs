//! Typed HTTP client for the remote mod catalog
//!
//! Thin boundary over the catalog's v1 API: dynamic JSON shapes are parsed
//! into strict typed descriptors here and nothing loosely-typed flows inward.
//! This component performs no retries; retry policy lives in the download
//! orchestrator, the only component aware of the multi-entry context.

use crate::config::CatalogConfig;
use crate::error::{CatalogError, Error, Result};
use crate::manifest::ModFileEntry;
use crate::types::{
    ExpectedHash, FileId, ModKind, PackSummary, ProjectId, ResolvedDownload, VersionDescriptor,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Game id the catalog uses for Minecraft
const GAME_ID: u64 = 432;
/// Project class id for modpacks, used to scope search results
const MODPACK_CLASS_ID: u64 = 4471;
/// Catalog hash algorithm discriminators
const HASH_ALGO_SHA1: i64 = 1;
const HASH_ALGO_MD5: i64 = 2;

/// HTTP client for the mod catalog
#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Wire types. Only the fields the pipeline consumes are declared; absence of
// a required field is a MalformedResponse at this boundary.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ProjectData {
    #[allow(dead_code)]
    id: u64,
    name: String,
    #[serde(rename = "classId", default)]
    class_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileHashData {
    value: String,
    algo: i64,
}

#[derive(Debug, Deserialize)]
struct FileData {
    id: u64,
    #[serde(rename = "fileName")]
    file_name: String,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(rename = "fileDate", default)]
    file_date: Option<DateTime<Utc>>,
    #[serde(rename = "fileLength", default)]
    file_length: Option<u64>,
    #[serde(default)]
    hashes: Vec<FileHashData>,
    #[serde(rename = "downloadUrl", default)]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchLogo {
    #[serde(rename = "thumbnailUrl", default)]
    thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchMod {
    id: u64,
    name: String,
    #[serde(default)]
    summary: String,
    #[serde(rename = "downloadCount", default)]
    download_count: f64,
    #[serde(default)]
    logo: Option<SearchLogo>,
}

impl FileData {
    fn preferred_hash(&self) -> Option<ExpectedHash> {
        self.hashes
            .iter()
            .find(|h| h.algo == HASH_ALGO_MD5)
            .map(|h| ExpectedHash::Md5(h.value.clone()))
            .or_else(|| {
                self.hashes
                    .iter()
                    .find(|h| h.algo == HASH_ALGO_SHA1)
                    .map(|h| ExpectedHash::Sha1(h.value.clone()))
            })
    }

    fn into_descriptor(self) -> VersionDescriptor {
        let hash = self.preferred_hash();
        VersionDescriptor {
            file_id: FileId::new(self.id),
            display_name: self.display_name.unwrap_or_else(|| self.file_name.clone()),
            file_name: self.file_name,
            release_date: self.file_date,
            file_length: self.file_length,
            hash,
            download_url: self.download_url,
        }
    }
}

impl CatalogClient {
    /// Build a client from catalog settings
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {e}"),
                key: Some("catalog".into()),
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            Error::Config {
                message: format!("invalid catalog URL path '{path}': {e}"),
                key: Some("catalog.base_url".into()),
            }
        })
    }

    /// One GET against the catalog; `not_found` maps a 404 status when the
    /// request targets a specific entry.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        not_found: Option<(ProjectId, FileId)>,
    ) -> Result<T> {
        debug!(%url, "catalog request");
        let mut request = self.http.get(url.clone());
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(match not_found {
                Some((project_id, file_id)) => CatalogError::FileNotFound {
                    project_id,
                    file_id,
                }
                .into(),
                None => CatalogError::Unavailable(format!("{url}: 404 not found")).into(),
            });
        }
        if !status.is_success() {
            return Err(CatalogError::Unavailable(format!("{url}: HTTP {status}")).into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
        serde_json::from_str(&body)
            .map_err(|e| CatalogError::MalformedResponse(e.to_string()).into())
    }

    /// Search the catalog for modpacks, ranked by popularity
    pub async fn search(&self, query: &str) -> Result<Vec<PackSummary>> {
        let mut url = self.endpoint("/v1/mods/search")?;
        url.query_pairs_mut()
            .append_pair("gameId", &GAME_ID.to_string())
            .append_pair("classId", &MODPACK_CLASS_ID.to_string())
            .append_pair("searchFilter", query)
            .append_pair("sortField", "2")
            .append_pair("sortOrder", "desc");

        let envelope: DataEnvelope<Vec<SearchMod>> = self.get_json(url, None).await?;
        Ok(envelope
            .data
            .into_iter()
            .map(|m| PackSummary {
                id: ProjectId::new(m.id),
                name: m.name,
                summary: m.summary,
                download_count: m.download_count as u64,
                logo_url: m.logo.and_then(|l| l.thumbnail_url),
            })
            .collect())
    }

    /// List available versions of a pack, most recent first (served order)
    pub async fn list_versions(&self, project_id: ProjectId) -> Result<Vec<VersionDescriptor>> {
        let url = self.endpoint(&format!("/v1/mods/{project_id}/files"))?;
        let envelope: DataEnvelope<Vec<FileData>> = self.get_json(url, None).await?;
        Ok(envelope
            .data
            .into_iter()
            .map(FileData::into_descriptor)
            .collect())
    }

    /// Fetch one project's metadata (name, class routing)
    async fn get_project(&self, project_id: ProjectId) -> Result<ProjectData> {
        let url = self.endpoint(&format!("/v1/mods/{project_id}"))?;
        let envelope: DataEnvelope<ProjectData> = self.get_json(url, None).await?;
        Ok(envelope.data)
    }

    /// Fetch one file's metadata
    async fn get_file(&self, project_id: ProjectId, file_id: FileId) -> Result<FileData> {
        let url = self.endpoint(&format!("/v1/mods/{project_id}/files/{file_id}"))?;
        let envelope: DataEnvelope<FileData> = self
            .get_json(url, Some((project_id, file_id)))
            .await?;
        Ok(envelope.data)
    }

    /// Resolve one version of a pack: the given file id, or the most recent
    /// version when none is specified.
    pub async fn resolve_pack_version(
        &self,
        project_id: ProjectId,
        file_id: Option<FileId>,
    ) -> Result<VersionDescriptor> {
        match file_id {
            Some(file_id) => {
                let file = self.get_file(project_id, file_id).await?;
                Ok(file.into_descriptor())
            }
            None => {
                let versions = self.list_versions(project_id).await?;
                versions.into_iter().next().ok_or_else(|| {
                    CatalogError::MalformedResponse(format!(
                        "project {project_id} has no files"
                    ))
                    .into()
                })
            }
        }
    }

    /// Resolve a manifest entry to a concrete download
    ///
    /// When the catalog withholds the download URL (author opted out of API
    /// distribution) the CDN fallback URL is derived from the file id and
    /// name instead.
    pub async fn resolve_download(&self, entry: &ModFileEntry) -> Result<ResolvedDownload> {
        let project = self.get_project(entry.project_id).await?;
        let file = self.get_file(entry.project_id, entry.file_id).await?;

        let url = match &file.download_url {
            Some(url) => url.clone(),
            None => {
                warn!(
                    project = %entry.project_id,
                    file = %entry.file_id,
                    name = %file.file_name,
                    "catalog withheld download URL, using CDN fallback"
                );
                cdn_fallback_url(entry.file_id, &file.file_name)?
            }
        };

        debug!(
            project = %project.name,
            file = %file.file_name,
            size = ?file.file_length,
            "resolved download"
        );

        Ok(ResolvedDownload {
            project_id: entry.project_id,
            file_id: entry.file_id,
            url,
            file_name: file.file_name.clone(),
            kind: ModKind::from_class_id(project.class_id),
            expected_size: file.file_length,
            expected_hash: file.preferred_hash(),
        })
    }

    /// Stream a download to `dest`, invoking `on_chunk` per received chunk
    /// and checking the cancellation token between chunks. Returns bytes
    /// written. The partially written file is left for the caller to clean
    /// up on error.
    pub async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        ids: (ProjectId, FileId),
        cancel: &CancellationToken,
        mut on_chunk: impl FnMut(u64),
    ) -> Result<u64> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.http.get(url).send() => {
                response.map_err(|e| CatalogError::Unavailable(e.to_string()))?
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            let (project_id, file_id) = ids;
            return Err(CatalogError::FileNotFound {
                project_id,
                file_id,
            }
            .into());
        }
        if !status.is_success() {
            return Err(CatalogError::Unavailable(format!("{url}: HTTP {status}")).into());
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = stream.next() => match chunk {
                    None => break,
                    Some(chunk) => {
                        chunk.map_err(|e| CatalogError::Unavailable(e.to_string()))?
                    }
                },
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Derive the CDN fallback URL for a file the catalog will not serve directly
///
/// The CDN path splits the file id after the first four digits and strips
/// leading zeros from the remainder: 4712888 -> `4712/888`.
pub(crate) fn cdn_fallback_url(file_id: FileId, file_name: &str) -> Result<String> {
    let id = file_id.to_string();
    if id.len() <= 4 {
        return Err(CatalogError::MalformedResponse(format!(
            "cannot derive CDN path for file id {id}"
        ))
        .into());
    }
    let first = &id[0..4];
    let remaining = id[4..].trim_start_matches('0');
    if remaining.is_empty() {
        return Err(CatalogError::MalformedResponse(format!(
            "cannot derive CDN path for file id {id}"
        ))
        .into());
    }
    Ok(format!(
        "https://mediafilez.forgecdn.net/files/{first}/{remaining}/{}",
        urlencoding::encode(file_name)
    ))
}
