//! Shared fixtures: in-memory pack archives and a mock catalog server
#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use modpack_dl::{CatalogConfig, Config, ModpackInstaller, RetryConfig};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config pointed at the mock server, with fast retries for test speed
pub fn test_config(server: &MockServer) -> Config {
    Config {
        catalog: CatalogConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            api_key: Some("test-key".into()),
            ..CatalogConfig::default()
        },
        retry: RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::from_millis(5),
            jitter: false,
            ..RetryConfig::default()
        },
        ..Config::default()
    }
}

pub fn installer(server: &MockServer) -> ModpackInstaller {
    ModpackInstaller::new(test_config(server)).unwrap()
}

/// Manifest JSON for a pack with the given `(projectID, fileID, required)`
/// entries
pub fn manifest_json(name: &str, files: &[(u64, u64, bool)]) -> String {
    let files: Vec<serde_json::Value> = files
        .iter()
        .map(|(project, file, required)| {
            serde_json::json!({
                "projectID": project,
                "fileID": file,
                "required": required,
            })
        })
        .collect();
    serde_json::json!({
        "name": name,
        "version": "1.0.0",
        "minecraft": {
            "version": "1.20.1",
            "modLoaders": [ { "id": "forge-47.2.0", "primary": true } ]
        },
        "files": files,
        "overrides": "overrides",
    })
    .to_string()
}

/// Write a pack archive: the manifest plus raw-named extra entries
///
/// Entry names ending in `/` become directory entries.
pub fn build_pack_archive(dest: &Path, manifest: &str, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(dest).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    writer
        .start_file("manifest.json", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(manifest.as_bytes()).unwrap();
    for (name, data) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(*name, zip::write::FileOptions::default())
                .unwrap();
        } else {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap();
}

/// Same archive, but returned as bytes for serving over the mock catalog
pub fn pack_archive_bytes(manifest: &str, entries: &[(&str, &[u8])]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pack.zip");
    build_pack_archive(&path, manifest, entries);
    std::fs::read(&path).unwrap()
}

/// Mount a project metadata endpoint
pub async fn mount_project(server: &MockServer, id: u64, name: &str, class_id: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/mods/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "id": id, "name": name, "classId": class_id }
        })))
        .mount(server)
        .await;
}

/// Mount file metadata advertising the given hash, plus its download body
pub async fn mount_file_with_hash(
    server: &MockServer,
    project: u64,
    file: u64,
    name: &str,
    body: &[u8],
    md5_hex: &str,
    delay: Option<Duration>,
) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/mods/{project}/files/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "id": file,
                "fileName": name,
                "fileLength": body.len(),
                "hashes": [ { "value": md5_hex, "algo": 2 } ],
                "downloadUrl": format!("{}/dl/{name}", server.uri()),
            }
        })))
        .mount(server)
        .await;

    let mut response = ResponseTemplate::new(200).set_body_bytes(body.to_vec());
    if let Some(delay) = delay {
        response = response.set_delay(delay);
    }
    Mock::given(method("GET"))
        .and(path(format!("/dl/{name}")))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Mount a healthy mod: project metadata, file metadata with a correct MD5,
/// and the download body.
pub async fn mount_mod(server: &MockServer, project: u64, file: u64, name: &str, body: &[u8]) {
    mount_project(server, project, &format!("mod-{project}"), 6).await;
    let digest = format!("{:x}", md5::compute(body));
    mount_file_with_hash(server, project, file, name, body, &digest, None).await;
}

/// Mount a modpack project whose archive is served over the mock catalog
pub async fn mount_pack(server: &MockServer, project: u64, file: u64, archive: &[u8]) {
    mount_project(server, project, "test pack", 4471).await;
    let digest = format!("{:x}", md5::compute(archive));
    mount_file_with_hash(server, project, file, "pack.zip", archive, &digest, None).await;
}

/// Mount the version-listing endpoint for a pack
pub async fn mount_version_listing(
    server: &MockServer,
    project: u64,
    versions: &[(u64, &str)],
) {
    let data: Vec<serde_json::Value> = versions
        .iter()
        .map(|(file, name)| {
            serde_json::json!({
                "id": file,
                "fileName": name,
                "displayName": name,
                "downloadUrl": format!("{}/dl/{name}", server.uri()),
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/v1/mods/{project}/files")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": data })))
        .mount(server)
        .await;
}
