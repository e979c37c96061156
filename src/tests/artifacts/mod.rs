use std::io::Write as _;

use assert_matches::assert_matches;
use httpmock::prelude::*;
use rstest::rstest;

use crate::artifacts::{ArtifactError, ZenodoClient};

fn record_metadata_mock(server: &MockServer, record_id: &str, version: &str) {
    let archive_url = server.url("/archive");
    let path = format!("/records/{record_id}");
    server.mock(move |when, then| {
        when.method(GET).path(path);
        then.status(200).json_body(serde_json::json!({
            "metadata": { "version": version },
            "links": { "archive": archive_url },
        }));
    });
}

fn zip_with_file(name: &str, content: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer.start_file(name, zip::write::SimpleFileOptions::default()).unwrap();
    writer.write_all(content).unwrap();
    writer.finish().unwrap().into_inner()
}

fn client_for(server: &MockServer, cache: &tempfile::TempDir) -> ZenodoClient {
    ZenodoClient::with_base_url(format!("{}/records", server.base_url()), cache.path())
}

#[rstest]
#[tokio::test]
async fn metadata_fetch_parses_version_and_archive_link() {
    let server = MockServer::start();
    record_metadata_mock(&server, "123", "1.0.0");
    let cache = tempfile::tempdir().unwrap();

    let metadata = client_for(&server, &cache).fetch_metadata("123").await.unwrap();
    assert_eq!(metadata.version, "1.0.0");
    assert_eq!(metadata.archive_url, server.url("/archive"));
}

#[rstest]
#[tokio::test]
async fn resolve_downloads_and_extracts_the_record_archive() {
    let server = MockServer::start();
    record_metadata_mock(&server, "123", "1.0.0");
    let archive = zip_with_file("weights.txt", b"weights");
    server.mock(|when, then| {
        when.method(GET).path("/archive");
        then.status(200).body(archive);
    });
    let cache = tempfile::tempdir().unwrap();

    let dir = client_for(&server, &cache).resolve("123").await.unwrap();
    assert!(dir.ends_with("123_v1.0.0"));
    assert_eq!(std::fs::read(dir.join("weights.txt")).unwrap(), b"weights");
}

#[rstest]
#[tokio::test]
async fn resolve_reuses_an_up_to_date_cache() {
    let server = MockServer::start();
    record_metadata_mock(&server, "123", "1.0.0");
    let cache = tempfile::tempdir().unwrap();
    let cached = cache.path().join("123_v1.0.0");
    std::fs::create_dir_all(&cached).unwrap();
    std::fs::write(cached.join("weights.txt"), b"cached").unwrap();

    // no archive endpoint is mocked; a download attempt would fail
    let dir = client_for(&server, &cache).resolve("123").await.unwrap();
    assert_eq!(dir, cached);
    assert_eq!(std::fs::read(dir.join("weights.txt")).unwrap(), b"cached");
}

#[rstest]
#[tokio::test]
async fn unreachable_repository_without_cache_is_fatal() {
    let cache = tempfile::tempdir().unwrap();
    let client = ZenodoClient::with_base_url("http://127.0.0.1:1/records", cache.path());

    let result = client.resolve("123").await;
    assert_matches!(result, Err(ArtifactError::Unreachable(record)) if record == "123");
}

#[rstest]
#[tokio::test]
async fn unreachable_repository_falls_back_to_the_stale_cache() {
    let cache = tempfile::tempdir().unwrap();
    let cached = cache.path().join("123_v0.9");
    std::fs::create_dir_all(&cached).unwrap();
    std::fs::write(cached.join("weights.txt"), b"stale").unwrap();

    let client = ZenodoClient::with_base_url("http://127.0.0.1:1/records", cache.path());
    let dir = client.resolve("123").await.unwrap();
    assert_eq!(dir, cached);
}

#[rstest]
fn latest_local_version_orders_numerically() {
    let cache = tempfile::tempdir().unwrap();
    for version in ["1.2", "1.10"] {
        let dir = cache.path().join(format!("123_v{version}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("weights.txt"), b"w").unwrap();
    }

    let client = ZenodoClient::with_base_url("http://127.0.0.1:1/records", cache.path());
    let (version, _) = client.latest_local_version("123").unwrap();
    assert_eq!(version, "1.10");
}

#[rstest]
fn interrupted_empty_downloads_are_ignored() {
    let cache = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(cache.path().join("123_v2.0")).unwrap();
    let populated = cache.path().join("123_v1.0");
    std::fs::create_dir_all(&populated).unwrap();
    std::fs::write(populated.join("weights.txt"), b"w").unwrap();

    let client = ZenodoClient::with_base_url("http://127.0.0.1:1/records", cache.path());
    let (version, dir) = client.latest_local_version("123").unwrap();
    assert_eq!(version, "1.0");
    assert_eq!(dir, populated);
}
